//! Client for the EMT web trading service.
//!
//! [`EmtClient`] performs the captcha login and the session probe;
//! [`client_manager`] puts it behind a caching [`SessionManager`].
//!
//! ```rust,ignore
//! use emtl_client::{EmtConfig, client_manager};
//! use emtl_session::{Credential, SessionConfig};
//!
//! let solver = Arc::new(|image: &[u8]| ocr.read(image));
//! let manager = client_manager(SessionConfig::default(), EmtConfig::default(), solver)?;
//! let client = manager.get_session("540975189038", &Credential::new("540975189038", pw), None)?;
//! ```
//!
//! [`SessionManager`]: emtl_session::SessionManager

mod captcha;
mod client;
mod config;
mod crypto;
mod factory;
mod response;

pub use captcha::{CaptchaSolver, SharedCaptchaSolver};
pub use client::{EmtClient, EmtState};
pub use config::{DEFAULT_BASE_URL, EmtConfig};
pub use crypto::encrypt_password;
pub use factory::{EmtClientFactory, client_manager};
