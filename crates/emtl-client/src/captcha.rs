//! Captcha recognition seam.
//!
//! Recognition itself lives outside this crate. A solver is a stateless
//! service shared by every client; its lifetime is independent of any
//! session or manager.

use std::sync::Arc;

use emtl_session::Result;

/// Reads the code out of a login captcha image.
pub trait CaptchaSolver: Send + Sync {
    /// Return the recognised code. A wrong answer is not an error; the
    /// service will reject the login and the attempt is retried.
    fn solve(&self, image: &[u8]) -> Result<String>;
}

impl<F> CaptchaSolver for F
where
    F: Fn(&[u8]) -> Result<String> + Send + Sync,
{
    fn solve(&self, image: &[u8]) -> Result<String> {
        self(image)
    }
}

/// Shared captcha solver.
pub type SharedCaptchaSolver = Arc<dyn CaptchaSolver>;
