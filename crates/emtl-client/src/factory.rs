//! Wiring [`EmtClient`] into a [`SessionManager`].

use std::sync::Arc;

use emtl_session::{
    Credential, FileStore, Result, SessionConfig, SessionFactory, SessionManager,
};
use tracing::debug;

use crate::captcha::SharedCaptchaSolver;
use crate::client::{EmtClient, EmtState};
use crate::config::EmtConfig;

/// Builds [`EmtClient`]s that share one configuration and captcha solver.
#[derive(Clone)]
pub struct EmtClientFactory {
    config: Arc<EmtConfig>,
    solver: SharedCaptchaSolver,
}

impl EmtClientFactory {
    /// Create a factory whose clients all use `config` and `solver`.
    pub fn new(config: EmtConfig, solver: SharedCaptchaSolver) -> Self {
        Self {
            config: Arc::new(config),
            solver,
        }
    }

    /// Endpoint configuration handed to every client.
    pub fn config(&self) -> &EmtConfig {
        &self.config
    }
}

impl SessionFactory for EmtClientFactory {
    type Session = EmtClient;

    fn create(&self) -> Result<EmtClient> {
        EmtClient::new(Arc::clone(&self.config), Arc::clone(&self.solver))
    }

    fn restore(&self, state: EmtState) -> Result<EmtClient> {
        EmtClient::with_state(Arc::clone(&self.config), Arc::clone(&self.solver), state)
    }
}

impl std::fmt::Debug for EmtClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmtClientFactory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A manager backed by the file store, with the default credential taken
/// from the environment when it is set there.
pub fn client_manager(
    session_config: SessionConfig,
    emt_config: EmtConfig,
    solver: SharedCaptchaSolver,
) -> Result<SessionManager<EmtClientFactory>> {
    let store = FileStore::open(session_config.storage_dir.as_ref())?;
    debug!(dir = %store.dir().display(), "Opened session store");

    let factory = EmtClientFactory::new(emt_config, solver);
    let manager = SessionManager::new(factory, Arc::new(store), session_config);

    Ok(match Credential::resolve(None) {
        Ok(credential) => manager.with_default_credential(credential),
        Err(_) => manager,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use emtl_session::{PASSWORD_ENV, STORAGE_DIR_ENV, TradingSession, USERNAME_ENV};
    use serial_test::serial;
    use tempfile::TempDir;

    fn solver() -> SharedCaptchaSolver {
        Arc::new(|_: &[u8]| Ok("0000".to_string()))
    }

    #[test]
    fn test_restore_keeps_state() {
        let factory = EmtClientFactory::new(EmtConfig::default(), solver());
        let state = EmtState {
            username: "540975189038".to_string(),
            validate_key: Some("key".to_string()),
            cookies: Default::default(),
        };

        let client = factory.restore(state.clone()).unwrap();
        assert_eq!(client.snapshot(), state);

        let fresh = factory.create().unwrap();
        assert_eq!(fresh.snapshot(), EmtState::default());
    }

    #[test]
    #[serial]
    fn test_client_manager_uses_env() {
        let dir = TempDir::new().unwrap();
        unsafe {
            std::env::set_var(STORAGE_DIR_ENV, dir.path());
            std::env::set_var(USERNAME_ENV, "540975189038");
            std::env::set_var(PASSWORD_ENV, "123731");
        }

        let manager = client_manager(SessionConfig::default(), EmtConfig::default(), solver());

        unsafe {
            std::env::remove_var(STORAGE_DIR_ENV);
            std::env::remove_var(USERNAME_ENV);
            std::env::remove_var(PASSWORD_ENV);
        }

        let manager = manager.unwrap();
        assert_eq!(
            manager.default_credential().map(|c| c.username()),
            Some("540975189038")
        );
        assert!(manager.list_cached_identities().unwrap().is_empty());
    }

    #[test]
    #[serial]
    fn test_client_manager_without_env_credential() {
        let dir = TempDir::new().unwrap();
        unsafe {
            std::env::remove_var(USERNAME_ENV);
            std::env::remove_var(PASSWORD_ENV);
        }

        let config = SessionConfig::default().with_storage_dir(dir.path());
        let manager = client_manager(config, EmtConfig::default(), solver()).unwrap();
        assert!(manager.default_credential().is_none());
    }
}
