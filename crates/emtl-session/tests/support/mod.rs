//! Scripted stand-in for the remote trading service.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use emtl_session::{
    Credential, Error, ManualClock, Result, SessionConfig, SessionFactory, SessionManager,
    SharedSessionStore, TradingSession,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Outcome of one scripted login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Captcha accepted, key issued.
    Accept,
    /// Captcha misread; ordinary rejection.
    Reject,
    /// Transport failure.
    Fail,
    /// Remote answered that the session is already expired.
    Expire,
}

#[derive(Debug, Default)]
pub struct FakeRemote {
    script: Mutex<VecDeque<Attempt>>,
    live_keys: Mutex<HashSet<String>>,
    validate_status: Mutex<Option<u16>>,
    validate_expired: Mutex<bool>,
    logins: AtomicU32,
    validations: AtomicU32,
    issued: AtomicU32,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, attempts: impl IntoIterator<Item = Attempt>) {
        self.script.lock().extend(attempts);
    }

    pub fn logins(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn validations(&self) -> u32 {
        self.validations.load(Ordering::SeqCst)
    }

    /// Revoke every key server-side.
    pub fn revoke_all(&self) {
        self.live_keys.lock().clear();
    }

    /// Make validation probes fail with an HTTP status.
    pub fn fail_validation_with(&self, status: Option<u16>) {
        *self.validate_status.lock() = status;
    }

    /// Make the next validation probe report the session as expired.
    pub fn expire_next_validation(&self) {
        *self.validate_expired.lock() = true;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FakeState {
    pub username: String,
    pub key: Option<String>,
}

#[derive(Debug)]
pub struct FakeSession {
    remote: Arc<FakeRemote>,
    pub state: FakeState,
}

impl TradingSession for FakeSession {
    type State = FakeState;

    fn login(&mut self, credential: &Credential, _duration: Duration) -> Result<Option<String>> {
        self.remote.logins.fetch_add(1, Ordering::SeqCst);
        self.state.username = credential.username().to_string();

        let attempt = self.remote.script.lock().pop_front().unwrap_or(Attempt::Accept);
        match attempt {
            Attempt::Accept => {
                let n = self.remote.issued.fetch_add(1, Ordering::SeqCst) + 1;
                let key = format!("{}-{n}", credential.username());
                self.remote.live_keys.lock().insert(key.clone());
                self.state.key = Some(key.clone());
                Ok(Some(key))
            }
            Attempt::Reject => {
                self.state.key = None;
                Ok(None)
            }
            Attempt::Fail => Err(Error::api(None, "connection reset by peer", None)),
            Attempt::Expire => {
                self.state.key = None;
                Err(Error::SessionExpired(r#"{"Status":-2}"#.to_string()))
            }
        }
    }

    fn validate(&mut self) -> Result<bool> {
        self.remote.validations.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = *self.remote.validate_status.lock() {
            return Err(Error::api(Some(status), "probe failed", Some("<html/>".into())));
        }
        if std::mem::take(&mut *self.remote.validate_expired.lock()) {
            return Err(Error::SessionExpired(r#"{"Status":-2}"#.to_string()));
        }
        Ok(self
            .state
            .key
            .as_ref()
            .is_some_and(|key| self.remote.live_keys.lock().contains(key)))
    }

    fn snapshot(&self) -> FakeState {
        self.state.clone()
    }
}

pub struct FakeFactory {
    pub remote: Arc<FakeRemote>,
}

impl SessionFactory for FakeFactory {
    type Session = FakeSession;

    fn create(&self) -> Result<FakeSession> {
        Ok(FakeSession {
            remote: Arc::clone(&self.remote),
            state: FakeState {
                username: String::new(),
                key: None,
            },
        })
    }

    fn restore(&self, state: FakeState) -> Result<FakeSession> {
        Ok(FakeSession {
            remote: Arc::clone(&self.remote),
            state,
        })
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 20, 9, 30, 0).unwrap()
}

pub struct Harness {
    pub manager: SessionManager<FakeFactory>,
    pub remote: Arc<FakeRemote>,
    pub clock: Arc<ManualClock>,
}

pub fn harness(store: SharedSessionStore, config: SessionConfig) -> Harness {
    let remote = FakeRemote::new();
    let clock = Arc::new(ManualClock::new(start_time()));
    let manager = SessionManager::new(
        FakeFactory {
            remote: Arc::clone(&remote),
        },
        store,
        config,
    )
    .with_clock(clock.clone());

    Harness {
        manager,
        remote,
        clock,
    }
}
