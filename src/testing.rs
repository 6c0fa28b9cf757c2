//! Test doubles shared by unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use url::Url;

use crate::AppState;
use crate::auth::PasswordVerifier;
use crate::clock::Clock;
use crate::config::{self, Configuration};
use crate::crypto::{Argon2Hasher, CredentialHasher};
use crate::mail::{Letter, Notifier, NotifyError};
use crate::token::JwtSessions;
use crate::user::{AccountService, EmailAddress, Links, MemoryStore};

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Notifier keeping every letter in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(EmailAddress, Letter)>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    /// Make every following send fail, or succeed again.
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(EmailAddress, Letter)> {
        self.sent.lock().unwrap().clone()
    }

    /// Token embedded in the last link sent.
    pub fn last_token(&self) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        let (_, letter) = sent.last()?;
        let start = letter.body.find("token=")? + "token=".len();
        let token = letter.body[start..]
            .split_whitespace()
            .next()?
            .to_owned();
        Some(token)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        to: &EmailAddress,
        letter: &Letter,
    ) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            // Any lettre error will do.
            let err = "broken".parse::<lettre::Address>().unwrap_err();
            return Err(NotifyError::Address(err));
        }

        self.sent
            .lock()
            .unwrap()
            .push((to.clone(), letter.clone()));
        Ok(())
    }
}

/// Cheap Argon2 parameters.
pub fn hasher() -> Arc<dyn CredentialHasher> {
    Arc::new(
        Argon2Hasher::new(Some(config::Argon2 {
            memory_cost: 8,
            iterations: 1,
            parallelism: 1,
            hash_length: 32,
        }))
        .unwrap(),
    )
}

/// Account service wired to in-memory doubles.
pub struct Harness {
    pub service: Arc<AccountService>,
    pub store: MemoryStore,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub hasher: Arc<dyn CredentialHasher>,
}

pub fn harness() -> Harness {
    let store = MemoryStore::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = Arc::new(ManualClock::new());
    let hasher = hasher();
    let links =
        Links::new(&Url::parse("http://localhost:8080/").unwrap()).unwrap();

    let service = AccountService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::clone(&hasher),
        notifier.clone(),
        clock.clone(),
        links,
    );

    Harness {
        service: Arc::new(service),
        store,
        notifier,
        clock,
        hasher,
    }
}

/// Configuration used by router tests.
pub fn configuration() -> Configuration {
    Configuration {
        name: "onboard".into(),
        url: "http://localhost:8080".into(),
        session: config::Session {
            secret: Some("test-secret".into()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Router state backed by a [`Harness`].
pub fn state(h: &Harness) -> AppState {
    let config = configuration();
    let sessions = JwtSessions::new(
        &config.url,
        "test-secret",
        config.session.ttl_minutes,
    );

    AppState {
        config: Arc::new(config),
        accounts: h.service.clone(),
        verifier: Arc::new(
            PasswordVerifier::new(h.service.clone(), h.hasher.clone())
                .unwrap(),
        ),
        sessions: Arc::new(sessions),
        metrics: None,
    }
}

/// Collect a response body as JSON.
pub async fn body_json(
    response: axum::http::Response<axum::body::Body>,
) -> serde_json::Value {
    use http_body_util::BodyExt;

    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}
