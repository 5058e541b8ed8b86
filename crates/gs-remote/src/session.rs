// session.rs: The signed-in user's credentials.
//
// A Session is shared (behind an Arc) by the HTTP client, which reads the
// credentials for every request and signs out on 401, and by the sync
// engine, which listens for sign-out to drop its cache. Sign-in/out events
// go out on a broadcast channel; subscribers drop their receiver to stop
// listening.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Username and API token for the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub access_token: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            access_token: access_token.into(),
        }
    }
}

/// Session lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { username: String },
    SignedOut,
}

/// Shared, thread-safe holder of the current credentials.
pub struct Session {
    credentials: RwLock<Option<Credentials>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// A session with nobody signed in.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            credentials: RwLock::new(None),
            events,
        }
    }

    /// A session that starts out signed in (e.g. credentials loaded from config).
    pub fn signed_in(credentials: Credentials) -> Self {
        let session = Self::new();
        session.store(Some(credentials));
        session
    }

    pub fn sign_in(&self, credentials: Credentials) {
        let username = credentials.username.clone();
        self.store(Some(credentials));
        tracing::info!("signed in as {}", username);
        // No subscribers is fine.
        let _ = self.events.send(SessionEvent::SignedIn { username });
    }

    /// Drop the credentials and tell every subscriber.
    ///
    /// Idempotent in effect, but each call broadcasts `SignedOut` so that
    /// listeners always reset even if they missed an earlier event.
    pub fn sign_out(&self) {
        self.store(None);
        tracing::info!("signed out");
        let _ = self.events.send(SessionEvent::SignedOut);
    }

    pub fn credentials(&self) -> Option<Credentials> {
        match self.credentials.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn username(&self) -> Option<String> {
        self.credentials().map(|c| c.username)
    }

    pub fn access_token(&self) -> Option<String> {
        self.credentials().map(|c| c.access_token)
    }

    pub fn is_signed_in(&self) -> bool {
        self.credentials().is_some()
    }

    /// Subscribe to sign-in/out events. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn store(&self, credentials: Option<Credentials>) {
        match self.credentials.write() {
            Ok(mut guard) => *guard = credentials,
            Err(poisoned) => *poisoned.into_inner() = credentials,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
