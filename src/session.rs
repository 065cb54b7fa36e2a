//! Session context shared by the network-facing components
//!
//! Holds the bearer credentials issued by the auth collaborator and announces when they
//! have been revoked, so the composing application can route back to sign-in.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Credentials handed over by the auth collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub token: String,
    pub user_id: Option<String>,
    pub is_admin: bool,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: None,
            is_admin: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    SignedOut,
    Active,
    /// Credentials were rejected; the caller must navigate to re-authentication
    ReauthenticationRequired,
}

pub struct SessionContext {
    credentials: RwLock<Option<Credentials>>,
    events: watch::Sender<SessionEvent>,
}

impl SessionContext {
    pub fn new() -> Arc<Self> {
        let (events, _) = watch::channel(SessionEvent::SignedOut);
        Arc::new(Self {
            credentials: RwLock::new(None),
            events,
        })
    }

    pub fn with_credentials(credentials: Credentials) -> Arc<Self> {
        let session = Self::new();
        session.sign_in(credentials);
        session
    }

    pub fn sign_in(&self, credentials: Credentials) {
        log::info!("Session started for user {:?}", credentials.user_id);
        *self.credentials.write().unwrap_or_else(|e| e.into_inner()) = Some(credentials);
        self.events.send_replace(SessionEvent::Active);
    }

    pub fn sign_out(&self) {
        self.credentials.write().unwrap_or_else(|e| e.into_inner()).take();
        self.events.send_replace(SessionEvent::SignedOut);
    }

    /// Drop the credentials after a 401 and request re-authentication
    pub fn invalidate(&self) {
        let had_credentials = self
            .credentials
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some();
        log::error!(
            "Credentials rejected by server (held credentials: {}), re-authentication required",
            had_credentials
        );
        self.events.send_replace(SessionEvent::ReauthenticationRequired);
    }

    pub fn token(&self) -> Option<String> {
        self.credentials
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|c| c.token.clone())
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    pub fn current_event(&self) -> SessionEvent {
        *self.events.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
