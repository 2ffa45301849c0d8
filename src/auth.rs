//! User identity
//!
//! The pipeline never owns authentication; it only needs the current user id
//! and, when none is signed in yet, a single notification of the next
//! auth-state change.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::PipelineError;

/// Provider of the signed-in user's identity
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The currently signed-in user, if any
    fn current_user(&self) -> Option<String>;

    /// Wait for the next auth-state event and return the user it carries
    async fn next_auth_state(&self) -> Option<String>;
}

/// Fixed identity, for tools and tests
#[derive(Debug, Clone, Default)]
pub struct StaticAuth {
    user_id: Option<String>,
}

impl StaticAuth {
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    pub fn signed_out() -> Self {
        Self { user_id: None }
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    fn current_user(&self) -> Option<String> {
        self.user_id.clone()
    }

    async fn next_auth_state(&self) -> Option<String> {
        self.user_id.clone()
    }
}

/// Auth state driven by a watch channel, fed by the host's auth listener
#[derive(Debug, Clone)]
pub struct WatchAuth {
    rx: watch::Receiver<Option<String>>,
}

impl WatchAuth {
    /// Create the provider and the sender the host publishes sign-ins on
    pub fn channel(initial: Option<String>) -> (watch::Sender<Option<String>>, Self) {
        let (tx, rx) = watch::channel(initial);
        (tx, Self { rx })
    }
}

#[async_trait]
impl AuthProvider for WatchAuth {
    fn current_user(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    async fn next_auth_state(&self) -> Option<String> {
        let mut rx = self.rx.clone();
        rx.borrow_and_update();
        match rx.changed().await {
            Ok(()) => rx.borrow().clone(),
            Err(_) => None,
        }
    }
}

/// Resolve the user id, waiting once (bounded by `limit`) for a sign-in
pub async fn require_user(
    auth: &dyn AuthProvider,
    limit: Duration,
) -> Result<String, PipelineError> {
    if let Some(user_id) = auth.current_user() {
        return Ok(user_id);
    }

    tracing::info!("No authenticated user, waiting for auth state");
    let user = match tokio::time::timeout(limit, auth.next_auth_state()).await {
        Ok(user) => user,
        Err(_) => {
            tracing::warn!(timeout = ?limit, "Timed out waiting for authentication");
            None
        }
    };

    user.or_else(|| auth.current_user())
        .ok_or(PipelineError::AuthenticationRequired)
}
