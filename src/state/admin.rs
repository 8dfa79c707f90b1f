//! Single-broadcaster arbitration.
//!
//! At most one admin session exists. A refresh by the same user within the
//! grace window reattaches seamlessly; anyone else needs an explicit
//! takeover, which warns the newcomer and force-disconnects the incumbent.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::state::SharedState;

/// How long a disconnected admin's identity is remembered.
pub const ADMIN_GRACE: Duration = Duration::from_secs(5);

/// The at-most-one broadcaster session.
struct AdminSession {
    /// Live connection, `None` while inside the grace window.
    connection_id: Option<Uuid>,
    user_id: String,
    session_id: String,
    grace: Option<JoinHandle<()>>,
}

/// Result of an admin connection attempting to become the broadcaster.
#[derive(Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The connection is now the broadcaster. `reattached` when the same
    /// user returned within the grace window.
    Installed { reattached: bool },
    /// Another broadcaster is present and no takeover was requested.
    Rejected,
    /// Takeover granted; `evicted` names the incumbent connection to close,
    /// when one was still attached.
    Takeover { evicted: Option<Uuid> },
}

/// Guards the single [`AdminSession`].
#[derive(Default)]
pub struct AdminArbiter {
    session: Mutex<Option<AdminSession>>,
}

impl AdminArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the upgrade protocol for an arriving admin connection.
    pub async fn claim(
        &self,
        connection_id: Uuid,
        user_id: &str,
        session_id: &str,
        takeover: bool,
    ) -> ClaimOutcome {
        let mut guard = self.session.lock().await;

        match guard.as_mut() {
            None => {
                *guard = Some(AdminSession {
                    connection_id: Some(connection_id),
                    user_id: user_id.to_string(),
                    session_id: session_id.to_string(),
                    grace: None,
                });
                info!(user = %user_id, "admin installed");
                ClaimOutcome::Installed { reattached: false }
            }
            Some(session) if session.connection_id.is_none() && session.user_id == user_id => {
                if let Some(grace) = session.grace.take() {
                    grace.abort();
                }
                session.connection_id = Some(connection_id);
                session.session_id = session_id.to_string();
                info!(user = %user_id, "admin reattached within grace window");
                ClaimOutcome::Installed { reattached: true }
            }
            Some(_) if !takeover => ClaimOutcome::Rejected,
            Some(session) => {
                let evicted = session.connection_id;
                if let Some(grace) = session.grace.take() {
                    grace.abort();
                }
                *guard = Some(AdminSession {
                    connection_id: Some(connection_id),
                    user_id: user_id.to_string(),
                    session_id: session_id.to_string(),
                    grace: None,
                });
                info!(user = %user_id, "admin takeover");
                ClaimOutcome::Takeover { evicted }
            }
        }
    }

    /// Whether `connection_id` is the currently attached broadcaster. All
    /// admin-intent socket messages are gated on this.
    pub async fn is_active(&self, connection_id: Uuid) -> bool {
        let guard = self.session.lock().await;
        guard
            .as_ref()
            .is_some_and(|session| session.connection_id == Some(connection_id))
    }

    /// Handle a connection going away. When it was the broadcaster, the
    /// session enters the grace window; after [`ADMIN_GRACE`] without a
    /// reattach the identity and the broadcast caches are cleared.
    /// Returns whether the connection was the broadcaster.
    pub async fn on_disconnect(&self, state: SharedState, connection_id: Uuid) -> bool {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return false;
        };
        if session.connection_id != Some(connection_id) {
            return false;
        }

        session.connection_id = None;
        let user_id = session.user_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(ADMIN_GRACE).await;
            if state.arbiter().try_expire(&user_id).await {
                state.clear_broadcast_caches().await;
                info!(user = %user_id, "admin grace window expired");
            }
        });
        if let Some(old) = session.grace.replace(handle) {
            old.abort();
        }
        true
    }

    /// Clear the session when it still belongs to `user_id` and no connection
    /// reattached. Returns whether anything was cleared.
    async fn try_expire(&self, user_id: &str) -> bool {
        let mut guard = self.session.lock().await;
        match guard.as_ref() {
            Some(session) if session.connection_id.is_none() && session.user_id == user_id => {
                *guard = None;
                true
            }
            _ => false,
        }
    }
}
