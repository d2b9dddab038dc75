//! Session factory and registry.
//!
//! Thin layer over [`Session::start`]: routing by backend kind happens in
//! the driver factory, this just tracks live sessions by id.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::session::Session;

#[derive(Default)]
pub struct Provider {
    sessions: Mutex<HashMap<Uuid, Arc<Session>>>,
}

impl Provider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session and register it. Start failures leave no entry.
    pub async fn start_session(&self, config: SessionConfig) -> Result<Arc<Session>> {
        let session = Session::start(config).await?;
        self.sessions
            .lock()
            .await
            .insert(session.id(), Arc::clone(&session));
        Ok(session)
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(&id).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().await.values().cloned().collect()
    }

    /// Close and deregister. Unknown ids are a no-op.
    pub async fn close_session(&self, id: Uuid) -> Result<()> {
        let session = self.sessions.lock().await.remove(&id);
        if let Some(session) = session {
            session.close().await?;
        }
        Ok(())
    }

    /// Close everything, e.g. at host shutdown.
    pub async fn close_all(&self) -> Result<()> {
        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        for (_, session) in sessions {
            session.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BackendKind, SessionStatus};

    #[tokio::test]
    async fn registry_tracks_and_closes_sessions() {
        let provider = Provider::new();
        let session = provider
            .start_session(SessionConfig::new(BackendKind::Mock))
            .await
            .unwrap();
        let id = session.id();
        assert!(provider.get(id).await.is_some());
        assert_eq!(provider.list().await.len(), 1);

        provider.close_session(id).await.unwrap();
        assert!(provider.get(id).await.is_none());
        assert_eq!(session.status(), SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn failed_start_registers_nothing() {
        let provider = Provider::new();
        let result = provider
            .start_session(SessionConfig::new(BackendKind::Rdp))
            .await;
        assert!(result.is_err());
        assert!(provider.list().await.is_empty());
    }
}
