use sab_contracts::error::{PipelineError, Result};
use serde_json::Value;
use tracing::{debug, info};

use crate::error_chain_text;
use crate::transport::ImageService;

/// Opaque session identifier issued by the generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: String,
    reused: bool,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True when the caller supplied the id and no session was created.
    pub fn reused(&self) -> bool {
        self.reused
    }
}

pub struct SessionManager<'a> {
    service: &'a dyn ImageService,
}

impl<'a> SessionManager<'a> {
    pub fn new(service: &'a dyn ImageService) -> Self {
        Self { service }
    }

    /// Returns `existing_id` untouched when it is non-empty, otherwise asks
    /// the service for a new session. Caller-supplied ids are not validated.
    pub fn acquire(&self, existing_id: Option<&str>) -> Result<Session> {
        if let Some(id) = existing_id.filter(|value| !value.is_empty()) {
            debug!(session_id = id, "reusing caller-supplied session");
            return Ok(Session {
                id: id.to_string(),
                reused: true,
            });
        }

        let response = self
            .service
            .new_session()
            .map_err(|err| PipelineError::Session(error_chain_text(&err, 1024)))?;
        let id = response
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                PipelineError::Session(format!("response has no session_id: {response}"))
            })?;
        info!(session_id = id, "acquired new session");
        Ok(Session {
            id: id.to_string(),
            reused: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::FakeImageService;

    #[test]
    fn existing_id_is_returned_without_network_call() -> anyhow::Result<()> {
        let service = FakeImageService::new();
        let manager = SessionManager::new(&service);
        for id in ["existing_session", "x", " padded "] {
            let session = manager.acquire(Some(id))?;
            assert_eq!(session.id(), id);
            assert!(session.reused());
        }
        assert!(service.calls().is_empty());
        Ok(())
    }

    #[test]
    fn missing_or_empty_id_creates_session() -> anyhow::Result<()> {
        let service = FakeImageService::new();
        let manager = SessionManager::new(&service);
        assert_eq!(manager.acquire(None)?.id(), "fresh-session");
        let session = manager.acquire(Some(""))?;
        assert_eq!(session.id(), "fresh-session");
        assert!(!session.reused());
        assert_eq!(service.count("new_session"), 2);
        Ok(())
    }

    #[test]
    fn transport_failure_is_session_error() {
        let mut service = FakeImageService::new();
        service.fail_session = true;
        let err = SessionManager::new(&service).acquire(None).err();
        assert!(matches!(err, Some(PipelineError::Session(message)) if message.contains("connection refused")));
    }

    #[test]
    fn response_without_identifier_is_session_error() {
        let mut service = FakeImageService::new();
        service.session_response = json!({"error": "no permission"});
        let err = SessionManager::new(&service).acquire(None).err();
        assert_eq!(err.map(|err| err.kind()), Some("SessionError"));

        service.session_response = json!({"session_id": ""});
        let err = SessionManager::new(&service).acquire(None).err();
        assert_eq!(err.map(|err| err.kind()), Some("SessionError"));
    }
}
