use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

pub type EventPayload = Map<String, Value>;

/// Run events for one invocation, appended to a JSONL file.
///
/// Each line is one compact object: `type`, `invocation_id` and `ts`, then the
/// caller payload (which wins on key collisions). The file is opened on the
/// first event and kept open. A writer without a path builds events and
/// drops them.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    invocation_id: String,
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, invocation_id: impl Into<String>) -> Self {
        Self::with_sink(Some(path.into()), invocation_id.into())
    }

    pub fn disabled(invocation_id: impl Into<String>) -> Self {
        Self::with_sink(None, invocation_id.into())
    }

    /// Writer keyed by a fresh random invocation id.
    pub fn for_invocation(path: Option<PathBuf>) -> Self {
        Self::with_sink(path, Uuid::new_v4().to_string())
    }

    fn with_sink(path: Option<PathBuf>, invocation_id: String) -> Self {
        Self {
            inner: Arc::new(Inner {
                invocation_id,
                path,
                file: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn invocation_id(&self) -> &str {
        &self.inner.invocation_id
    }

    /// Builds the event and appends it to the sink, if any.
    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let event = self.envelope(event_type, payload);
        if let Some(path) = self.path() {
            self.append(path, &event)
                .with_context(|| format!("failed writing event to {}", path.display()))?;
        }
        Ok(event)
    }

    /// Like [`EventWriter::emit`], but a sink failure is only logged.
    pub fn record(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.emit(event_type, payload) {
            warn!(event = event_type, error = %format!("{err:#}"), "run event dropped");
        }
    }

    fn envelope(&self, event_type: &str, payload: EventPayload) -> Value {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::from(event_type));
        event.insert(
            "invocation_id".to_string(),
            Value::from(self.invocation_id()),
        );
        event.insert(
            "ts".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        event.extend(payload);
        Value::Object(event)
    }

    fn append(&self, path: &Path, event: &Value) -> anyhow::Result<()> {
        let line = serde_json::to_string(event)?;
        let mut file = self
            .inner
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        if file.is_none() {
            if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            *file = Some(OpenOptions::new().create(true).append(true).open(path)?);
        }
        if let Some(file) = file.as_mut() {
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}
