//! Append-only on-disk replay log for the Event Bus: one JSON object per
//! line, matching the `events/events.jsonl` layout.
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::event::error::EventSystemError;
use crate::event::types::Event;

/// Appends events to, and replays events from, a JSONL file. The
/// containing directory is created lazily on first append.
pub struct EventLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("path", &self.path).finish()
    }
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn opened_file(&self) -> Result<(), EventSystemError> {
        let mut guard = self.file.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(|source| EventSystemError::PersistenceFault {
                event_type: String::new(),
                path: self.path.display().to_string(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|source| EventSystemError::PersistenceFault {
                event_type: String::new(),
                path: self.path.display().to_string(),
                source,
            })?;
        *guard = Some(file);
        Ok(())
    }

    /// Append a single event as one JSON line.
    pub async fn append(&self, event: &Event) -> Result<(), EventSystemError> {
        self.opened_file().await?;
        let mut line = serde_json::to_string(event).map_err(|source| EventSystemError::ReplayCorrupt {
            path: self.path.display().to_string(),
            line: 0,
            source,
        })?;
        line.push('\n');

        let mut guard = self.file.lock().await;
        let file = guard.as_mut().expect("file opened above");
        file.write_all(line.as_bytes())
            .await
            .map_err(|source| EventSystemError::PersistenceFault {
                event_type: event.event_type.clone(),
                path: self.path.display().to_string(),
                source,
            })
    }

    /// Read every event currently on disk, in append order, for replay.
    /// Lines that fail to parse are skipped and logged rather than
    /// aborting the whole replay.
    pub async fn read_all(&self) -> Result<Vec<Event>, EventSystemError> {
        let file = match File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(EventSystemError::PersistenceFault {
                    event_type: String::new(),
                    path: self.path.display().to_string(),
                    source,
                })
            }
        };
        let mut reader = BufReader::new(file).lines();
        let mut events = Vec::new();
        let mut line_no = 0usize;
        while let Some(line) = reader
            .next_line()
            .await
            .map_err(|source| EventSystemError::PersistenceFault {
                event_type: String::new(),
                path: self.path.display().to_string(),
                source,
            })?
        {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => events.push(event),
                Err(source) => {
                    log::warn!(
                        "skipping corrupt replay log entry at {}:{line_no}: {source}",
                        self.path.display()
                    );
                }
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn append_then_read_all_roundtrips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = EventLog::new(dir.path().join("events").join("events.jsonl"));
        let e1 = Event::with_payload("PluginStarted", "registry", HashMap::new());
        log.append(&e1).await.expect("append 1");
        let e2 = Event::with_payload("PluginStopped", "registry", HashMap::new());
        log.append(&e2).await.expect("append 2");

        let events = log.read_all().await.expect("read_all");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "PluginStarted");
        assert_eq!(events[1].event_type, "PluginStopped");
    }

    #[tokio::test]
    async fn read_all_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = EventLog::new(dir.path().join("missing.jsonl"));
        let events = log.read_all().await.expect("read_all");
        assert!(events.is_empty());
    }
}
