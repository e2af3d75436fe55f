//! Implementation of the message log using files on disk.
//!
//! Each pending message is stored as a single CBOR file named after its
//! zero-padded serial, so a directory listing sorted by name is already in
//! replay order. Removing a message deletes its file.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use courier_log::{MessageLog, PersistedMessage};
use tokio::fs;
use tokio::io;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const RECORD_EXTENSION: &str = "cbor";
const TEMP_EXTENSION: &str = "tmp";

/// Options for creating a new `FsMessageLog`.
#[derive(Clone, Debug)]
pub struct FsMessageLogOptions {
    /// Directory holding one file per pending message. Created on open.
    pub dir: PathBuf,
}

#[derive(Debug, Default)]
struct State {
    /// message id -> serial
    index: HashMap<String, u64>,
    last_serial: u64,
    open: bool,
}

/// Message log using files on disk.
#[derive(Clone, Debug)]
pub struct FsMessageLog {
    dir: PathBuf,
    state: Arc<Mutex<State>>,
}

impl FsMessageLog {
    /// Creates a new `FsMessageLog` rooted at the configured directory.
    #[must_use]
    pub fn new(FsMessageLogOptions { dir }: FsMessageLogOptions) -> Self {
        Self {
            dir,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn record_path(&self, serial: u64) -> PathBuf {
        self.dir.join(format!("{serial:020}.{RECORD_EXTENSION}"))
    }

    async fn read_record(path: &Path) -> Result<PersistedMessage, Error> {
        let bytes = fs::read(path)
            .await
            .map_err(|e| Error::Io("error reading record", e))?;

        ciborium::de::from_reader(bytes.as_slice())
            .map_err(|e| Error::Deserialize(path.to_path_buf(), e.to_string()))
    }
}

#[async_trait]
impl MessageLog for FsMessageLog {
    type Error = Error;

    async fn open(&self) -> Result<Vec<(u64, PersistedMessage)>, Self::Error> {
        let mut state = self.state.lock().await;

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Io("error creating directory", e))?;

        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::Io("error reading directory", e))?;
        let mut records = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Io("error reading directory entry", e))?
        {
            let path = entry.path();
            let extension = path.extension().and_then(|ext| ext.to_str());

            if extension == Some(TEMP_EXTENSION) {
                // Left behind by an append that never completed
                fs::remove_file(&path)
                    .await
                    .map_err(|e| Error::Io("error removing partial record", e))?;
                continue;
            }

            let serial = match (
                extension,
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| stem.parse::<u64>().ok()),
            ) {
                (Some(RECORD_EXTENSION), Some(serial)) => serial,
                _ => {
                    warn!("ignoring unexpected file in message log: {}", path.display());
                    continue;
                }
            };

            records.push((serial, Self::read_record(&path).await?));
        }

        records.sort_by_key(|(serial, _)| *serial);

        state.index = records
            .iter()
            .map(|(serial, message)| (message.message_id.clone(), *serial))
            .collect();
        state.last_serial = records.last().map_or(0, |(serial, _)| *serial);
        state.open = true;

        info!(
            "opened message log at {} with {} records",
            self.dir.display(),
            records.len()
        );

        Ok(records)
    }

    async fn append(&self, message: &PersistedMessage) -> Result<u64, Self::Error> {
        let mut state = self.state.lock().await;
        if !state.open {
            return Err(Error::Closed);
        }

        let mut bytes = Vec::new();
        ciborium::ser::into_writer(message, &mut bytes)
            .map_err(|e| Error::Serialize(e.to_string()))?;

        let serial = state.last_serial + 1;
        let path = self.record_path(serial);
        let temp_path = path.with_extension(TEMP_EXTENSION);

        fs::write(&temp_path, &bytes)
            .await
            .map_err(|e| Error::Io("error writing record", e))?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| Error::Io("error committing record", e))?;

        state.last_serial = serial;
        if let Some(previous) = state.index.insert(message.message_id.clone(), serial) {
            let previous_path = self.record_path(previous);
            if let Err(e) = fs::remove_file(&previous_path).await {
                warn!(
                    "failed to remove superseded record {}: {e}",
                    previous_path.display()
                );
            }
        }

        debug!("appended message {} as serial {}", message.message_id, serial);

        Ok(serial)
    }

    async fn remove(&self, message_id: &str) -> Result<(), Self::Error> {
        let mut state = self.state.lock().await;
        if !state.open {
            return Err(Error::Closed);
        }

        let Some(serial) = state.index.remove(message_id) else {
            return Ok(());
        };

        match fs::remove_file(self.record_path(serial)).await {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io("error deleting record", e)),
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        let mut state = self.state.lock().await;
        state.index.clear();
        state.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use courier_identity::Identity;
    use tempfile::tempdir;

    fn message(id: &str) -> PersistedMessage {
        let mut params = HashMap::new();
        params.insert("priority".to_string(), "high".to_string());

        PersistedMessage {
            message_id: id.to_string(),
            sender: Identity::new(101),
            receiver: Identity::new(202),
            needs_receipt: true,
            subject: format!("subject {id}"),
            params,
        }
    }

    fn log_at(dir: &Path) -> FsMessageLog {
        FsMessageLog::new(FsMessageLogOptions {
            dir: dir.to_path_buf(),
        })
    }

    #[tokio::test]
    async fn test_open_empty_directory() {
        let dir = tempdir().unwrap();
        let log = log_at(&dir.path().join("nested"));

        assert!(log.open().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_records_survive_a_new_instance() {
        let dir = tempdir().unwrap();

        let log = log_at(dir.path());
        log.open().await.unwrap();
        for id in ["a", "b", "c"] {
            log.append(&message(id)).await.unwrap();
        }
        log.remove("b").await.unwrap();
        log.close().await.unwrap();

        let reopened = log_at(dir.path());
        let records = reopened.open().await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].1, message("a"));
        assert_eq!(records[1].1, message("c"));
        assert!(records[0].0 < records[1].0);
    }

    #[tokio::test]
    async fn test_serials_resume_after_highest() {
        let dir = tempdir().unwrap();

        let log = log_at(dir.path());
        log.open().await.unwrap();
        log.append(&message("a")).await.unwrap();
        let last = log.append(&message("b")).await.unwrap();
        log.close().await.unwrap();

        let reopened = log_at(dir.path());
        reopened.open().await.unwrap();
        let next = reopened.append(&message("c")).await.unwrap();

        assert_eq!(next, last + 1);
    }

    #[tokio::test]
    async fn test_remove_unknown_is_noop() {
        let dir = tempdir().unwrap();
        let log = log_at(dir.path());
        log.open().await.unwrap();

        log.remove("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_record_fails_open() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("00000000000000000001.cbor"), b"\xff\x00garbage").unwrap();

        let log = log_at(dir.path());

        assert_matches!(log.open().await, Err(Error::Deserialize(_, _)));
    }

    #[tokio::test]
    async fn test_partial_records_are_discarded() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("00000000000000000007.tmp"), b"partial").unwrap();

        let log = log_at(dir.path());

        assert!(log.open().await.unwrap().is_empty());
        assert!(!dir.path().join("00000000000000000007.tmp").exists());
    }

    #[tokio::test]
    async fn test_reappend_replaces_record() {
        let dir = tempdir().unwrap();
        let log = log_at(dir.path());
        log.open().await.unwrap();

        let first = log.append(&message("a")).await.unwrap();
        let second = log.append(&message("a")).await.unwrap();

        assert!(!log.record_path(first).exists());
        assert!(log.record_path(second).exists());
    }

    #[tokio::test]
    async fn test_superseded_record_removal_failure_keeps_append() {
        let dir = tempdir().unwrap();
        let log = log_at(dir.path());
        log.open().await.unwrap();

        let first = log.append(&message("a")).await.unwrap();

        // A directory in place of the old record cannot be removed as a file
        std::fs::remove_file(log.record_path(first)).unwrap();
        std::fs::create_dir(log.record_path(first)).unwrap();

        let second = log.append(&message("a")).await.unwrap();

        assert_eq!(second, first + 1);
        assert!(log.record_path(second).exists());
        assert!(log.record_path(first).is_dir());
    }

    #[tokio::test]
    async fn test_closed_log_rejects_writes() {
        let dir = tempdir().unwrap();
        let log = log_at(dir.path());

        assert_matches!(log.append(&message("a")).await, Err(Error::Closed));
    }
}
