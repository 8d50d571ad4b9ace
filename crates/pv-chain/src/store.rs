// store.rs — Storage interface and the two bundled backends.
//
// The chain engine only needs three operations from a backend: append one
// record, read a session back in order, and list sessions. Anything that can
// do that atomically per record (a KV store, a SQL table, a graph DB) can
// back the ledger.
//
// `JsonlStore` keeps one JSON Lines file per session: one JSON object per
// line, opened in append mode, flushed and synced after every record.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::StorageError;
use crate::record::{ProvenanceRecord, SessionId};

/// Append-only record storage keyed by session.
///
/// Implementations must make `append` atomic: either the whole record is
/// durably committed, or nothing is and an error is returned.
pub trait RecordStore: Send + Sync {
    fn append(&self, session_id: &str, record: &ProvenanceRecord) -> Result<(), StorageError>;

    /// All records of a session in sequence order; empty for unknown sessions.
    fn read_all(&self, session_id: &str) -> Result<Vec<ProvenanceRecord>, StorageError>;

    fn list_sessions(&self) -> Result<Vec<SessionId>, StorageError>;
}

/// In-process store, used by tests and short-lived embeddings.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionId, Vec<ProvenanceRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn append(&self, session_id: &str, record: &ProvenanceRecord) -> Result<(), StorageError> {
        let mut sessions = self.sessions.write().unwrap_or_else(|poisoned| {
            tracing::error!("memory store lock poisoned during append; recovering");
            poisoned.into_inner()
        });
        sessions
            .entry(session_id.to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn read_all(&self, session_id: &str) -> Result<Vec<ProvenanceRecord>, StorageError> {
        let sessions = self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(sessions.get(session_id).cloned().unwrap_or_default())
    }

    fn list_sessions(&self) -> Result<Vec<SessionId>, StorageError> {
        let sessions = self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut ids: Vec<SessionId> = sessions.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// One JSONL file per session under a directory.
#[derive(Debug, Clone)]
pub struct JsonlStore {
    dir: PathBuf,
}

impl JsonlStore {
    /// Open (or create) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StorageError::OpenFailed {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Path of the file backing `session_id`.
    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.jsonl", encode_file_stem(session_id)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl RecordStore for JsonlStore {
    fn append(&self, session_id: &str, record: &ProvenanceRecord) -> Result<(), StorageError> {
        // Serialize first so a bad record never produces a partial line.
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let path = self.session_path(session_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| StorageError::OpenFailed {
                path: path.clone(),
                source,
            })?;

        // A failed write must not leave a partial line for the retry to
        // append after.
        let start = file.metadata()?.len();
        write_line(&mut file, line.as_bytes(), |f| f.set_len(start))?;
        file.sync_data()?;
        Ok(())
    }

    fn read_all(&self, session_id: &str) -> Result<Vec<ProvenanceRecord>, StorageError> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path).map_err(|source| StorageError::OpenFailed {
            path: path.clone(),
            source,
        })?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }

        Ok(records)
    }

    fn list_sessions(&self) -> Result<Vec<SessionId>, StorageError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StorageError::OpenFailed {
            path: self.dir.clone(),
            source,
        })?;
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                if let Some(id) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(decode_file_stem)
                {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Write one complete line, or undo whatever part of it was written.
fn write_line<W: Write>(
    writer: &mut W,
    line: &[u8],
    rollback: impl FnOnce(&mut W) -> io::Result<()>,
) -> io::Result<()> {
    if let Err(err) = writer.write_all(line).and_then(|()| writer.flush()) {
        if let Err(rollback_err) = rollback(writer) {
            tracing::error!(error = %rollback_err, "could not remove partial record line");
        }
        return Err(err);
    }
    Ok(())
}

/// Map an id onto a safe file stem: `[A-Za-z0-9_-]` pass through, every
/// other byte becomes `.XX` (hex). Distinct ids never share a stem.
pub fn encode_file_stem(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!(".{:02x}", byte));
        }
    }
    out
}

/// Inverse of [`encode_file_stem`]; `None` for stems it cannot produce.
pub fn decode_file_stem(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'.' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
