//! Append-only collection log.
//!
//! Every committed transaction is one checksummed frame, so on replay a
//! transaction is either applied completely or not at all.

use crate::error::{Result, StoreError};
use crate::types::Document;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for collection logs.
const LOG_MAGIC: &[u8; 4] = b"PDC\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

const HEADER_SIZE: u64 = 5;

/// Upper bound on a single frame; anything larger is treated as corruption.
const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// A single write inside a transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WriteOp {
    Put(Document),
    Delete(String),
}

/// One frame of the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LogEntry {
    /// All writes of one committed transaction.
    Commit { ops: Vec<WriteOp> },
    /// Full collection contents, written by compaction.
    Snapshot { documents: Vec<Document> },
}

impl LogEntry {
    /// Apply this entry to an in-memory collection.
    pub fn apply(self, documents: &mut BTreeMap<String, Document>) -> Result<()> {
        match self {
            LogEntry::Commit { ops } => {
                for op in ops {
                    match op {
                        WriteOp::Put(doc) => {
                            let id = doc
                                .id()
                                .ok_or_else(|| {
                                    StoreError::Corruption("logged document has no id".into())
                                })?
                                .to_string();
                            documents.insert(id, doc);
                        }
                        WriteOp::Delete(id) => {
                            documents.remove(&id);
                        }
                    }
                }
            }
            LogEntry::Snapshot { documents: snapshot } => {
                documents.clear();
                for doc in snapshot {
                    if let Some(id) = doc.id() {
                        documents.insert(id.to_string(), doc);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Append-only log backing one collection.
pub struct CollectionLog {
    path: PathBuf,
    file: File,
    /// Offset one past the last good frame.
    size: u64,
    sync_on_commit: bool,
}

impl CollectionLog {
    /// Open or create a log, returning it with every intact entry in order.
    ///
    /// A torn or checksum-failing tail is discarded and the file truncated
    /// back to the last intact frame.
    pub fn open(path: impl AsRef<Path>, sync_on_commit: bool) -> Result<(Self, Vec<LogEntry>)> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_len = file.metadata()?.len();
        if file_len == 0 {
            file.write_all(LOG_MAGIC)?;
            file.write_all(&[LOG_VERSION])?;
            file.sync_all()?;

            let log = Self {
                path,
                file,
                size: HEADER_SIZE,
                sync_on_commit,
            };
            return Ok((log, Vec::new()));
        }

        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(file.try_clone()?);
        Self::read_header(&mut reader)?;

        let mut entries = Vec::new();
        let mut offset = HEADER_SIZE;
        while offset < file_len {
            match Self::read_frame(&mut reader) {
                Ok((entry, frame_len)) => {
                    entries.push(entry);
                    offset += frame_len;
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        offset,
                        error = %e,
                        "discarding incomplete log tail"
                    );
                    file.set_len(offset)?;
                    file.sync_all()?;
                    break;
                }
            }
        }

        debug!(path = %path.display(), entries = entries.len(), "replayed collection log");

        let log = Self {
            path,
            file,
            size: offset,
            sync_on_commit,
        };
        Ok((log, entries))
    }

    /// Append one entry. On failure the file is rolled back to its previous
    /// length so no partial frame survives.
    pub fn append(&mut self, entry: &LogEntry) -> Result<()> {
        let frame = Self::encode_frame(entry)?;

        let written = self
            .file
            .seek(SeekFrom::Start(self.size))
            .and_then(|_| self.file.write_all(&frame))
            .and_then(|_| self.file.flush())
            .and_then(|_| {
                if self.sync_on_commit {
                    self.file.sync_data()
                } else {
                    Ok(())
                }
            });

        if let Err(e) = written {
            let _ = self.file.set_len(self.size);
            return Err(e.into());
        }

        self.size += frame.len() as u64;
        Ok(())
    }

    /// Replace the whole log with a single entry (used by compaction).
    ///
    /// The new log is written to a sibling file and renamed into place.
    pub fn rewrite(&mut self, entry: &LogEntry) -> Result<()> {
        let frame = Self::encode_frame(entry)?;
        let tmp_path = self.path.with_extension("log.tmp");

        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(LOG_MAGIC)?;
            tmp.write_all(&[LOG_VERSION])?;
            tmp.write_all(&frame)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.size = HEADER_SIZE + frame.len() as u64;
        Ok(())
    }

    /// Force pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Current log size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    fn encode_frame(entry: &LogEntry) -> Result<Vec<u8>> {
        let encoded = rmp_serde::to_vec(entry)?;
        if encoded.len() > MAX_FRAME_SIZE {
            return Err(StoreError::Transaction(format!(
                "log entry of {} bytes exceeds the frame limit",
                encoded.len()
            )));
        }

        let mut frame = Vec::with_capacity(encoded.len() + 8);
        frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        frame.extend_from_slice(&encoded);
        frame.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());
        Ok(frame)
    }

    fn read_header(reader: &mut impl Read) -> Result<()> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid collection log magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != LOG_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported collection log version: {}",
                version[0]
            )));
        }
        Ok(())
    }

    fn read_frame(reader: &mut impl Read) -> Result<(LogEntry, u64)> {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(StoreError::Corruption("log frame too large".into()));
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => StoreError::Corruption("truncated log frame".into()),
            _ => StoreError::Io(e),
        })?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&encoded);
        if stored != computed {
            return Err(StoreError::Corruption(format!(
                "log checksum mismatch: expected {stored:#010x}, got {computed:#010x}"
            )));
        }

        let entry = rmp_serde::from_slice(&encoded)?;
        Ok((entry, len as u64 + 8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_value(value).unwrap()
    }

    fn replay(entries: Vec<LogEntry>) -> BTreeMap<String, Document> {
        let mut map = BTreeMap::new();
        for entry in entries {
            entry.apply(&mut map).unwrap();
        }
        map
    }

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("employees.log");

        {
            let (mut log, entries) = CollectionLog::open(&path, false).unwrap();
            assert!(entries.is_empty());

            log.append(&LogEntry::Commit {
                ops: vec![
                    WriteOp::Put(doc(json!({"id": "a", "name": "Alice"}))),
                    WriteOp::Put(doc(json!({"id": "b", "name": "Bob", "age": 41}))),
                ],
            })
            .unwrap();
            log.append(&LogEntry::Commit {
                ops: vec![WriteOp::Delete("a".to_string())],
            })
            .unwrap();
        }

        let (_log, entries) = CollectionLog::open(&path, false).unwrap();
        assert_eq!(entries.len(), 2);

        let map = replay(entries);
        assert_eq!(map.len(), 1);
        assert_eq!(map["b"].get("age"), Some(&json!(41)));
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("employees.log");

        let good_size = {
            let (mut log, _) = CollectionLog::open(&path, false).unwrap();
            log.append(&LogEntry::Commit {
                ops: vec![WriteOp::Put(doc(json!({"id": "a"})))],
            })
            .unwrap();
            log.size()
        };

        // Simulate a crash halfway through the next frame.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&64u32.to_le_bytes()).unwrap();
            file.write_all(&[1, 2, 3]).unwrap();
        }

        let (log, entries) = CollectionLog::open(&path, false).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(log.size(), good_size);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_size);
    }

    #[test]
    fn test_checksum_mismatch_stops_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("employees.log");

        {
            let (mut log, _) = CollectionLog::open(&path, false).unwrap();
            log.append(&LogEntry::Commit {
                ops: vec![WriteOp::Put(doc(json!({"id": "a"})))],
            })
            .unwrap();
        }

        // Flip the last byte (part of the checksum).
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let (log, entries) = CollectionLog::open(&path, false).unwrap();
        assert!(entries.is_empty());
        assert_eq!(log.size(), HEADER_SIZE);
    }

    #[test]
    fn test_rewrite_replaces_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("employees.log");

        {
            let (mut log, _) = CollectionLog::open(&path, true).unwrap();
            for i in 0..10 {
                log.append(&LogEntry::Commit {
                    ops: vec![WriteOp::Put(doc(json!({"id": "a", "rev": i})))],
                })
                .unwrap();
            }
            let before = log.size();
            log.rewrite(&LogEntry::Snapshot {
                documents: vec![doc(json!({"id": "a", "rev": 9}))],
            })
            .unwrap();
            assert!(log.size() < before);
        }

        let (_log, entries) = CollectionLog::open(&path, false).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(replay(entries)["a"].get("rev"), Some(&json!(9)));
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("employees.log");
        fs::write(&path, b"not a log").unwrap();

        assert!(matches!(
            CollectionLog::open(&path, false),
            Err(StoreError::InvalidFormat(_))
        ));
    }
}
