// Storage module - durable session recording
//
// This module is responsible for:
// 1. Appending each Sample to a JSON Lines session file, synced to disk
// 2. Keeping samples that failed to persist and retrying them later
// 3. Reloading a session file, for resuming inspection or reporting

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::session::{Sample, Session, SessionHeader};

/// Errors that can occur while persisting or loading a session
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("session file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("session file {0} already exists; pass --overwrite to replace it or --report-only to report on it")]
    AlreadyExists(PathBuf),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("session file {path} is corrupt at line {line}: {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// One line of the session file
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum Record {
    Session(SessionHeader),
    Sample(Sample),
}

/// Append-only recorder for one session
///
/// Owns the in-memory Session during collection. Every `append` writes
/// all not-yet-persisted samples and syncs the file before returning, so
/// a crash loses at most the sample being appended.
///
/// # File Format
/// ```text
/// {"record":"session","site_name":"Test Site","started_at":"2024-01-15T10:30:00Z",...}
/// {"record":"sample","timestamp":"2024-01-15T10:30:00Z","readings":{"download":87.1,"rsrp":null}}
/// ```
pub struct SessionRecorder {
    path: PathBuf,

    session: Session,

    /// Number of samples known to be on disk
    persisted: usize,

    /// File length after the last successful sync
    durable_len: u64,
}

impl SessionRecorder {
    /// Creates a new session file
    ///
    /// Fails with `AlreadyExists` rather than truncating an earlier
    /// session. The header record is written and synced before returning.
    pub fn create(path: &Path, header: SessionHeader) -> Result<Self, StorageError> {
        Self::open_new(path, header, false)
    }

    /// Creates a session file, discarding any existing one at `path`
    pub fn replace(path: &Path, header: SessionHeader) -> Result<Self, StorageError> {
        Self::open_new(path, header, true)
    }

    fn open_new(path: &Path, header: SessionHeader, replace: bool) -> Result<Self, StorageError> {
        let io_err = |source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut line = serde_json::to_vec(&Record::Session(header.clone()))?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .write(true)
            .create(replace)
            .truncate(replace)
            .create_new(!replace)
            .open(path)
            .map_err(|source| match source.kind() {
                ErrorKind::AlreadyExists => StorageError::AlreadyExists(path.to_path_buf()),
                _ => io_err(source),
            })?;
        file.write_all(&line).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;

        info!("Recording session to {}", path.display());

        Ok(SessionRecorder {
            path: path.to_path_buf(),
            session: Session::new(header),
            persisted: 0,
            durable_len: line.len() as u64,
        })
    }

    /// Adds a sample and persists every pending sample
    ///
    /// # Returns
    /// * `Ok(())` - The sample and all earlier ones are on disk
    /// * `Err(StorageError)` - Persisting failed; the sample is kept in
    ///   memory and retried on the next `append` or `flush`
    pub fn append(&mut self, sample: Sample) -> Result<(), StorageError> {
        self.session.push(sample);
        self.flush()
    }

    /// Persists samples left over from earlier failed appends
    pub fn flush(&mut self) -> Result<(), StorageError> {
        let pending = &self.session.samples()[self.persisted..];
        if pending.is_empty() {
            return Ok(());
        }

        let mut buffer = Vec::new();
        for sample in pending {
            serde_json::to_writer(&mut buffer, &Record::Sample(sample.clone()))?;
            buffer.push(b'\n');
        }
        let count = pending.len();

        self.write_at_durable_end(&buffer).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })?;

        self.persisted += count;
        self.durable_len += buffer.len() as u64;

        debug!(
            "Persisted {} sample(s) to '{}' ({} total)",
            count,
            self.path.display(),
            self.persisted
        );

        Ok(())
    }

    /// Writes after the last durable byte, discarding any torn tail
    fn write_at_durable_end(&self, buffer: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(self.durable_len)?;
        file.seek(SeekFrom::Start(self.durable_len))?;
        file.write_all(buffer)?;
        file.sync_data()
    }

    /// Samples held in memory but not yet on disk
    pub fn pending(&self) -> usize {
        self.session.len() - self.persisted
    }

    #[cfg(test)]
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ends recording and hands the session off
    pub fn into_session(self) -> Session {
        self.session
    }

    /// Reads a session file back
    ///
    /// A malformed final line is treated as a write torn by a crash and
    /// skipped; malformed lines anywhere else are corruption.
    pub fn load(path: &Path) -> Result<Session, StorageError> {
        let io_err = |source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        };
        let corrupt = |line: usize, reason: String| StorageError::Corrupt {
            path: path.to_path_buf(),
            line,
            reason,
        };

        let file = File::open(path).map_err(io_err)?;
        // Split on raw bytes: a torn tail may end inside a UTF-8 sequence
        let lines = BufReader::new(file)
            .split(b'\n')
            .collect::<Result<Vec<Vec<u8>>, _>>()
            .map_err(io_err)?;

        fn is_blank(line: &[u8]) -> bool {
            line.iter().all(u8::is_ascii_whitespace)
        }
        let last_line = lines.iter().rposition(|l| !is_blank(l)).map(|i| i + 1);
        let mut session: Option<Session> = None;

        for (index, line) in lines.iter().enumerate() {
            let line_no = index + 1;
            if is_blank(line) {
                continue;
            }

            let parsed = std::str::from_utf8(line)
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str::<Record>(text).map_err(|e| e.to_string()));

            let record = match parsed {
                Ok(record) => record,
                Err(e) if Some(line_no) == last_line && session.is_some() => {
                    warn!(
                        "Ignoring incomplete final record in {} (line {}): {}",
                        path.display(),
                        line_no,
                        e
                    );
                    break;
                }
                Err(e) => return Err(corrupt(line_no, e)),
            };

            match record {
                Record::Session(header) => {
                    if session.is_some() {
                        return Err(corrupt(line_no, "duplicate session header".to_string()));
                    }
                    session = Some(Session::new(header));
                }
                Record::Sample(sample) => match session.as_mut() {
                    Some(session) => session.push(sample),
                    None => {
                        return Err(corrupt(line_no, "sample before session header".to_string()))
                    }
                },
            }
        }

        let session = session.ok_or_else(|| corrupt(1, "missing session header".to_string()))?;

        info!(
            "Loaded session '{}' with {} sample(s) from {}",
            session.header.site_name,
            session.len(),
            path.display()
        );

        Ok(session)
    }
}
