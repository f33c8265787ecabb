//! Append-only durability log for the embedded index.
//!
//! Every index mutation is appended here before the in-memory structures
//! change, and the log is replayed on open. Each entry is framed as
//! `[payload_len u32 LE][crc32 u32 LE][payload]` behind an 8-byte
//! magic/version header. A torn or corrupt tail (a crash mid-append) is
//! dropped at replay time and truncated away so later appends cannot land
//! after garbage.
//!
//! The log grows without bound under writes; [`IndexLog::rewrite`] compacts
//! it by writing the live state to a fresh file and swapping it in with a
//! rename.

use crate::config::SyncMode;
use crate::error::{FmError, Result};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::warn;

/// Index log file magic bytes.
const LOG_MAGIC: [u8; 4] = *b"FMIX";

/// Index log format version.
const LOG_VERSION: u16 = 1;

/// Header size: magic + version + reserved.
const HEADER_LEN: usize = 8;

/// Entry frame overhead: length + checksum.
const FRAME_LEN: usize = 8;

/// Index log file name.
pub const LOG_FILE_NAME: &str = "index.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum LogOp {
    SetAdd = 1,
    SetRemove = 2,
    HashSet = 3,
}

/// A single replayable index mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    /// Add a member to an ordered set.
    SetAdd {
        /// Set key.
        key: String,
        /// Member, which is also the score.
        member: i64,
    },
    /// Remove a member from an ordered set.
    SetRemove {
        /// Set key.
        key: String,
        /// Member, which is also the score.
        member: i64,
    },
    /// Set one hash field.
    HashSet {
        /// Hash key.
        key: String,
        /// Field name.
        field: String,
        /// Field value.
        value: String,
    },
}

impl LogEntry {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(32);
        match self {
            Self::SetAdd { key, member } => {
                bytes.push(LogOp::SetAdd as u8);
                push_str(&mut bytes, key);
                bytes.extend_from_slice(&member.to_le_bytes());
            }
            Self::SetRemove { key, member } => {
                bytes.push(LogOp::SetRemove as u8);
                push_str(&mut bytes, key);
                bytes.extend_from_slice(&member.to_le_bytes());
            }
            Self::HashSet { key, field, value } => {
                bytes.push(LogOp::HashSet as u8);
                push_str(&mut bytes, key);
                push_str(&mut bytes, field);
                bytes.extend_from_slice(&(value.len() as u32).to_le_bytes());
                bytes.extend_from_slice(value.as_bytes());
            }
        }
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor { bytes, offset: 0 };
        let op = cursor.take_u8()?;
        match op {
            x if x == LogOp::SetAdd as u8 => Ok(Self::SetAdd {
                key: cursor.take_str()?,
                member: cursor.take_i64()?,
            }),
            x if x == LogOp::SetRemove as u8 => Ok(Self::SetRemove {
                key: cursor.take_str()?,
                member: cursor.take_i64()?,
            }),
            x if x == LogOp::HashSet as u8 => {
                let key = cursor.take_str()?;
                let field = cursor.take_str()?;
                let len = cursor.take_u32()? as usize;
                let raw = cursor.take(len)?;
                let value = String::from_utf8(raw.to_vec())
                    .map_err(|_| FmError::Index("invalid UTF-8 in hash value".to_string()))?;
                Ok(Self::HashSet { key, field, value })
            }
            other => Err(FmError::Index(format!("unknown log op {other}"))),
        }
    }
}

fn push_str(bytes: &mut Vec<u8>, s: &str) {
    bytes.extend_from_slice(&(s.len() as u16).to_le_bytes());
    bytes.extend_from_slice(s.as_bytes());
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.offset + len;
        if end > self.bytes.len() {
            return Err(FmError::Index("log entry payload truncated".to_string()));
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn take_i64(&mut self) -> Result<i64> {
        let raw = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(i64::from_le_bytes(buf))
    }

    fn take_str(&mut self) -> Result<String> {
        let raw = self.take(2)?;
        let len = u16::from_le_bytes([raw[0], raw[1]]) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| FmError::Index("invalid UTF-8 in log key".to_string()))
    }
}

/// Durable append-only log backing an [`crate::index::IndexStore`].
#[derive(Debug)]
pub struct IndexLog {
    path: PathBuf,
    file: File,
    sync_mode: SyncMode,
    len: u64,
}

impl IndexLog {
    /// Opens (or creates) the log in the given directory, replaying its
    /// entries.
    ///
    /// A valid prefix followed by a torn or corrupt tail replays the prefix,
    /// warns, and truncates the tail. A foreign magic or an unknown version
    /// is a hard error: the directory does not hold our index.
    pub async fn open(dir: &Path, sync_mode: SyncMode) -> Result<(Self, Vec<LogEntry>)> {
        fs::create_dir_all(dir).await?;
        let path = dir.join(LOG_FILE_NAME);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        let (entries, valid_len) = parse_log(&path, &bytes)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .await?;

        let mut len = valid_len;
        if bytes.is_empty() {
            file.write_all(&header_bytes()).await?;
            len = HEADER_LEN as u64;
        } else if valid_len < bytes.len() as u64 {
            file.set_len(valid_len).await?;
        }
        file.seek(SeekFrom::Start(len)).await?;

        let log = Self {
            path,
            file,
            sync_mode,
            len,
        };
        Ok((log, entries))
    }

    /// Appends one entry and syncs per the configured mode.
    pub async fn append(&mut self, entry: &LogEntry) -> Result<()> {
        let payload = entry.to_bytes();
        let mut frame = Vec::with_capacity(FRAME_LEN + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);

        self.file.write_all(&frame).await?;
        self.sync().await?;
        self.len += frame.len() as u64;
        Ok(())
    }

    /// Rewrites the log from the given live state and swaps it in.
    pub async fn rewrite(&mut self, entries: &[LogEntry]) -> Result<()> {
        let tmp = self.path.with_extension("log.tmp");

        let mut buf = header_bytes().to_vec();
        for entry in entries {
            let payload = entry.to_bytes();
            buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
            buf.extend_from_slice(&payload);
        }

        let mut file = File::create(&tmp).await?;
        file.write_all(&buf).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &self.path).await?;

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path).await?;
        file.seek(SeekFrom::End(0)).await?;
        self.file = file;
        self.len = buf.len() as u64;
        Ok(())
    }

    /// Returns the current log length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true when the log holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len <= HEADER_LEN as u64
    }

    async fn sync(&mut self) -> Result<()> {
        match self.sync_mode {
            SyncMode::Fsync => self.file.sync_all().await?,
            SyncMode::Fdatasync => self.file.sync_data().await?,
            SyncMode::None => {}
        }
        Ok(())
    }
}

fn header_bytes() -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&LOG_MAGIC);
    header[4..6].copy_from_slice(&LOG_VERSION.to_le_bytes());
    header
}

fn parse_log(path: &Path, bytes: &[u8]) -> Result<(Vec<LogEntry>, u64)> {
    if bytes.is_empty() {
        return Ok((Vec::new(), HEADER_LEN as u64));
    }
    if bytes.len() < HEADER_LEN || bytes[0..4] != LOG_MAGIC {
        return Err(FmError::Index(format!(
            "{} is not an index log",
            path.display()
        )));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version > LOG_VERSION {
        return Err(FmError::Index(format!(
            "unsupported index log version {version}"
        )));
    }

    let mut entries = Vec::new();
    let mut offset = HEADER_LEN;
    while offset + FRAME_LEN <= bytes.len() {
        let len = u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]) as usize;
        let crc = u32::from_le_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]);
        let start = offset + FRAME_LEN;
        let end = start + len;
        if end > bytes.len() {
            break;
        }
        let payload = &bytes[start..end];
        if crc32fast::hash(payload) != crc {
            break;
        }
        match LogEntry::from_bytes(payload) {
            Ok(entry) => entries.push(entry),
            Err(_) => break,
        }
        offset = end;
    }

    if offset < bytes.len() {
        warn!(
            dropped = bytes.len() - offset,
            "index log has a torn tail, truncating"
        );
    }
    Ok((entries, offset as u64))
}
