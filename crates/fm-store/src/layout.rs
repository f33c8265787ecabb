//! Filesystem layout for live blocks, archives, and the index log.
//!
//! On-disk shape under the data root:
//!
//! ```text
//! <dataRoot>/<block>/<devid>/<epoch_seconds>.dat    live records
//! <dataRoot>/archive/<devid>/<devid>-<block>.tgz    archived blocks
//! <dataRoot>/index/                                  index log
//! ```
//!
//! Directories are created lazily by the write path; every accessor here is
//! pure path math except [`StoreLayout::list_record_files`].

use crate::clock;
use crate::error::Result;
use std::path::{Path, PathBuf};

/// Record file extension.
pub const RECORD_EXTENSION: &str = "dat";

/// Name of the archive directory under the data root.
pub const ARCHIVE_DIR: &str = "archive";

/// Name of the index directory under the data root.
pub const INDEX_DIR: &str = "index";

/// A live record file with the epoch seconds parsed from its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFile {
    /// Ticktime of the record, in epoch seconds.
    pub epoch_secs: u64,
    /// Full path to the `.dat` file.
    pub path: PathBuf,
}

/// Provides filesystem paths for blocks, records, and archives.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    data_root: PathBuf,
}

impl StoreLayout {
    /// Creates a layout rooted at the given directory.
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self {
            data_root: data_root.as_ref().to_path_buf(),
        }
    }

    /// Returns the data root.
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Returns the directory holding all devices' records for a block.
    pub fn block_dir(&self, block: i64) -> PathBuf {
        self.data_root.join(block.to_string())
    }

    /// Returns the live directory for one device within a block.
    pub fn device_block_dir(&self, devid: u32, block: i64) -> PathBuf {
        self.block_dir(block).join(devid.to_string())
    }

    /// Returns the record path for a ticktime, named by its epoch seconds.
    pub fn record_path(&self, devid: u32, block: i64, ticktime_ms: u64) -> PathBuf {
        self.device_block_dir(devid, block).join(format!(
            "{}.{}",
            clock::epoch_secs(ticktime_ms),
            RECORD_EXTENSION
        ))
    }

    /// Returns the temp-file path used to stage a record before rename.
    pub fn tmp_path(&self, record: &Path) -> PathBuf {
        let mut name = record
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        record.with_file_name(name)
    }

    /// Returns the archive directory for a device.
    pub fn archive_dir(&self, devid: u32) -> PathBuf {
        self.data_root.join(ARCHIVE_DIR).join(devid.to_string())
    }

    /// Returns the archive file path for one device block.
    pub fn archive_path(&self, devid: u32, block: i64) -> PathBuf {
        self.archive_dir(devid).join(format!("{devid}-{block}.tgz"))
    }

    /// Returns the tarball member path of a device block, relative to the
    /// data root. Passed to the archive tool together with `-C <dataRoot>`.
    pub fn archive_member(&self, devid: u32, block: i64) -> String {
        format!("{block}/{devid}")
    }

    /// Returns the directory holding the index log.
    pub fn index_dir(&self) -> PathBuf {
        self.data_root.join(INDEX_DIR)
    }

    /// Lists record files for one device block, sorted ascending by epoch.
    ///
    /// A missing directory yields an empty list. Files whose names do not
    /// parse as `<epoch>.dat` are ignored.
    pub async fn list_record_files(&self, devid: u32, block: i64) -> Result<Vec<RecordFile>> {
        let dir = self.device_block_dir(devid, block);
        let mut files = Vec::new();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let epoch_secs = match path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                Some(epoch) => epoch,
                None => continue,
            };
            files.push(RecordFile { epoch_secs, path });
        }

        files.sort_by_key(|file| file.epoch_secs);
        Ok(files)
    }
}
