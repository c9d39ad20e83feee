//! Durable fingerprint store.
//!
//! An append-only file of fixed-size fingerprint records: no header, no
//! in-place mutation, no deletion. Records arrive from the enforcement
//! point as devices are decided, and the entire store is replayed outward
//! once per session so the kernel side can rebuild its fingerprint table
//! after either side restarts.
//!
//! # Invariants
//!
//! - [INV-STORE-001] Records are persisted in arrival order and replayed
//!   oldest-first.
//! - [INV-STORE-002] A record with security picture index 0 is never
//!   persisted; index 0 is reserved to mean "undecided/disable".
//! - [INV-STORE-003] A truncated trailing record is skipped on read, never
//!   propagated; one interrupted write cannot poison startup.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use usbward_core::wire::codec::FP_RECORD_LEN;
use usbward_core::wire::FingerprintRecord;

/// Fingerprint store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record carries the reserved "undecided" security picture index.
    #[error("refusing to persist a fingerprint with the reserved security picture index 0")]
    ReservedPicIndex,

    /// Underlying file I/O failed.
    #[error("fingerprint store I/O at {path}: {source}")]
    Io {
        /// Store file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// Handle to the durable fingerprint file.
///
/// The write handle is held open for the store's lifetime; reads use a
/// fresh handle per [`FingerprintStore::records`] call so replay is
/// restartable.
#[derive(Debug)]
pub struct FingerprintStore {
    path: PathBuf,
    file: File,
}

impl FingerprintStore {
    /// Opens the store, creating the file (and its parent directory) if
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory or file cannot be
    /// created or opened.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let io_err = |source: io::Error| StoreError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        debug!(path = %path.display(), "fingerprint store opened");
        Ok(Self { path, file })
    }

    /// Durably appends one record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReservedPicIndex`] for a zero security picture
    /// index (the store is unchanged) and [`StoreError::Io`] on write
    /// failure.
    pub fn append(&mut self, record: &FingerprintRecord) -> Result<(), StoreError> {
        if record.security_pic_index == 0 {
            return Err(StoreError::ReservedPicIndex);
        }
        let bytes = record.to_bytes();
        self.file
            .write_all(&bytes)
            .and_then(|()| self.file.flush())
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })
    }

    /// Opens a fresh read pass over every stored record, oldest-first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the store file cannot be reopened
    /// for reading.
    pub fn records(&self) -> Result<Records, StoreError> {
        let file = File::open(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(Records {
            reader: BufReader::new(file),
            path: self.path.clone(),
        })
    }

    /// Number of complete records currently on disk.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the file cannot be inspected.
    pub fn record_count(&self) -> Result<u64, StoreError> {
        let len = std::fs::metadata(&self.path)
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?
            .len();
        Ok(len / FP_RECORD_LEN as u64)
    }

    /// The store's file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the store, flushing best-effort.
    ///
    /// Close failures are logged and swallowed: this runs on the shutdown
    /// path, which must never block on the store.
    pub fn close(self) {
        if let Err(e) = self.file.sync_all() {
            warn!(path = %self.path.display(), "fingerprint store close: {e}");
        }
    }
}

/// Lazy read pass over the store.
pub struct Records {
    reader: BufReader<File>,
    path: PathBuf,
}

impl Iterator for Records {
    type Item = Result<FingerprintRecord, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut bytes = [0u8; FP_RECORD_LEN];
        let mut filled = 0;
        while filled < FP_RECORD_LEN {
            match self.reader.read(&mut bytes[filled..]) {
                Ok(0) if filled == 0 => return None,
                Ok(0) => {
                    // Interrupted final write; skip the partial record.
                    warn!(
                        path = %self.path.display(),
                        bytes = filled,
                        "ignoring truncated trailing fingerprint record"
                    );
                    return None;
                }
                Ok(read) => filled += read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => {
                    return Some(Err(StoreError::Io {
                        path: self.path.clone(),
                        source,
                    }));
                }
            }
        }
        Some(Ok(FingerprintRecord::from_bytes(&bytes)))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use usbward_core::classify::DeviceCategory;
    use usbward_core::wire::InterfaceMask;

    use super::*;

    fn record(tag: u8, pic: u8) -> FingerprintRecord {
        FingerprintRecord {
            digest: [tag; 20],
            interface_mask: InterfaceMask::first_enabled(usize::from(tag % 4)),
            limited_hid: tag % 2 == 0,
            security_pic_index: pic,
            description: DeviceCategory::Mouse,
        }
    }

    fn collect(store: &FingerprintStore) -> Vec<FingerprintRecord> {
        store
            .records()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn open_creates_the_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db").join("fingerprints.dat");
        let store = FingerprintStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.record_count().unwrap(), 0);
    }

    #[test]
    fn append_and_replay_oldest_first() {
        let tmp = TempDir::new().unwrap();
        let mut store = FingerprintStore::open(tmp.path().join("fp.dat")).unwrap();
        for tag in 1..=3u8 {
            store.append(&record(tag, tag)).unwrap();
        }
        let replayed = collect(&store);
        assert_eq!(replayed.len(), 3);
        assert_eq!(
            replayed.iter().map(|r| r.digest[0]).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn zero_pic_index_is_rejected_and_store_unchanged() {
        let tmp = TempDir::new().unwrap();
        let mut store = FingerprintStore::open(tmp.path().join("fp.dat")).unwrap();
        store.append(&record(1, 1)).unwrap();

        let err = store.append(&record(2, 0)).unwrap_err();
        assert!(matches!(err, StoreError::ReservedPicIndex));
        assert_eq!(store.record_count().unwrap(), 1);
        assert_eq!(collect(&store).len(), 1);
    }

    #[test]
    fn records_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fp.dat");
        {
            let mut store = FingerprintStore::open(&path).unwrap();
            store.append(&record(7, 4)).unwrap();
            store.close();
        }
        let store = FingerprintStore::open(&path).unwrap();
        let replayed = collect(&store);
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0], record(7, 4));
    }

    #[test]
    fn truncated_tail_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fp.dat");
        let mut store = FingerprintStore::open(&path).unwrap();
        store.append(&record(1, 2)).unwrap();

        // Simulate an interrupted final write.
        let mut raw = std::fs::read(&path).unwrap();
        raw.extend_from_slice(&[0xee; FP_RECORD_LEN / 2]);
        std::fs::write(&path, raw).unwrap();

        let replayed = collect(&store);
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0], record(1, 2));
    }

    #[test]
    fn replay_is_restartable() {
        let tmp = TempDir::new().unwrap();
        let mut store = FingerprintStore::open(tmp.path().join("fp.dat")).unwrap();
        store.append(&record(1, 1)).unwrap();
        store.append(&record(2, 2)).unwrap();

        assert_eq!(collect(&store).len(), 2);
        // A second pass starts from the beginning again.
        assert_eq!(collect(&store).len(), 2);
    }
}
