//! All-or-nothing appends to a record file.
//!
//! Every sink of the process that targets the same path shares one lock. An append holds it
//! while the record is written with a single blocking `write_all`, and the sink keeps holding
//! it until the transaction is committed, so a record can be cut back off the file without
//! touching anybody else's.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::error;

use crate::{Error, Result};

type FileLocks = parking_lot::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>;

static FILE_LOCKS: OnceLock<FileLocks> = OnceLock::new();

fn file_lock(path: &Path) -> Arc<Mutex<()>> {
    let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut locks = FILE_LOCKS.get_or_init(FileLocks::default).lock();
    Arc::clone(locks.entry(key).or_default())
}

/// Where a record landed in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct AppendedRecord {
    /// File length before the record was written.
    pub(super) start: u64,
    /// File length right after it.
    pub(super) end: u64,
}

impl AppendedRecord {
    pub(super) fn len(&self) -> u64 {
        self.end - self.start
    }
}

/// Target file of a sink.
#[derive(Debug, Clone)]
pub(super) struct RecordFile {
    path: PathBuf,
    sync: bool,
    lock: Arc<Mutex<()>>,
}

impl RecordFile {
    pub(super) fn new(path: &Path, sync: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            sync,
            lock: file_lock(path),
        }
    }

    /// Waits until no other sink of the process is appending to or retracting from the file.
    pub(super) async fn lock(&self) -> AppendGuard {
        AppendGuard {
            path: self.path.clone(),
            sync: self.sync,
            _guard: Arc::clone(&self.lock).lock_owned().await,
        }
    }
}

/// Exclusive access to a [`RecordFile`].
pub(super) struct AppendGuard {
    path: PathBuf,
    sync: bool,
    _guard: OwnedMutexGuard<()>,
}

impl AppendGuard {
    /// Creates the file if needed and appends `record`. Whatever part of the record made it to
    /// the file before a failure is cut back off.
    pub(super) async fn append(&self, record: Vec<u8>) -> Result<AppendedRecord> {
        let path = self.path.clone();
        let sync = self.sync;
        run_blocking(move || {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| Error::Delivery(format!("opening {}: {e}", path.display())))?;
            append_record(&mut file, &record, sync)
                .map_err(|e| Error::Delivery(format!("writing {}: {e}", path.display())))
        })
        .await
    }

    /// Cuts `record` back off the end of the file. Refuses if the file no longer ends with it,
    /// which can only happen if a writer outside this process appended in between.
    pub(super) async fn retract(&self, record: AppendedRecord) -> Result<()> {
        let path = self.path.clone();
        run_blocking(move || {
            let file = OpenOptions::new().write(true).open(&path)?;
            let current = file.metadata()?.len();
            if current != record.end {
                return Err(Error::Io(format!(
                    "{} changed under the record (expected length {}, found {current})",
                    path.display(),
                    record.end
                )));
            }
            file.set_len(record.start)?;
            Ok(())
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Io(format!("file task failed: {e}")))?
}

/// What [`append_record`] needs from the file it writes to.
trait AppendTarget: Write {
    fn size(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync_to_disk(&mut self) -> io::Result<()>;
}

impl AppendTarget for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync_to_disk(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

fn append_record<T: AppendTarget>(
    target: &mut T,
    record: &[u8],
    sync: bool,
) -> io::Result<AppendedRecord> {
    let start = target.size()?;
    if let Err(e) = write_through(target, record, sync) {
        if let Err(truncate_err) = target.truncate(start) {
            error!(error = ?truncate_err, length = start, "Failed to cut back a partial record");
        }
        return Err(e);
    }
    Ok(AppendedRecord {
        start,
        end: start + record.len() as u64,
    })
}

fn write_through<T: AppendTarget>(target: &mut T, record: &[u8], sync: bool) -> io::Result<()> {
    target.write_all(record)?;
    target.flush()?;
    if sync {
        target.sync_to_disk()?;
    }
    Ok(())
}
