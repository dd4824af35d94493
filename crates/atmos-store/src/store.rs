//! The append-only writer.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use time::{Date, UtcOffset};
use tracing::{debug, info, warn};

use atmos_types::Sample;

use crate::error::{Result, StoreError};
use crate::partition::{self, HeaderState, Leftover, PartitionInfo};
use crate::query::StoreReader;

/// Options for [`Store::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Fixed offset whose calendar days delimit partitions.
    pub utc_offset: UtcOffset,
    /// Extra attempts after a failed append.
    pub write_retries: u32,
    /// `sync_data` after every append.
    pub sync_writes: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            utc_offset: UtcOffset::UTC,
            write_retries: 3,
            sync_writes: true,
        }
    }
}

/// Outcome of [`Store::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    /// The sample was written.
    Written,
    /// The sample repeats the last stored sample and was not written again.
    Duplicate,
}

/// A partition that was truncated while opening the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredPartition {
    /// The truncated file.
    pub path: PathBuf,
    /// Length before recovery.
    pub original_len: u64,
    /// Length after recovery.
    pub recovered_len: u64,
}

impl RecoveredPartition {
    /// Bytes discarded by recovery.
    pub fn discarded_bytes(&self) -> u64 {
        self.original_len - self.recovered_len
    }
}

#[derive(Debug)]
struct OpenPartition {
    date: Date,
    path: PathBuf,
    file: File,
    len: u64,
}

/// Day-partitioned sample log. There must be at most one `Store` per root;
/// readers use [`StoreReader`].
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    options: StoreOptions,
    current: Option<OpenPartition>,
    last: Option<Sample>,
    recovered: Vec<RecoveredPartition>,
}

impl Store {
    /// Open or create a store at `root`.
    ///
    /// Every uncompressed partition is truncated to its last complete,
    /// decodable row, so a write torn by a crash is dropped rather than
    /// read back.
    pub fn open<P: AsRef<Path>>(root: P, options: StoreOptions) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            fs::create_dir_all(&root).map_err(|e| StoreError::CreateDirectory {
                path: root.clone(),
                source: e,
            })?;
        }

        info!("Opening sample store at {}", root.display());
        let listing = partition::list(&root)?;

        let mut recovered = Vec::new();
        let mut plain_last = Vec::with_capacity(listing.partitions.len());
        for info in &listing.partitions {
            if info.compressed {
                plain_last.push(None);
            } else {
                let (report, newest) = recover(info)?;
                recovered.extend(report);
                plain_last.push(newest);
            }
        }

        // The newest non-empty partition by date holds the last sample,
        // whether or not it has been compressed.
        let mut last = None;
        for (info, newest) in listing.partitions.iter().zip(plain_last).rev() {
            last = if info.compressed {
                last_in_compressed(info)?
            } else {
                newest
            };
            if last.is_some() {
                break;
            }
        }

        // A plain file next to its compressed copy is merged by the next
        // retention pass; rows it holds still count.
        for leftover in &listing.leftovers {
            let Leftover::Shadowed { plain: path, .. } = leftover else {
                continue;
            };
            let newest = partition::scan(File::open(path)?)?.last;
            if let Some(sample) = newest
                && last.is_none_or(|l: Sample| sample.timestamp > l.timestamp)
            {
                warn!(
                    "{} holds samples missing from its compressed copy",
                    path.display()
                );
                last = Some(sample);
            }
        }

        if let Some(sample) = &last {
            debug!("Last stored sample at {}", sample.timestamp);
        }

        Ok(Self {
            root,
            options,
            current: None,
            last,
            recovered,
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Options the store was opened with.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// The most recently stored sample.
    pub fn last_sample(&self) -> Option<&Sample> {
        self.last.as_ref()
    }

    /// Partitions truncated by [`Store::open`].
    pub fn recovered(&self) -> &[RecoveredPartition] {
        &self.recovered
    }

    /// A read handle on the same root.
    pub fn reader(&self) -> StoreReader {
        StoreReader::new(&self.root, self.options.utc_offset)
    }

    /// Append one sample.
    ///
    /// Timestamps must strictly increase. Appending the last stored sample
    /// again is a no-op, so a caller may retry an append whose outcome it did
    /// not observe.
    ///
    /// Rows are written under the partition's file lock, which the retention
    /// maintainer takes before compressing or deleting a plain partition. A
    /// sample for a day it has already closed fails with
    /// [`StoreError::PartitionClosed`] instead of being written to a file
    /// that no longer belongs to the store.
    pub fn append(&mut self, sample: &Sample) -> Result<Appended> {
        if let Some(last) = &self.last {
            if sample == last {
                debug!("Skipping duplicate sample at {}", sample.timestamp);
                return Ok(Appended::Duplicate);
            }
            if sample.timestamp <= last.timestamp {
                return Err(StoreError::OutOfOrder {
                    last: last.timestamp,
                    attempted: sample.timestamp,
                });
            }
        }

        let row = partition::encode_row(sample)?;
        let date = partition::day_of(sample.timestamp, self.options.utc_offset);

        let mut attempt = 0;
        loop {
            match self.try_write(date, &row) {
                Ok(Attempt::Written) => break,
                Ok(Attempt::Closed) => {
                    if self.current.as_ref().is_some_and(|c| c.date == date) {
                        self.current = None;
                    }
                    return Err(StoreError::PartitionClosed {
                        date,
                        path: partition::plain_path(&self.root, date),
                    });
                }
                Err(e) => {
                    let path = partition::plain_path(&self.root, date);
                    self.rollback();
                    if attempt >= self.options.write_retries {
                        return Err(StoreError::WriteFailed { path, source: e });
                    }
                    attempt += 1;
                    warn!(
                        "Append to {} failed ({}), retry {}/{}",
                        path.display(),
                        e,
                        attempt,
                        self.options.write_retries
                    );
                }
            }
        }

        self.last = Some(*sample);
        Ok(Appended::Written)
    }

    fn try_write(&mut self, date: Date, row: &[u8]) -> io::Result<Attempt> {
        if self.current.as_ref().is_none_or(|c| c.date != date) {
            if partition::compressed_path(&self.root, date).exists() {
                return Ok(Attempt::Closed);
            }
            self.current = Some(self.open_partition(date)?);
        }
        let Some(current) = self.current.as_mut() else {
            return Err(io::Error::other("no open partition"));
        };

        current.file.lock()?;
        let outcome = write_locked(&self.root, self.options.sync_writes, current, row);
        if let Err(e) = current.file.unlock() {
            debug!("Failed to unlock {}: {}", current.path.display(), e);
        }
        outcome
    }

    fn open_partition(&self, date: Date) -> io::Result<OpenPartition> {
        let path = partition::plain_path(&self.root, date);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let len = file.metadata()?.len();
        debug!("Opened partition {} ({} bytes)", path.display(), len);
        Ok(OpenPartition {
            date,
            path,
            file,
            len,
        })
    }

    /// Cut the open partition back to its last known good length. If that
    /// fails the handle is dropped and the next attempt reopens the file.
    fn rollback(&mut self) {
        let Some(current) = self.current.as_mut() else {
            return;
        };
        match current.file.set_len(current.len) {
            Ok(()) => {}
            Err(e) => {
                warn!(
                    "Could not roll back {} to {} bytes: {}",
                    current.path.display(),
                    current.len,
                    e
                );
                self.current = None;
            }
        }
    }
}

enum Attempt {
    Written,
    /// Retention compressed or deleted the partition.
    Closed,
}

/// Write one row while holding the partition lock.
fn write_locked(
    root: &Path,
    sync: bool,
    current: &mut OpenPartition,
    row: &[u8],
) -> io::Result<Attempt> {
    if partition::compressed_path(root, current.date).exists() || !current.path.exists() {
        return Ok(Attempt::Closed);
    }

    let mut buf;
    let payload = if current.len == 0 {
        buf = partition::header_line().into_bytes();
        buf.extend_from_slice(row);
        &buf[..]
    } else {
        row
    };

    current.file.write_all(payload)?;
    if sync {
        current.file.sync_data()?;
    }
    current.len += payload.len() as u64;
    Ok(Attempt::Written)
}

/// Truncate a plain partition to its valid prefix.
fn recover(info: &PartitionInfo) -> Result<(Option<RecoveredPartition>, Option<Sample>)> {
    let scan = partition::scan(File::open(&info.path)?)?;
    if scan.header == HeaderState::Foreign {
        return Err(StoreError::Corruption {
            path: info.path.clone(),
            line: 1,
            reason: "unexpected header row".to_string(),
        });
    }
    if scan.corrupt_rows > 0 {
        warn!(
            "{} undecodable rows in {} will be skipped by readers",
            scan.corrupt_rows,
            info.path.display()
        );
    }
    if scan.discarded() == 0 {
        return Ok((None, scan.last));
    }

    let file = OpenOptions::new().write(true).open(&info.path)?;
    file.set_len(scan.valid_len)?;
    file.sync_all()?;
    warn!(
        "Recovered {}: discarded {} trailing bytes of an incomplete write",
        info.path.display(),
        scan.discarded()
    );
    let report = RecoveredPartition {
        path: info.path.clone(),
        original_len: scan.total_len,
        recovered_len: scan.valid_len,
    };
    Ok((Some(report), scan.last))
}

fn last_in_compressed(info: &PartitionInfo) -> Result<Option<Sample>> {
    let scan = partition::scan(partition::open_reader(&info.path, true)?)?;
    Ok(scan.last)
}
