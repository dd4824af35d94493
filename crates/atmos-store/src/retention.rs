//! Retention: compression of closed days and deletion of old data.
//!
//! A pass runs these steps in order, each over partitions dated strictly
//! before `today`:
//!
//! 1. settle leftovers of an interrupted pass: remove `*.tmp` files, and
//!    fold a plain partition next to its compressed copy into that copy
//! 2. compress every closed plain partition
//! 3. delete partitions older than `today - max_age_days`
//! 4. delete the oldest partitions while the store exceeds `max_total_bytes`
//! 5. remove empty month and year directories
//!
//! Every step leaves the store readable if the process dies mid-way. A
//! compressed file only appears under its final name once it is complete
//! and synced, and the plain file is removed only after that.
//!
//! The writer holds an exclusive lock on a plain partition while it appends
//! and checks for a compressed copy under that lock. Retention compresses or
//! deletes a plain partition only while holding the same lock, and skips it
//! when the writer has it.
//!
//! Failures on one partition are logged and counted; the pass moves on.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime, UtcOffset};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::partition::{self, HeaderState, Leftover, PartitionInfo};

/// How much history to keep. At least one bound must be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Delete partitions older than this many days.
    pub max_age_days: Option<u32>,
    /// Delete the oldest partitions while the store is larger than this.
    pub max_total_bytes: Option<u64>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age_days: Some(90),
            max_total_bytes: None,
        }
    }
}

impl RetentionPolicy {
    /// Check the policy is enforceable.
    pub fn validate(&self) -> Result<()> {
        match (self.max_age_days, self.max_total_bytes) {
            (None, None) => Err(StoreError::InvalidPolicy(
                "set max_age_days, max_total_bytes, or both".to_string(),
            )),
            (Some(0), _) => Err(StoreError::InvalidPolicy(
                "max_age_days must be at least 1".to_string(),
            )),
            (_, Some(0)) => Err(StoreError::InvalidPolicy(
                "max_total_bytes must be at least 1".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionSummary {
    /// Partitions deleted by the age or size bound.
    pub partitions_deleted: usize,
    /// Partitions compressed.
    pub partitions_compressed: usize,
    /// Leftovers of interrupted passes removed.
    pub leftovers_removed: usize,
    /// Plain partitions whose newer rows were folded into their compressed
    /// copy.
    pub partitions_merged: usize,
    /// Bytes released by every step.
    pub bytes_freed: u64,
    /// Operations that failed and were skipped.
    pub failures: usize,
    /// The pass stopped early because it was asked to.
    pub interrupted: bool,
}

/// Applies a [`RetentionPolicy`] to a store root.
///
/// Safe to run concurrently with the writer and with readers. Running a
/// second pass right after the first changes nothing.
#[derive(Debug, Clone)]
pub struct RetentionMaintainer {
    root: PathBuf,
    utc_offset: UtcOffset,
}

impl RetentionMaintainer {
    /// Create a maintainer. The offset must match the writer's.
    pub fn new<P: AsRef<Path>>(root: P, utc_offset: UtcOffset) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            utc_offset,
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The current day in the store's offset.
    pub fn today(&self) -> Date {
        partition::day_of(OffsetDateTime::now_utc(), self.utc_offset)
    }

    /// Run one pass.
    pub fn enforce(&self, policy: &RetentionPolicy, today: Date) -> Result<RetentionSummary> {
        self.enforce_with(policy, today, || false)
    }

    /// Run one pass, checking `should_stop` between partitions.
    pub fn enforce_with<F>(
        &self,
        policy: &RetentionPolicy,
        today: Date,
        should_stop: F,
    ) -> Result<RetentionSummary>
    where
        F: Fn() -> bool,
    {
        policy.validate()?;
        let mut summary = RetentionSummary::default();
        let mut pass = Pass {
            summary: &mut summary,
            should_stop: &should_stop,
        };

        let listing = partition::list(&self.root)?;
        debug!(
            "Retention pass over {} partitions in {}",
            listing.partitions.len(),
            self.root.display()
        );

        // 1. Leftovers.
        for leftover in &listing.leftovers {
            if pass.stop() {
                return Ok(summary);
            }
            match leftover {
                Leftover::Temporary(path) => {
                    if let Some(freed) = pass.remove(path, "leftover") {
                        pass.summary.leftovers_removed += 1;
                        pass.summary.bytes_freed += freed;
                    }
                }
                Leftover::Shadowed { plain, compressed } => {
                    match self.settle_shadowed(plain, compressed) {
                        Ok(Settled::Removed(freed)) => {
                            pass.summary.leftovers_removed += 1;
                            pass.summary.bytes_freed += freed;
                        }
                        Ok(Settled::Merged(rows)) => {
                            warn!(
                                "Merged {} rows of {} into {}",
                                rows,
                                plain.display(),
                                compressed.display()
                            );
                            pass.summary.partitions_merged += 1;
                        }
                        Ok(Settled::Busy) => {}
                        Err(e) => {
                            warn!("Failed to settle {}: {}", plain.display(), e);
                            pass.summary.failures += 1;
                        }
                    }
                }
            }
        }

        // 2. Compression. Listing again picks up the outcome for the later
        // steps, so sizes reflect compressed files.
        for info in listing
            .partitions
            .iter()
            .filter(|p| !p.compressed && p.date < today)
        {
            if pass.stop() {
                return Ok(summary);
            }
            match self.compress(info) {
                Ok(Some(freed)) => {
                    pass.summary.partitions_compressed += 1;
                    pass.summary.bytes_freed += freed;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to compress {}: {}", info.path.display(), e);
                    pass.summary.failures += 1;
                }
            }
        }
        let listing = partition::list(&self.root)?;
        let mut remaining: Vec<PartitionInfo> = listing.partitions;

        // 3. Age.
        if let Some(max_age) = policy.max_age_days {
            let cutoff = today - Duration::days(i64::from(max_age));
            let mut kept = Vec::with_capacity(remaining.len());
            for info in remaining {
                if info.date < cutoff && info.date < today {
                    if pass.stop() {
                        return Ok(summary);
                    }
                    if let Some(freed) = pass.remove_partition(&info, "expired partition") {
                        pass.summary.partitions_deleted += 1;
                        pass.summary.bytes_freed += freed;
                        continue;
                    }
                }
                kept.push(info);
            }
            remaining = kept;
        }

        // 4. Size.
        if let Some(budget) = policy.max_total_bytes {
            let mut total: u64 = remaining.iter().map(|p| p.size_bytes).sum();
            for info in &remaining {
                if total <= budget {
                    break;
                }
                if info.date >= today {
                    warn!(
                        "Store holds {} bytes, over the {} byte budget, but only today's data is left",
                        total, budget
                    );
                    break;
                }
                if pass.stop() {
                    return Ok(summary);
                }
                if let Some(freed) = pass.remove_partition(info, "partition over budget") {
                    pass.summary.partitions_deleted += 1;
                    pass.summary.bytes_freed += freed;
                    total = total.saturating_sub(info.size_bytes);
                }
            }
        }

        // 5. Empty directories. Listed deepest first.
        for dir in &listing.directories {
            if fs::remove_dir(dir).is_ok() {
                debug!("Removed empty directory {}", dir.display());
            }
        }

        if summary.partitions_deleted > 0 || summary.partitions_compressed > 0 {
            info!(
                "Retention: compressed {}, deleted {}, freed {} bytes",
                summary.partitions_compressed, summary.partitions_deleted, summary.bytes_freed
            );
        }
        Ok(summary)
    }

    /// Compress a closed plain partition. Returns the bytes saved, or `None`
    /// if the partition was left alone.
    fn compress(&self, info: &PartitionInfo) -> io::Result<Option<u64>> {
        let Some(mut source) = try_lock(&info.path)? else {
            debug!("{} is being written, compressing later", info.path.display());
            return Ok(None);
        };
        let source_len = source.metadata()?.len();
        let scan = partition::scan(&mut source)?;
        if scan.header == HeaderState::Foreign {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unexpected header row",
            ));
        }

        source.seek(SeekFrom::Start(0))?;
        let target = partition::compressed_path(&self.root, info.date);
        let compressed_len = write_compressed(&target, |encoder| {
            io::copy(&mut (&mut source).take(scan.valid_len), encoder).map(drop)
        })?;

        // Still locked: a writer waiting on this file sees the compressed
        // copy once it gets the lock.
        fs::remove_file(&info.path)?;
        debug!(
            "Compressed {} ({} -> {} bytes)",
            info.path.display(),
            source_len,
            compressed_len
        );
        Ok(Some(source_len.saturating_sub(compressed_len)))
    }

    /// Deal with a plain partition found next to its compressed copy.
    ///
    /// Rows newer than the copy's last row are appended to a new compressed
    /// file that replaces the copy. The plain file is removed either way.
    fn settle_shadowed(&self, plain: &Path, compressed: &Path) -> io::Result<Settled> {
        let Some(mut source) = try_lock(plain)? else {
            return Ok(Settled::Busy);
        };
        let source_len = source.metadata()?.len();
        let newest = partition::scan(&mut source)?;
        let covered = partition::scan(partition::open_reader(compressed, true)?)?;

        let cutoff = covered.last.map(|s| s.timestamp);
        let has_newer = match (newest.last, cutoff) {
            (Some(sample), Some(cutoff)) => sample.timestamp > cutoff,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !has_newer {
            fs::remove_file(plain)?;
            debug!("Removed leftover {}", plain.display());
            return Ok(Settled::Removed(source_len));
        }

        source.seek(SeekFrom::Start(0))?;
        let mut merged = 0;
        write_compressed(compressed, |encoder| {
            if covered.header == HeaderState::Valid {
                let copy = partition::open_reader(compressed, true)?;
                io::copy(&mut copy.take(covered.valid_len), encoder)?;
            } else {
                encoder.write_all(partition::header_line().as_bytes())?;
            }
            partition::for_each_row(&mut source, newest.valid_len, |sample, row| {
                if cutoff.is_none_or(|c| sample.timestamp > c) {
                    encoder.write_all(row)?;
                    merged += 1;
                }
                Ok(())
            })
        })?;
        fs::remove_file(plain)?;
        Ok(Settled::Merged(merged))
    }
}

/// Outcome of settling a shadowed plain partition.
enum Settled {
    /// Nothing newer than the compressed copy; the plain file was removed.
    Removed(u64),
    /// Rows were folded into the compressed copy.
    Merged(u64),
    /// The writer holds the file.
    Busy,
}

/// Open `path` and take its exclusive lock without waiting. `None` means
/// another handle holds the lock.
fn try_lock(path: &Path) -> io::Result<Option<File>> {
    let file = File::open(path)?;
    match file.try_lock() {
        Ok(()) => Ok(Some(file)),
        Err(fs::TryLockError::WouldBlock) => Ok(None),
        Err(fs::TryLockError::Error(e)) => Err(e),
    }
}

/// Write a compressed partition to `target` through a synced temporary
/// file and a rename. Returns the size of the result.
fn write_compressed<F>(target: &Path, fill: F) -> io::Result<u64>
where
    F: FnOnce(&mut snap::write::FrameEncoder<File>) -> io::Result<()>,
{
    let tmp = partition::tmp_path(target);
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp)?;
    let mut encoder = snap::write::FrameEncoder::new(file);
    fill(&mut encoder)?;
    encoder.flush()?;
    let file = encoder
        .into_inner()
        .map_err(|e| io::Error::new(e.error().kind(), e.error().to_string()))?;
    file.sync_all()?;
    let len = file.metadata()?.len();
    drop(file);
    fs::rename(&tmp, target)?;
    sync_parent(target);
    Ok(len)
}

struct Pass<'a, F> {
    summary: &'a mut RetentionSummary,
    should_stop: &'a F,
}

impl<F: Fn() -> bool> Pass<'_, F> {
    fn stop(&mut self) -> bool {
        if (self.should_stop)() {
            info!("Retention pass interrupted");
            self.summary.interrupted = true;
            return true;
        }
        false
    }

    /// Remove a file, returning its size. Failures are logged and counted.
    fn remove(&mut self, path: &Path, what: &str) -> Option<u64> {
        let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        match fs::remove_file(path) {
            Ok(()) => {
                debug!("Removed {} {}", what, path.display());
                Some(size)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to remove {} {}: {}", what, path.display(), e);
                self.summary.failures += 1;
                None
            }
        }
    }

    /// Remove a partition. A plain partition is removed under its lock and
    /// skipped while the writer holds it.
    fn remove_partition(&mut self, info: &PartitionInfo, what: &str) -> Option<u64> {
        if info.compressed {
            return self.remove(&info.path, what);
        }
        match try_lock(&info.path) {
            Ok(Some(_locked)) => self.remove(&info.path, what),
            Ok(None) => {
                debug!("{} is being written, keeping it", info.path.display());
                None
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to lock {} {}: {}", what, info.path.display(), e);
                self.summary.failures += 1;
                None
            }
        }
    }
}

/// Make a rename durable. Best effort; not every platform can open
/// directories.
fn sync_parent(path: &Path) {
    if let Some(dir) = path.parent()
        && let Ok(dir) = File::open(dir)
    {
        let _ = dir.sync_all();
    }
}
