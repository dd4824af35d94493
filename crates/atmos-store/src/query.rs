//! Read access to stored samples.
//!
//! Readers never coordinate with the writer. A query looks at the partitions
//! present when it is created and, for the plain ones, only at the bytes
//! already written at that moment, so rows appended later and a row being
//! written right now are never observed.
//!
//! # Example
//!
//! ```no_run
//! use atmos_store::{SampleQuery, StoreReader};
//! use time::{Duration, OffsetDateTime, UtcOffset};
//!
//! let reader = StoreReader::new("/var/lib/atmos", UtcOffset::UTC);
//! let query = SampleQuery::new().since(OffsetDateTime::now_utc() - Duration::hours(24));
//!
//! let mut samples = reader.query(&query)?;
//! for sample in samples.by_ref() {
//!     let sample = sample?;
//!     println!("{} IAQ {}", sample.timestamp, sample.iaq);
//! }
//!
//! // Pick up where we left off next time.
//! let next = SampleQuery::new().resume_after(samples.checkpoint());
//! # let _ = next;
//! # Ok::<(), atmos_store::StoreError>(())
//! ```

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use serde::Serialize;
use time::{Date, OffsetDateTime, UtcOffset};
use tracing::{debug, warn};

use atmos_types::Sample;

use crate::error::Result;
use crate::partition::{self, PartitionInfo, RowDecoder};
use crate::stats::SampleStats;

/// Fluent query builder for stored samples.
///
/// Results are always in timestamp order, oldest first.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SampleQuery {
    /// Samples at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Samples at or before this time.
    pub until: Option<OffsetDateTime>,
    /// First partition day to read.
    pub start_day: Option<Date>,
    /// Last partition day to read.
    pub end_day: Option<Date>,
    /// Samples strictly after this time.
    pub resume_after: Option<OffsetDateTime>,
    /// Maximum number of samples.
    pub limit: Option<usize>,
}

impl SampleQuery {
    /// A query matching every stored sample.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter to samples taken at or after this time.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Filter to samples taken at or before this time.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Restrict to the partitions of an inclusive day range.
    pub fn days(mut self, start: Date, end: Date) -> Self {
        self.start_day = Some(start);
        self.end_day = Some(end);
        self
    }

    /// Continue after a checkpoint from [`Samples::checkpoint`].
    ///
    /// `None` leaves the query unchanged, so a fresh consumer can pass its
    /// stored checkpoint without special-casing the first run.
    pub fn resume_after(mut self, checkpoint: Option<OffsetDateTime>) -> Self {
        self.resume_after = checkpoint;
        self
    }

    /// Limit the number of samples returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn lower_bound(&self) -> Option<OffsetDateTime> {
        match (self.since, self.resume_after) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    fn matches(&self, timestamp: OffsetDateTime) -> bool {
        self.since.is_none_or(|t| timestamp >= t) && self.resume_after.is_none_or(|t| timestamp > t)
    }

    fn past_end(&self, timestamp: OffsetDateTime) -> bool {
        self.until.is_some_and(|t| timestamp > t)
    }

    fn wants_day(&self, date: Date, offset: UtcOffset) -> bool {
        if self.start_day.is_some_and(|d| date < d) || self.end_day.is_some_and(|d| date > d) {
            return false;
        }
        if self
            .lower_bound()
            .is_some_and(|t| date < partition::day_of(t, offset))
        {
            return false;
        }
        !self
            .until
            .is_some_and(|t| date > partition::day_of(t, offset))
    }
}

/// Storage footprint of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    /// Number of day partitions.
    pub partitions: usize,
    /// How many of them are compressed.
    pub compressed_partitions: usize,
    /// Bytes used by all partitions.
    pub total_bytes: u64,
    /// Oldest stored day.
    pub oldest: Option<Date>,
    /// Newest stored day.
    pub newest: Option<Date>,
}

/// A cheap, clonable read handle on a store root.
#[derive(Debug, Clone)]
pub struct StoreReader {
    root: PathBuf,
    utc_offset: UtcOffset,
}

impl StoreReader {
    /// Create a reader. The offset must match the writer's.
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

    /// Stored partitions, oldest first.
    pub fn partitions(&self) -> Result<Vec<PartitionInfo>> {
        Ok(partition::list(&self.root)?.partitions)
    }

    /// Summarize the storage footprint.
    pub fn usage(&self) -> Result<StorageUsage> {
        let partitions = self.partitions()?;
        Ok(StorageUsage {
            partitions: partitions.len(),
            compressed_partitions: partitions.iter().filter(|p| p.compressed).count(),
            total_bytes: partitions.iter().map(|p| p.size_bytes).sum(),
            oldest: partitions.first().map(|p| p.date),
            newest: partitions.last().map(|p| p.date),
        })
    }

    /// Start a query. Samples are read lazily, one partition at a time.
    pub fn query(&self, query: &SampleQuery) -> Result<Samples> {
        let pending = self
            .partitions()?
            .into_iter()
            .filter(|p| query.wants_day(p.date, self.utc_offset))
            .map(|p| PlannedPartition {
                snapshot_len: (!p.compressed).then_some(p.size_bytes),
                date: p.date,
                path: p.path,
            })
            .collect();

        Ok(Samples {
            root: self.root.clone(),
            query: query.clone(),
            pending,
            current: None,
            decoder: RowDecoder::new(),
            line: Vec::with_capacity(256),
            yielded: 0,
            checkpoint: None,
            done: false,
        })
    }

    /// Aggregate the samples matching a query.
    pub fn stats(&self, query: &SampleQuery) -> Result<SampleStats> {
        let mut stats = SampleStats::default();
        for sample in self.query(query)? {
            stats.add(&sample?);
        }
        Ok(stats)
    }

    /// The newest stored sample.
    pub fn latest(&self) -> Result<Option<Sample>> {
        let Some(newest) = self.partitions()?.pop() else {
            return Ok(None);
        };
        let query = SampleQuery::new().days(newest.date, newest.date);
        self.query(&query)?.try_fold(None, |_, s| s.map(Some))
    }
}

#[derive(Debug)]
struct PlannedPartition {
    date: Date,
    path: PathBuf,
    /// Bytes visible to this query; `None` for compressed partitions.
    snapshot_len: Option<u64>,
}

struct OpenedPartition {
    path: PathBuf,
    reader: Box<dyn BufRead + Send>,
    line_no: u64,
}

/// Lazy iterator over the samples of a query.
pub struct Samples {
    root: PathBuf,
    query: SampleQuery,
    pending: VecDeque<PlannedPartition>,
    current: Option<OpenedPartition>,
    decoder: RowDecoder,
    line: Vec<u8>,
    yielded: usize,
    checkpoint: Option<OffsetDateTime>,
    done: bool,
}

impl std::fmt::Debug for Samples {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Samples")
            .field("root", &self.root)
            .field("pending", &self.pending.len())
            .field("yielded", &self.yielded)
            .field("checkpoint", &self.checkpoint)
            .finish()
    }
}

impl Samples {
    /// Timestamp of the last sample yielded so far. The writer keeps
    /// timestamps unique, so `resume_after` from here skips nothing.
    pub fn checkpoint(&self) -> Option<OffsetDateTime> {
        self.checkpoint
    }

    /// Number of samples yielded so far.
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    /// Open a planned partition. A plain partition compressed since the
    /// query was planned is read from its compressed file; a partition
    /// deleted since is skipped.
    fn open(&self, planned: PlannedPartition) -> io::Result<Option<OpenedPartition>> {
        let reader: Box<dyn Read + Send> = match planned.snapshot_len {
            Some(len) => match File::open(&planned.path) {
                Ok(file) => Box::new(file.take(len)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    let compressed = partition::compressed_path(&self.root, planned.date);
                    match partition::open_reader(&compressed, true) {
                        Ok(reader) => {
                            debug!("{} was compressed during the query", planned.path.display());
                            return Ok(Some(OpenedPartition {
                                path: compressed,
                                reader: Box::new(BufReader::new(reader)),
                                line_no: 0,
                            }));
                        }
                        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            },
            None => match partition::open_reader(&planned.path, true) {
                Ok(reader) => reader,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e),
            },
        };
        Ok(Some(OpenedPartition {
            path: planned.path,
            reader: Box::new(BufReader::new(reader)),
            line_no: 0,
        }))
    }

    fn finish(&mut self) {
        self.done = true;
        self.current = None;
        self.pending.clear();
    }
}

impl Iterator for Samples {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.query.limit.is_some_and(|l| self.yielded >= l) {
                self.finish();
                return None;
            }

            if self.current.is_none() {
                let Some(planned) = self.pending.pop_front() else {
                    self.done = true;
                    return None;
                };
                match self.open(planned) {
                    Ok(Some(opened)) => self.current = Some(opened),
                    Ok(None) => continue,
                    Err(e) => return Some(Err(e.into())),
                }
            }
            let Some(current) = self.current.as_mut() else {
                continue;
            };

            self.line.clear();
            match current.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => {
                    self.current = None;
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    self.current = None;
                    return Some(Err(e.into()));
                }
            }
            current.line_no += 1;

            // Rows are only visible once terminated.
            if self.line.last() != Some(&b'\n') {
                self.current = None;
                continue;
            }
            if current.line_no == 1 {
                if self.line != partition::header_line().as_bytes() {
                    warn!("Skipping {}: unexpected header row", current.path.display());
                    self.current = None;
                }
                continue;
            }

            let sample = match self.decoder.decode(&self.line) {
                Ok(sample) => sample,
                Err(reason) => {
                    warn!(
                        "Skipping corrupt row {} of {}: {}",
                        current.line_no,
                        current.path.display(),
                        reason
                    );
                    continue;
                }
            };

            if self.query.past_end(sample.timestamp) {
                self.finish();
                return None;
            }
            if !self.query.matches(sample.timestamp) {
                continue;
            }

            self.yielded += 1;
            self.checkpoint = Some(sample.timestamp);
            return Some(Ok(sample));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Store, StoreOptions};
    use atmos_types::QualityFlag;
    use std::fs;
    use time::Duration;
    use time::macros::{date, datetime};

    fn sample(ts: OffsetDateTime) -> Sample {
        Sample {
            timestamp: ts,
            iaq: 60,
            voc_index: 55,
            co2eq_ppm: 610,
            pm25_aqi: 20,
            pm1_0: 2.0,
            pm2_5: 4.8,
            pm10: 6.1,
            temperature_c: 23.0,
            humidity_pct: 39.5,
            pressure_hpa: 1015.2,
            gas_resistance_ohm: 44_000.0,
            quality: QualityFlag::Nominal,
        }
    }

    /// Six samples an hour apart, straddling midnight.
    fn fill(root: &Path) -> Vec<Sample> {
        let mut store = Store::open(root, StoreOptions::default()).unwrap();
        let start = datetime!(2025-03-14 21:00 UTC);
        (0..6)
            .map(|i| {
                let s = sample(start + Duration::hours(i));
                store.append(&s).unwrap();
                s
            })
            .collect()
    }

    fn reader(root: &Path) -> StoreReader {
        StoreReader::new(root, UtcOffset::UTC)
    }

    fn timestamps(samples: Samples) -> Vec<OffsetDateTime> {
        samples.map(|s| s.unwrap().timestamp).collect()
    }

    #[test]
    fn test_query_all_spans_days() {
        let dir = tempfile::tempdir().unwrap();
        let written = fill(dir.path());
        let read: Vec<Sample> = reader(dir.path())
            .query(&SampleQuery::new())
            .unwrap()
            .map(|s| s.unwrap())
            .collect();
        assert_eq!(read, written);
    }

    #[test]
    fn test_query_time_range_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        fill(dir.path());
        let q = SampleQuery::new()
            .since(datetime!(2025-03-14 22:00 UTC))
            .until(datetime!(2025-03-15 00:00 UTC));
        assert_eq!(
            timestamps(reader(dir.path()).query(&q).unwrap()),
            vec![
                datetime!(2025-03-14 22:00 UTC),
                datetime!(2025-03-14 23:00 UTC),
                datetime!(2025-03-15 00:00 UTC),
            ]
        );
    }

    #[test]
    fn test_query_days() {
        let dir = tempfile::tempdir().unwrap();
        fill(dir.path());
        let q = SampleQuery::new().days(date!(2025 - 03 - 15), date!(2025 - 03 - 15));
        assert_eq!(reader(dir.path()).query(&q).unwrap().count(), 3);
    }

    #[test]
    fn test_checkpoint_resume() {
        let dir = tempfile::tempdir().unwrap();
        let written = fill(dir.path());
        let r = reader(dir.path());

        let mut first = r.query(&SampleQuery::new().limit(4)).unwrap();
        assert_eq!(first.by_ref().count(), 4);
        assert_eq!(first.checkpoint(), Some(written[3].timestamp));

        let rest = r
            .query(&SampleQuery::new().resume_after(first.checkpoint()))
            .unwrap();
        assert_eq!(
            timestamps(rest),
            written[4..].iter().map(|s| s.timestamp).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_snapshot_ignores_later_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path(), StoreOptions::default()).unwrap();
        let t0 = datetime!(2025-03-14 08:00 UTC);
        store.append(&sample(t0)).unwrap();

        let mut samples = store.reader().query(&SampleQuery::new()).unwrap();
        store.append(&sample(t0 + Duration::seconds(2))).unwrap();

        assert_eq!(samples.next().unwrap().unwrap().timestamp, t0);
        assert!(samples.next().is_none());
    }

    #[test]
    fn test_corrupt_row_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let written = fill(dir.path());
        let path = partition::plain_path(dir.path(), date!(2025 - 03 - 14));
        let mut text = fs::read_to_string(&path).unwrap();
        let header_end = text.find('\n').unwrap() + 1;
        text.insert_str(header_end, "not,a,sample\n");
        fs::write(&path, text).unwrap();

        let read = reader(dir.path()).query(&SampleQuery::new()).unwrap().count();
        assert_eq!(read, written.len());
    }

    #[test]
    fn test_usage_and_latest() {
        let dir = tempfile::tempdir().unwrap();
        let written = fill(dir.path());
        let r = reader(dir.path());

        let usage = r.usage().unwrap();
        assert_eq!(usage.partitions, 2);
        assert_eq!(usage.compressed_partitions, 0);
        assert_eq!(usage.oldest, Some(date!(2025 - 03 - 14)));
        assert_eq!(usage.newest, Some(date!(2025 - 03 - 15)));
        assert!(usage.total_bytes > 0);

        assert_eq!(r.latest().unwrap(), written.last().copied());
    }

    #[test]
    fn test_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let r = reader(&dir.path().join("missing"));
        assert_eq!(r.query(&SampleQuery::new()).unwrap().count(), 0);
        assert_eq!(r.usage().unwrap(), StorageUsage::default());
        assert!(r.latest().unwrap().is_none());
    }
}
