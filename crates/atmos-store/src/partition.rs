//! On-disk layout and row encoding of day partitions.
//!
//! ```text
//! <root>/2025/03/14.csv        open, or closed but not yet compressed
//! <root>/2025/03/13.csv.sz     closed and compressed (snappy frame format)
//! ```
//!
//! A partition is a header row followed by one `\n`-terminated CSV row per
//! sample. Rows are only ever appended, so a crash can leave at most one
//! incomplete row at the end of the newest partition.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use csv::StringRecord;
use serde::Serialize;
use time::{Date, Month, OffsetDateTime, UtcOffset};
use tracing::debug;

use atmos_types::Sample;

use crate::error::{Result, StoreError};

/// Column names, in `Sample` field order.
pub const COLUMNS: [&str; 13] = [
    "timestamp",
    "iaq",
    "voc_index",
    "co2eq_ppm",
    "pm25_aqi",
    "pm1_0",
    "pm2_5",
    "pm10",
    "temperature_c",
    "humidity_pct",
    "pressure_hpa",
    "gas_resistance_ohm",
    "quality",
];

const PLAIN_SUFFIX: &str = ".csv";
const COMPRESSED_SUFFIX: &str = ".csv.sz";
pub(crate) const TMP_SUFFIX: &str = ".tmp";

/// The header row, including its terminator.
pub(crate) fn header_line() -> String {
    let mut line = COLUMNS.join(",");
    line.push('\n');
    line
}

/// Calendar day a timestamp belongs to in the store's fixed offset.
pub fn day_of(timestamp: OffsetDateTime, offset: UtcOffset) -> Date {
    timestamp.to_offset(offset).date()
}

/// Directory holding the partitions of `date`'s month.
pub(crate) fn month_dir(root: &Path, date: Date) -> PathBuf {
    root.join(format!("{:04}", date.year()))
        .join(format!("{:02}", u8::from(date.month())))
}

/// Path of the plain partition for `date`.
pub fn plain_path(root: &Path, date: Date) -> PathBuf {
    month_dir(root, date).join(format!("{:02}{PLAIN_SUFFIX}", date.day()))
}

/// Path of the compressed partition for `date`.
pub fn compressed_path(root: &Path, date: Date) -> PathBuf {
    month_dir(root, date).join(format!("{:02}{COMPRESSED_SUFFIX}", date.day()))
}

/// Append `.tmp` to a path.
pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

/// One day partition as found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionInfo {
    /// Calendar day of the partition.
    pub date: Date,
    /// File holding the partition.
    pub path: PathBuf,
    /// Whether the file is snappy compressed.
    pub compressed: bool,
    /// Size of the file in bytes.
    pub size_bytes: u64,
}

/// A file under the month directories that is not a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Leftover {
    /// Interrupted compression output.
    Temporary(PathBuf),
    /// Plain file next to a completed compressed copy of the same day.
    Shadowed { plain: PathBuf, compressed: PathBuf },
}

/// Everything found under the store root.
#[derive(Debug, Default)]
pub(crate) struct Listing {
    /// Partitions ordered by date, one per day.
    pub partitions: Vec<PartitionInfo>,
    pub leftovers: Vec<Leftover>,
    /// Month and year directories, deepest first.
    pub directories: Vec<PathBuf>,
}

fn numeric_dir(entry: &fs::DirEntry, digits: usize) -> Option<u32> {
    let name = entry.file_name();
    let name = name.to_str()?;
    if name.len() != digits || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !entry.file_type().ok()?.is_dir() {
        return None;
    }
    name.parse().ok()
}

fn parse_day(name: &str) -> Option<(u8, bool)> {
    let (day, compressed) = if let Some(day) = name.strip_suffix(COMPRESSED_SUFFIX) {
        (day, true)
    } else {
        (name.strip_suffix(PLAIN_SUFFIX)?, false)
    };
    if day.len() != 2 || !day.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((day.parse().ok()?, compressed))
}

/// Directory entries sorted by name. A directory removed concurrently reads
/// as empty.
fn sorted_entries(dir: &Path) -> io::Result<Vec<fs::DirEntry>> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut entries = read.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(fs::DirEntry::file_name);
    Ok(entries)
}

/// Walk the store root.
///
/// Files that vanish during the walk are skipped; the retention maintainer
/// and readers run concurrently with each other.
pub(crate) fn list(root: &Path) -> Result<Listing> {
    let mut listing = Listing::default();
    for year_entry in sorted_entries(root)? {
        let Some(year) = numeric_dir(&year_entry, 4) else {
            continue;
        };
        let year_path = year_entry.path();
        for month_entry in sorted_entries(&year_path)? {
            let Some(month) = numeric_dir(&month_entry, 2) else {
                continue;
            };
            let Ok(month) = Month::try_from(month as u8) else {
                continue;
            };
            let month_path = month_entry.path();
            list_month(&month_path, year as i32, month, &mut listing)?;
            listing.directories.push(month_path);
        }
        listing.directories.push(year_path);
    }

    listing.partitions.sort_by_key(|p| p.date);
    Ok(listing)
}

fn list_month(dir: &Path, year: i32, month: Month, listing: &mut Listing) -> Result<()> {
    let mut plain: Vec<PartitionInfo> = Vec::new();
    let mut compressed: Vec<PartitionInfo> = Vec::new();

    for entry in sorted_entries(dir)? {
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if name.ends_with(TMP_SUFFIX) {
            listing.leftovers.push(Leftover::Temporary(path));
            continue;
        }
        let Some((day, is_compressed)) = parse_day(&name) else {
            debug!("Ignoring unexpected file {}", path.display());
            continue;
        };
        let Ok(date) = Date::from_calendar_date(year, month, day) else {
            debug!("Ignoring partition with invalid date {}", path.display());
            continue;
        };
        let size_bytes = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        let info = PartitionInfo {
            date,
            path,
            compressed: is_compressed,
            size_bytes,
        };
        if is_compressed {
            compressed.push(info);
        } else {
            plain.push(info);
        }
    }

    for info in plain {
        if let Some(copy) = compressed.iter().find(|c| c.date == info.date) {
            listing.leftovers.push(Leftover::Shadowed {
                plain: info.path,
                compressed: copy.path.clone(),
            });
        } else {
            listing.partitions.push(info);
        }
    }
    listing.partitions.extend(compressed);
    Ok(())
}

/// Encode one sample as a terminated CSV row.
pub(crate) fn encode_row(sample: &Sample) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::with_capacity(160));
    writer.serialize(sample)?;
    writer
        .into_inner()
        .map_err(|e| StoreError::Io(e.into_error()))
}

/// Decoder for rows of one partition.
#[derive(Debug)]
pub(crate) struct RowDecoder {
    header: StringRecord,
}

impl RowDecoder {
    pub fn new() -> Self {
        Self {
            header: StringRecord::from(COLUMNS.to_vec()),
        }
    }

    /// Decode a complete row. The terminator is optional.
    pub fn decode(&self, line: &[u8]) -> std::result::Result<Sample, String> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let text = std::str::from_utf8(line).map_err(|_| "row is not valid UTF-8".to_string())?;
        let record: StringRecord = text.split(',').collect();
        if record.len() != COLUMNS.len() {
            return Err(format!(
                "expected {} fields, found {}",
                COLUMNS.len(),
                record.len()
            ));
        }
        record
            .deserialize::<Sample>(Some(&self.header))
            .map_err(|e| e.to_string())
    }
}

/// State of a partition's header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeaderState {
    /// Zero-length file.
    Empty,
    /// Header cut short by a crash.
    Torn,
    Valid,
    /// First row is not our header.
    Foreign,
}

/// Result of scanning a partition for its valid prefix.
#[derive(Debug)]
pub(crate) struct Scan {
    pub header: HeaderState,
    /// Length of the prefix ending with the last complete, decodable row.
    pub valid_len: u64,
    /// Bytes read in total.
    pub total_len: u64,
    /// Decodable rows in the valid prefix.
    pub rows: u64,
    /// Undecodable complete rows before the end of the valid prefix.
    pub corrupt_rows: u64,
    /// Last decodable sample.
    pub last: Option<Sample>,
}

impl Scan {
    /// Bytes past the valid prefix.
    pub fn discarded(&self) -> u64 {
        self.total_len - self.valid_len
    }
}

/// Scan a partition stream and find where its valid prefix ends.
pub(crate) fn scan<R: Read>(reader: R) -> io::Result<Scan> {
    let mut reader = BufReader::new(reader);
    let decoder = RowDecoder::new();
    let header = header_line();
    let mut line = Vec::with_capacity(256);

    let mut scan = Scan {
        header: HeaderState::Empty,
        valid_len: 0,
        total_len: 0,
        rows: 0,
        corrupt_rows: 0,
        last: None,
    };

    let n = reader.read_until(b'\n', &mut line)?;
    scan.total_len = n as u64;
    if n == 0 {
        return Ok(scan);
    }
    if line.last() != Some(&b'\n') {
        scan.header = HeaderState::Torn;
        return Ok(scan);
    }
    if line != header.as_bytes() {
        scan.header = HeaderState::Foreign;
        return Ok(scan);
    }
    scan.header = HeaderState::Valid;
    scan.valid_len = scan.total_len;

    let mut pending_corrupt = 0;
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        scan.total_len += n as u64;
        if line.last() != Some(&b'\n') {
            break;
        }
        match decoder.decode(&line) {
            Ok(sample) => {
                scan.rows += 1;
                scan.corrupt_rows += pending_corrupt;
                pending_corrupt = 0;
                scan.valid_len = scan.total_len;
                scan.last = Some(sample);
            }
            Err(_) => pending_corrupt += 1,
        }
    }
    Ok(scan)
}

/// Call `f` with each decodable row in the first `limit` bytes of a
/// partition stream, header excluded.
pub(crate) fn for_each_row<R, F>(reader: R, limit: u64, mut f: F) -> io::Result<()>
where
    R: Read,
    F: FnMut(Sample, &[u8]) -> io::Result<()>,
{
    let mut reader = BufReader::new(reader.take(limit));
    let decoder = RowDecoder::new();
    let mut line = Vec::with_capacity(256);

    reader.read_until(b'\n', &mut line)?;
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 || line.last() != Some(&b'\n') {
            return Ok(());
        }
        if let Ok(sample) = decoder.decode(&line) {
            f(sample, &line)?;
        }
    }
}

/// Open a partition for reading, decompressing if needed.
pub(crate) fn open_reader(path: &Path, compressed: bool) -> io::Result<Box<dyn Read + Send>> {
    let file = File::open(path)?;
    if compressed {
        Ok(Box::new(snap::read::FrameDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atmos_types::QualityFlag;
    use time::macros::{date, datetime, offset};

    fn sample(ts: OffsetDateTime) -> Sample {
        Sample {
            timestamp: ts,
            iaq: 42,
            voc_index: 35,
            co2eq_ppm: 540,
            pm25_aqi: 17,
            pm1_0: 2.1,
            pm2_5: 4.2,
            pm10: 6.3,
            temperature_c: 21.4,
            humidity_pct: 44.9,
            pressure_hpa: 1009.8,
            gas_resistance_ohm: 48_712.0,
            quality: QualityFlag::WarmingUp,
        }
    }

    #[test]
    fn test_columns_follow_field_order() {
        let json = serde_json::to_string(&sample(OffsetDateTime::UNIX_EPOCH)).unwrap();
        let positions: Vec<usize> = COLUMNS
            .iter()
            .map(|c| json.find(&format!("\"{c}\":")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(json.matches("\":").count(), COLUMNS.len());
    }

    #[test]
    fn test_paths() {
        let root = Path::new("/data");
        assert_eq!(
            plain_path(root, date!(2025 - 03 - 04)),
            PathBuf::from("/data/2025/03/04.csv")
        );
        assert_eq!(
            compressed_path(root, date!(2025 - 12 - 31)),
            PathBuf::from("/data/2025/12/31.csv.sz")
        );
        assert_eq!(
            tmp_path(&compressed_path(root, date!(2025 - 12 - 31))),
            PathBuf::from("/data/2025/12/31.csv.sz.tmp")
        );
    }

    #[test]
    fn test_day_of_uses_offset() {
        let ts = datetime!(2025-03-14 23:30 UTC);
        assert_eq!(day_of(ts, UtcOffset::UTC), date!(2025 - 03 - 14));
        assert_eq!(day_of(ts, offset!(+1)), date!(2025 - 03 - 15));
        assert_eq!(day_of(ts, offset!(-5)), date!(2025 - 03 - 14));
    }

    #[test]
    fn test_parse_day() {
        assert_eq!(parse_day("07.csv"), Some((7, false)));
        assert_eq!(parse_day("31.csv.sz"), Some((31, true)));
        assert_eq!(parse_day("7.csv"), None);
        assert_eq!(parse_day("07.txt"), None);
        assert_eq!(parse_day("ab.csv"), None);
    }

    #[test]
    fn test_row_decodes_to_same_sample() {
        let s = sample(datetime!(2025-03-14 08:15:02.5 +01:00));
        let row = encode_row(&s).unwrap();
        assert_eq!(row.last(), Some(&b'\n'));
        assert_eq!(RowDecoder::new().decode(&row).unwrap(), s);
    }

    #[test]
    fn test_decode_rejects_short_row() {
        let err = RowDecoder::new().decode(b"2025-03-14T08:15:02Z,42\n").unwrap_err();
        assert!(err.contains("expected 13 fields"));
    }

    #[test]
    fn test_scan_stops_at_torn_row() {
        let mut bytes = header_line().into_bytes();
        let a = encode_row(&sample(datetime!(2025-03-14 08:00 UTC))).unwrap();
        let b = encode_row(&sample(datetime!(2025-03-14 08:00:02 UTC))).unwrap();
        bytes.extend_from_slice(&a);
        bytes.extend_from_slice(&b);
        let complete = bytes.len() as u64;
        bytes.extend_from_slice(&b[..20]);

        let scan = scan(&bytes[..]).unwrap();
        assert_eq!(scan.header, HeaderState::Valid);
        assert_eq!(scan.rows, 2);
        assert_eq!(scan.valid_len, complete);
        assert_eq!(scan.discarded(), 20);
        assert_eq!(
            scan.last.map(|s| s.timestamp),
            Some(datetime!(2025-03-14 08:00:02 UTC))
        );
    }

    #[test]
    fn test_scan_keeps_corrupt_row_followed_by_valid_row() {
        let mut bytes = header_line().into_bytes();
        bytes.extend_from_slice(b"garbage\n");
        bytes.extend_from_slice(&encode_row(&sample(datetime!(2025-03-14 08:00 UTC))).unwrap());
        bytes.extend_from_slice(b"more garbage\n");

        let scan = scan(&bytes[..]).unwrap();
        assert_eq!(scan.rows, 1);
        assert_eq!(scan.corrupt_rows, 1);
        assert_eq!(scan.discarded(), b"more garbage\n".len() as u64);
    }

    #[test]
    fn test_scan_header_states() {
        assert_eq!(scan(&b""[..]).unwrap().header, HeaderState::Empty);
        assert_eq!(scan(&b"timestamp,iaq"[..]).unwrap().header, HeaderState::Torn);
        assert_eq!(scan(&b"a,b,c\n"[..]).unwrap().header, HeaderState::Foreign);
    }
}
