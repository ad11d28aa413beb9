//! Flat-file persistence for collected records and run statistics.
//!
//! Every write goes to a temporary file in the data directory and is renamed over the
//! target, so a reader in another process sees either the old or the new file, never a
//! partial one. Only one writer is supported.

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, BufReader, ErrorKind, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

use crate::{
    config::Config,
    error::StoreError,
    model::{DateRange, UpdateStats, WeatherRecord},
};

pub const RECORDS_FILE: &str = "weather_data.csv";
pub const STATS_FILE: &str = "update_stats.json";
pub const MARKER_FILE: &str = "collecting.marker";

/// Header of the records file and of every CSV export.
pub const COLUMNS: [&str; 14] = [
    "timestamp",
    "city",
    "country",
    "temperature",
    "feels_like",
    "humidity",
    "pressure",
    "wind_speed",
    "wind_direction",
    "condition",
    "description",
    "cloudiness",
    "visibility",
    "is_forecast",
];

#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
    records_path: PathBuf,
    stats_path: PathBuf,
    marker_path: PathBuf,
}

impl RecordStore {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            records_path: dir.join(RECORDS_FILE),
            stats_path: dir.join(STATS_FILE),
            marker_path: dir.join(MARKER_FILE),
            dir,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::open(config.data_dir())
    }

    pub fn records_path(&self) -> &Path {
        &self.records_path
    }

    pub fn stats_path(&self) -> &Path {
        &self.stats_path
    }

    /// Merge `records` into the store, keyed by `(timestamp, is_forecast)`.
    ///
    /// A re-collected point replaces the stored one. Either the whole batch lands or the file
    /// is left untouched. Returns how many keys were new.
    pub fn append(&self, records: &[WeatherRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let existing = match read_records(&self.records_path) {
            Ok(existing) => existing,
            Err(e) if e.is_missing() => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut merged: BTreeMap<(DateTime<Utc>, bool), WeatherRecord> =
            existing.into_iter().map(|r| (r.key(), r)).collect();
        let before = merged.len();

        for record in records {
            merged.insert(record.key(), record.clone());
        }
        let added = merged.len() - before;

        let rows: Vec<WeatherRecord> = merged.into_values().collect();
        self.replace(&self.records_path, |file| write_csv(file, &rows))?;

        debug!(
            "Merged {} record(s) into {}: {added} new, {} total",
            records.len(),
            self.records_path.display(),
            rows.len()
        );
        Ok(added)
    }

    /// All stored records in ascending timestamp order, optionally limited to `range`.
    ///
    /// A missing or unreadable file is reported as [`StoreError::Read`]; callers that only
    /// display data should treat that as an empty store.
    pub fn load_all(&self, range: Option<DateRange>) -> Result<Vec<WeatherRecord>, StoreError> {
        let mut records = read_records(&self.records_path)?;
        records.sort_by_key(|r| r.timestamp);

        if let Some(range) = range {
            records.retain(|r| range.contains(r.timestamp));
        }
        Ok(records)
    }

    /// Delete records older than `now - older_than`. Returns the number removed.
    pub fn prune(&self, older_than: TimeDelta) -> Result<usize, StoreError> {
        match Utc::now().checked_sub_signed(older_than) {
            Some(cutoff) => self.prune_before(cutoff),
            None => {
                debug!(
                    "Retention of {} days reaches past the calendar, nothing to prune",
                    older_than.num_days()
                );
                Ok(0)
            }
        }
    }

    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = match read_records(&self.records_path) {
            Ok(records) => records,
            Err(e) if e.is_missing() => return Ok(0),
            Err(e) => return Err(e),
        };

        let initial = records.len();
        records.retain(|r| r.timestamp >= cutoff);
        let removed = initial - records.len();

        if removed == 0 {
            debug!("No records older than {cutoff} to remove");
            return Ok(0);
        }

        records.sort_by_key(|r| r.key());
        self.replace(&self.records_path, |file| write_csv(file, &records))?;

        info!("Removed {removed} record(s) older than {cutoff}");
        Ok(removed)
    }

    /// Stats from disk; a store that never ran yet starts with zeroed stats.
    pub fn load_stats(&self) -> Result<UpdateStats, StoreError> {
        match self.read_stats_file()? {
            Some(contents) => {
                serde_json::from_str(&contents).map_err(|e| StoreError::read(&self.stats_path, e))
            }
            None => Ok(UpdateStats::new(Utc::now())),
        }
    }

    /// Record one finished cycle. The stats file is rewritten as a whole.
    ///
    /// Unparseable stats restart from zero. A file that cannot be read at all fails with
    /// [`StoreError::Read`] and is left alone.
    pub fn record_run_outcome(
        &self,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<UpdateStats, StoreError> {
        let now = Utc::now();
        let mut stats = match self.read_stats_file()? {
            Some(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!(
                    "Starting fresh update stats, {} is corrupted: {e}",
                    self.stats_path.display()
                );
                UpdateStats::new(now)
            }),
            None => UpdateStats::new(now),
        };

        stats.record(success, error_message.map(str::to_string), now);

        let json = serde_json::to_vec_pretty(&stats)
            .map_err(|e| StoreError::write(&self.stats_path, e))?;
        self.replace(&self.stats_path, |file| file.write_all(&json))?;

        Ok(stats)
    }

    pub fn mark_in_flight(&self, started_at: DateTime<Utc>) -> Result<(), StoreError> {
        let stamp = started_at.to_rfc3339();
        self.replace(&self.marker_path, |file| file.write_all(stamp.as_bytes()))
    }

    pub fn clear_in_flight(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.marker_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::write(&self.marker_path, e)),
        }
    }

    /// Start time of the cycle currently collecting, as seen from any process.
    pub fn in_flight_since(&self) -> Option<DateTime<Utc>> {
        let contents = fs::read_to_string(&self.marker_path).ok()?;
        DateTime::parse_from_rfc3339(contents.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn read_stats_file(&self) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(&self.stats_path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::read(&self.stats_path, e)),
        }
    }

    fn replace<F>(&self, target: &Path, write: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut File) -> io::Result<()>,
    {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::write(target, e))?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| StoreError::write(target, e))?;
        write(tmp.as_file_mut()).map_err(|e| StoreError::write(target, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::write(target, e))?;
        tmp.persist(target)
            .map_err(|e| StoreError::write(target, e.error))?;

        Ok(())
    }
}

/// Serialize records with the store's header, even when there are none.
pub fn write_csv<W: Write>(writer: W, records: &[WeatherRecord]) -> io::Result<()> {
    let mut csv = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);

    csv.write_record(COLUMNS)?;
    for record in records {
        csv.serialize(record)?;
    }
    csv.flush()
}

fn read_records(path: &Path) -> Result<Vec<WeatherRecord>, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(StoreError::missing(path)),
        Err(e) => return Err(StoreError::read(path, e)),
    };

    csv::Reader::from_reader(BufReader::new(file))
        .deserialize()
        .collect::<Result<Vec<WeatherRecord>, csv::Error>>()
        .map_err(|e| StoreError::read(path, e))
}
