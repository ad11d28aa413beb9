use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// One observed or forecast weather point.
///
/// Field order is the column order of the stored CSV file and of every export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub timestamp: DateTime<Utc>,
    pub city: String,
    pub country: String,
    pub temperature: f64,
    pub feels_like: f64,
    pub humidity: u8,
    pub pressure: f64,
    pub wind_speed: f64,
    pub wind_direction: u16,
    pub condition: String,
    pub description: String,
    pub cloudiness: u8,
    /// Kilometres. Files written before this column existed load as 0.
    #[serde(default)]
    pub visibility: f64,
    pub is_forecast: bool,
}

impl WeatherRecord {
    /// Uniqueness key inside the store.
    pub fn key(&self) -> (DateTime<Utc>, bool) {
        (self.timestamp, self.is_forecast)
    }
}

/// Closed timestamp interval used to filter stored records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// Covers whole UTC days, from the start of `from` to the last second of `to`.
    pub fn from_dates(from: NaiveDate, to: NaiveDate) -> Self {
        let start = from.and_time(NaiveTime::MIN).and_utc();
        let end = to
            .and_hms_opt(23, 59, 59)
            .map(|ndt| ndt.and_utc())
            .unwrap_or(start);
        Self { from: start, to: end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.from <= ts && ts <= self.to
    }
}

/// Cumulative collection-run metadata, persisted across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub tracking_since: DateTime<Utc>,
}

impl UpdateStats {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            last_success: None,
            last_failure: None,
            last_error: None,
            tracking_since: now,
        }
    }

    pub fn record(&mut self, success: bool, error: Option<String>, now: DateTime<Utc>) {
        self.total_runs += 1;
        if success {
            self.successful_runs += 1;
            self.last_success = Some(now);
        } else {
            self.failed_runs += 1;
            self.last_failure = Some(now);
            self.last_error = Some(error.unwrap_or_else(|| "unknown error".to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn date_range_is_closed_on_both_ends() {
        let from = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let range = DateRange::from_dates(from, to);

        assert!(range.contains(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()));
        assert!(range.contains(Utc.with_ymd_and_hms(2025, 6, 2, 23, 59, 59).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2025, 5, 31, 23, 59, 59).unwrap()));
    }

    #[test]
    fn stats_keep_totals_consistent() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut stats = UpdateStats::new(t0);

        stats.record(true, None, t0);
        stats.record(false, Some("AuthError: bad key".into()), t0);
        stats.record(true, None, t0);

        assert_eq!(stats.total_runs, 3);
        assert_eq!(stats.successful_runs, 2);
        assert_eq!(stats.failed_runs, 1);
        assert_eq!(stats.last_error.as_deref(), Some("AuthError: bad key"));
        assert_eq!(stats.last_success, Some(t0));
    }

    #[test]
    fn success_keeps_previous_error_text() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut stats = UpdateStats::new(t0);
        stats.record(false, None, t0);
        stats.record(true, None, t0);

        assert_eq!(stats.last_error.as_deref(), Some("unknown error"));
    }
}
