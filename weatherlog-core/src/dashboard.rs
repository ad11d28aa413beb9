//! Read-only aggregates over stored records, for charts and summaries.

use chrono::{DateTime, NaiveDate, Utc};
use log::warn;
use std::collections::{BTreeMap, HashMap};

use crate::{
    model::{DateRange, UpdateStats, WeatherRecord},
    store::{RecordStore, write_csv},
};

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub latest: WeatherRecord,
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub mean_humidity: f64,
    pub most_common_condition: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperaturePoint {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub feels_like: f64,
    pub is_forecast: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyRange {
    pub date: NaiveDate,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureHumidityPoint {
    pub timestamp: DateTime<Utc>,
    pub pressure: f64,
    pub humidity: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindPoint {
    pub timestamp: DateTime<Utc>,
    pub speed: f64,
    pub direction: u16,
    pub temperature: f64,
}

/// A filtered, time-ordered snapshot of the store, plus the collector's run history.
#[derive(Debug, Clone, Default)]
pub struct DashboardView {
    records: Vec<WeatherRecord>,
    stats: Option<UpdateStats>,
}

impl DashboardView {
    /// Load records for `range`. An unreadable or missing store is shown as "no data yet".
    pub fn load(store: &RecordStore, range: Option<DateRange>) -> Self {
        let records = match store.load_all(range) {
            Ok(records) => records,
            Err(e) => {
                if !e.is_missing() {
                    warn!("Showing empty dashboard, {}: {e}", e.kind());
                }
                Vec::new()
            }
        };

        let stats = match store.load_stats() {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("Run history unavailable, {}: {e}", e.kind());
                None
            }
        };

        Self { records, stats }
    }

    pub fn from_records(mut records: Vec<WeatherRecord>) -> Self {
        records.sort_by_key(|r| r.timestamp);
        Self {
            records,
            stats: None,
        }
    }

    pub fn with_stats(self, stats: UpdateStats) -> Self {
        Self {
            stats: Some(stats),
            ..self
        }
    }

    pub fn records(&self) -> &[WeatherRecord] {
        &self.records
    }

    pub fn stats(&self) -> Option<&UpdateStats> {
        self.stats.as_ref()
    }

    /// Text of the most recent failed run, if any run has failed.
    pub fn last_error(&self) -> Option<&str> {
        self.stats.as_ref()?.last_error.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn summary(&self) -> Option<Summary> {
        let first = self.records.first()?;
        let latest = self.records.last()?;

        let temps = self.records.iter().map(|r| r.temperature);
        let min_temperature = temps.clone().fold(f64::INFINITY, f64::min);
        let max_temperature = temps.fold(f64::NEG_INFINITY, f64::max);
        let mean_humidity = self
            .records
            .iter()
            .map(|r| f64::from(r.humidity))
            .sum::<f64>()
            / self.records.len() as f64;

        let most_common_condition = self
            .condition_distribution()
            .into_iter()
            .next()
            .map(|(label, _)| label)
            .unwrap_or_default();

        Some(Summary {
            count: self.records.len(),
            first: first.timestamp,
            last: latest.timestamp,
            latest: latest.clone(),
            min_temperature,
            max_temperature,
            mean_humidity,
            most_common_condition,
        })
    }

    pub fn temperature_series(&self) -> Vec<TemperaturePoint> {
        self.records
            .iter()
            .map(|r| TemperaturePoint {
                timestamp: r.timestamp,
                temperature: r.temperature,
                feels_like: r.feels_like,
                is_forecast: r.is_forecast,
            })
            .collect()
    }

    /// Condition labels with their counts, most frequent first, ties by label.
    pub fn condition_distribution(&self) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for r in &self.records {
            *counts.entry(r.condition.as_str()).or_default() += 1;
        }

        let mut out: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(label, n)| (label.to_string(), n))
            .collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }

    /// `(temperature, humidity)` pairs for a scatter chart.
    pub fn humidity_temperature_pairs(&self) -> Vec<(f64, f64)> {
        self.records
            .iter()
            .map(|r| (r.temperature, f64::from(r.humidity)))
            .collect()
    }

    /// Pearson correlation between temperature and humidity.
    pub fn temperature_humidity_correlation(&self) -> Option<f64> {
        pearson(&self.humidity_temperature_pairs())
    }

    pub fn daily_ranges(&self) -> Vec<DailyRange> {
        let mut days: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
        for r in &self.records {
            days.entry(r.timestamp.date_naive())
                .or_default()
                .push(r.temperature);
        }

        days.into_iter()
            .map(|(date, temps)| DailyRange {
                date,
                min: temps.iter().copied().fold(f64::INFINITY, f64::min),
                max: temps.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                mean: temps.iter().sum::<f64>() / temps.len() as f64,
            })
            .collect()
    }

    pub fn pressure_humidity_series(&self) -> Vec<PressureHumidityPoint> {
        self.records
            .iter()
            .map(|r| PressureHumidityPoint {
                timestamp: r.timestamp,
                pressure: r.pressure,
                humidity: r.humidity,
            })
            .collect()
    }

    /// Points with measurable wind only.
    pub fn wind_points(&self) -> Vec<WindPoint> {
        self.records
            .iter()
            .filter(|r| r.wind_speed > 0.0)
            .map(|r| WindPoint {
                timestamp: r.timestamp,
                speed: r.wind_speed,
                direction: r.wind_direction,
                temperature: r.temperature,
            })
            .collect()
    }

    /// The filtered view in the store's CSV schema.
    pub fn to_csv(&self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        write_csv(&mut buf, &self.records)?;
        Ok(buf)
    }
}

fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::COLUMNS;
    use chrono::TimeZone;

    fn record(day: u32, hour: u32, temperature: f64, humidity: u8, condition: &str) -> WeatherRecord {
        WeatherRecord {
            timestamp: Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).unwrap(),
            city: "Hamburg".into(),
            country: "DE".into(),
            temperature,
            feels_like: temperature - 0.5,
            humidity,
            pressure: 1010.0,
            wind_speed: if hour == 0 { 0.0 } else { 3.5 },
            wind_direction: 180,
            condition: condition.into(),
            description: String::new(),
            cloudiness: 40,
            visibility: 8.5,
            is_forecast: false,
        }
    }

    fn at_pressure(mut r: WeatherRecord, pressure: f64) -> WeatherRecord {
        r.pressure = pressure;
        r
    }

    fn sample() -> DashboardView {
        DashboardView::from_records(vec![
            record(2, 12, 22.0, 50, "Clear"),
            record(1, 0, 14.0, 80, "Rain"),
            record(1, 12, 19.0, 60, "Clouds"),
            record(2, 0, 16.0, 75, "Clouds"),
        ])
    }

    #[test]
    fn summary_reports_latest_and_extremes() {
        let summary = sample().summary().unwrap();

        assert_eq!(summary.count, 4);
        assert_eq!(summary.latest.temperature, 22.0);
        assert_eq!(summary.min_temperature, 14.0);
        assert_eq!(summary.max_temperature, 22.0);
        assert!((summary.mean_humidity - 66.25).abs() < 1e-9);
        assert_eq!(summary.most_common_condition, "Clouds");
        assert!(summary.first < summary.last);
    }

    #[test]
    fn empty_view_has_no_summary() {
        let view = DashboardView::default();
        assert!(view.is_empty());
        assert!(view.summary().is_none());
        assert!(view.temperature_humidity_correlation().is_none());
    }

    #[test]
    fn distribution_orders_by_count_then_label() {
        let dist = sample().condition_distribution();
        assert_eq!(
            dist,
            vec![
                ("Clouds".to_string(), 2),
                ("Clear".to_string(), 1),
                ("Rain".to_string(), 1),
            ]
        );
    }

    #[test]
    fn warmer_hours_are_drier_in_sample() {
        let r = sample().temperature_humidity_correlation().unwrap();
        assert!(r < -0.9, "expected strong negative correlation, got {r}");
    }

    #[test]
    fn daily_ranges_group_by_utc_day() {
        let days = sample().daily_ranges();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].min, 14.0);
        assert_eq!(days[0].max, 19.0);
        assert_eq!(days[1].mean, 19.0);
    }

    #[test]
    fn pressure_and_humidity_follow_time_order() {
        let view = DashboardView::from_records(vec![
            at_pressure(record(1, 12, 19.0, 60, "Clouds"), 1008.5),
            at_pressure(record(1, 0, 14.0, 80, "Rain"), 1002.0),
        ]);

        let series = view.pressure_humidity_series();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].pressure, 1002.0);
        assert_eq!(series[0].humidity, 80);
        assert_eq!(series[1].pressure, 1008.5);
        assert!(series[0].timestamp < series[1].timestamp);
    }

    #[test]
    fn calm_points_are_left_out_of_wind_chart() {
        assert_eq!(sample().wind_points().len(), 2);
    }

    #[test]
    fn csv_export_uses_store_schema() {
        let csv = String::from_utf8(sample().to_csv().unwrap()).unwrap();
        let mut lines = csv.lines();

        assert_eq!(lines.next().unwrap(), COLUMNS.join(","));
        assert_eq!(lines.count(), 4);

        let empty = String::from_utf8(DashboardView::default().to_csv().unwrap()).unwrap();
        assert_eq!(empty.trim_end(), COLUMNS.join(","));
    }

    #[test]
    fn missing_store_loads_as_empty_view() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path());

        let view = DashboardView::load(&store, None);
        assert!(view.is_empty());
        assert_eq!(view.stats().map(|s| s.total_runs), Some(0));
        assert!(view.last_error().is_none());
    }

    #[test]
    fn failed_runs_surface_last_error_without_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path());
        store
            .record_run_outcome(false, Some("AuthError: Invalid API key"))
            .unwrap();

        let view = DashboardView::load(&store, None);

        assert!(view.is_empty());
        assert_eq!(view.last_error(), Some("AuthError: Invalid API key"));
        let stats = view.stats().unwrap();
        assert_eq!(stats.failed_runs, 1);
        assert!(stats.last_failure.is_some());
    }
}
