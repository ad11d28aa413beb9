use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use inquire::{Password, PasswordDisplayMode, Text};
use log::info;
use std::{
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tokio_util::sync::CancellationToken;
use weatherlog_core::{
    Config, DashboardView, DateRange, OpenWeatherSource, RecordStore, SchedulePolicy, Scheduler,
    StatusReport, logging,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "weatherlog",
    version,
    about = "Collects current weather and forecasts into a local history"
)]
pub struct Cli {
    /// Use this config file instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a single collection cycle, then print the status.
    Once,

    /// Collect repeatedly until interrupted with Ctrl-C.
    Run {
        /// Hours between cycles; overrides the configured interval.
        #[arg(long)]
        interval_hours: Option<u64>,
    },

    /// Print cumulative update statistics without collecting.
    Status,

    /// Set location and API key interactively.
    Configure,

    /// Summarize the stored history.
    Summary {
        /// First day to include (YYYY-MM-DD).
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day to include (YYYY-MM-DD).
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Write the stored history as CSV.
    Export {
        #[arg(long)]
        from: Option<NaiveDate>,

        #[arg(long)]
        to: Option<NaiveDate>,

        /// Output file; stdout if absent.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };

        match self.command {
            Command::Configure => configure(config, self.config.as_deref())?,
            Command::Status => {
                config.validate()?;
                let store = RecordStore::from_config(&config);
                let report = StatusReport::from_store(&store, Some(config.interval()))?;
                println!("{report}");
            }
            Command::Once => {
                config.validate()?;
                logging::init(&config.log_file(), config.general.log_level)?;

                let mut scheduler = build_scheduler(&config)?;
                info!("Running a single update");
                scheduler.run_cycle().await;
                println!("{}", scheduler.status()?);
            }
            Command::Run { interval_hours } => {
                if let Some(hours) = interval_hours {
                    config.schedule.interval_hours = hours;
                }
                config.validate()?;
                logging::init(&config.log_file(), config.general.log_level)?;

                let mut scheduler = build_scheduler(&config)?;
                println!("{}", scheduler.status()?);

                let shutdown = CancellationToken::new();
                let on_signal = shutdown.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Stop requested, finishing the current cycle");
                        on_signal.cancel();
                    }
                });

                scheduler.run_forever(shutdown).await;
            }
            Command::Summary { from, to } => {
                let store = RecordStore::from_config(&config);
                let view = DashboardView::load(&store, date_range(from, to));
                let mut text = String::new();
                write_summary(&mut text, &view)?;
                print!("{text}");
            }
            Command::Export { from, to, output } => {
                let store = RecordStore::from_config(&config);
                let view = DashboardView::load(&store, date_range(from, to));
                let csv = view.to_csv().context("Failed to render CSV export")?;

                match output {
                    Some(path) => {
                        fs::write(&path, csv)
                            .with_context(|| format!("Failed to write {}", path.display()))?;
                        eprintln!("Exported {} record(s) to {}", view.records().len(), path.display());
                    }
                    None => io::stdout().write_all(&csv)?,
                }
            }
        }

        Ok(())
    }
}

fn build_scheduler(config: &Config) -> Result<Scheduler<OpenWeatherSource>> {
    let source = OpenWeatherSource::from_config(config)?;
    let store = RecordStore::from_config(config);
    Ok(Scheduler::new(source, store, SchedulePolicy::from_config(config)))
}

fn configure(mut config: Config, path: Option<&Path>) -> Result<()> {
    config.location.city = Text::new("City:")
        .with_default(&config.location.city)
        .prompt()?;
    config.location.country = Text::new("Country code:")
        .with_default(&config.location.country)
        .prompt()?;

    let key = Password::new("OpenWeather API key (leave empty to keep the current one):")
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked)
        .prompt()?;
    if !key.trim().is_empty() {
        config.api.api_key = Some(key.trim().to_string());
    }

    config.validate()?;

    let path = match path {
        Some(p) => p.to_path_buf(),
        None => Config::config_file_path()?,
    };
    config.save_to(&path)?;
    println!("Configuration saved to {}", path.display());
    Ok(())
}

/// Either bound may be left open.
fn date_range(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Option<DateRange> {
    if from.is_none() && to.is_none() {
        return None;
    }
    Some(DateRange::from_dates(
        from.unwrap_or(NaiveDate::MIN),
        to.unwrap_or(NaiveDate::MAX),
    ))
}

fn write_summary(out: &mut impl fmt::Write, view: &DashboardView) -> fmt::Result {
    const TIME: &str = "%Y-%m-%d %H:%M";

    if let Some(stats) = view.stats() {
        writeln!(
            out,
            "Collector runs: {} ({} ok, {} failed)",
            stats.total_runs, stats.successful_runs, stats.failed_runs
        )?;
        if let Some(ts) = stats.last_success {
            writeln!(out, "Last success: {}", ts.format(TIME))?;
        }
        if let Some(ts) = stats.last_failure {
            writeln!(out, "Last failure: {}", ts.format(TIME))?;
        }
        if let Some(err) = view.last_error() {
            writeln!(out, "Last error: {err}")?;
        }
        writeln!(out)?;
    }

    let Some(summary) = view.summary() else {
        writeln!(
            out,
            "No data yet. Run `weatherlog once` to collect the first observations."
        )?;
        return Ok(());
    };

    let latest = &summary.latest;
    writeln!(
        out,
        "Records: {} ({} .. {})",
        summary.count,
        summary.first.format(TIME),
        summary.last.format(TIME)
    )?;
    writeln!(
        out,
        "Latest: {:.1}°C (feels like {:.1}°C), humidity {}%, wind {:.1} m/s from {}°, \
         visibility {:.1} km, {} ({})",
        latest.temperature,
        latest.feels_like,
        latest.humidity,
        latest.wind_speed,
        latest.wind_direction,
        latest.visibility,
        latest.condition,
        latest.description
    )?;
    writeln!(
        out,
        "Temperature range: {:.1}°C .. {:.1}°C",
        summary.min_temperature, summary.max_temperature
    )?;
    writeln!(out, "Mean humidity: {:.0}%", summary.mean_humidity)?;
    writeln!(out, "Most common condition: {}", summary.most_common_condition)?;
    if let Some(r) = view.temperature_humidity_correlation() {
        writeln!(out, "Temperature/humidity correlation: {r:.2}")?;
    }

    let pressures: Vec<f64> = view
        .pressure_humidity_series()
        .iter()
        .map(|p| p.pressure)
        .collect();
    if let (Some(first), Some(last)) = (pressures.first(), pressures.last()) {
        writeln!(
            out,
            "Pressure: {first:.0} hPa -> {last:.0} hPa ({:+.1})",
            last - first
        )?;
    }

    writeln!(out)?;
    writeln!(out, "Conditions:")?;
    for (label, count) in view.condition_distribution() {
        writeln!(out, "  {label:<14} {count:>5}")?;
    }

    writeln!(out)?;
    writeln!(out, "Daily temperatures:")?;
    for day in view.daily_ranges() {
        writeln!(
            out,
            "  {}  min {:>5.1}  max {:>5.1}  mean {:>5.1}",
            day.date, day.min, day.max, day.mean
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use clap::CommandFactory;
    use weatherlog_core::UpdateStats;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_interval_override() {
        let cli = Cli::try_parse_from(["weatherlog", "run", "--interval-hours", "6"]).unwrap();
        assert!(matches!(cli.command, Command::Run { interval_hours: Some(6) }));
    }

    #[test]
    fn export_parses_dates() {
        let cli = Cli::try_parse_from([
            "weatherlog",
            "--config",
            "/tmp/wl.toml",
            "export",
            "--from",
            "2025-06-01",
            "-o",
            "out.csv",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/wl.toml")));
        match cli.command {
            Command::Export { from, to, output } => {
                assert_eq!(from, NaiveDate::from_ymd_opt(2025, 6, 1));
                assert!(to.is_none());
                assert_eq!(output, Some(PathBuf::from("out.csv")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn open_ended_range() {
        assert!(date_range(None, None).is_none());

        let range = date_range(NaiveDate::from_ymd_opt(2025, 6, 1), None).unwrap();
        assert!(range.contains(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2025, 5, 31, 23, 0, 0).unwrap()));
    }

    #[test]
    fn summary_shows_last_error_when_nothing_was_stored() {
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let mut stats = UpdateStats::new(t);
        stats.record(false, Some("AuthError: Invalid API key".into()), t);

        let mut text = String::new();
        write_summary(&mut text, &DashboardView::default().with_stats(stats)).unwrap();

        assert!(text.contains("Collector runs: 1 (0 ok, 1 failed)"));
        assert!(text.contains("Last failure: 2025-06-01 09:00"));
        assert!(text.contains("Last error: AuthError: Invalid API key"));
        assert!(text.contains("No data yet"));
    }
}
