//! Core library for the `weatherlog` collector.
//!
//! This crate defines:
//! - Configuration handling
//! - The weather source abstraction and its OpenWeather client
//! - The flat-file record store and run statistics
//! - The scheduled collection loop
//! - Read-only dashboard aggregates and CSV export
//!
//! It is used by `weatherlog-cli`, but can also be embedded in other binaries or services.

pub mod config;
pub mod dashboard;
pub mod error;
pub mod logging;
pub mod model;
pub mod scheduler;
pub mod source;
pub mod store;

pub use config::Config;
pub use dashboard::DashboardView;
pub use error::{CycleError, SourceError, StoreError};
pub use model::{DateRange, UpdateStats, WeatherRecord};
pub use scheduler::{CycleOutcome, CycleReport, CycleState, SchedulePolicy, Scheduler, StatusReport};
pub use source::{OpenWeatherSource, WeatherSource};
pub use store::RecordStore;
