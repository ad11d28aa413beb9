use async_trait::async_trait;
use std::fmt::Debug;

use crate::{error::SourceError, model::WeatherRecord};

pub mod openweather;

pub use openweather::OpenWeatherSource;

/// Forecast points per day on a 3-hour grid.
pub const POINTS_PER_DAY: usize = 8;

/// A network data source for one configured location.
///
/// Implementations apply their own request timeout and never retry; retry policy belongs to
/// the scheduler.
#[async_trait]
pub trait WeatherSource: Send + Sync + Debug {
    /// Current conditions, returned with `is_forecast = false`.
    async fn fetch_current(&self) -> Result<WeatherRecord, SourceError>;

    /// Up to `days * 8` forecast points in ascending time, each with `is_forecast = true`.
    async fn fetch_forecast(&self, days: u8) -> Result<Vec<WeatherRecord>, SourceError>;
}
