use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::{
    config::Config,
    error::SourceError,
    model::WeatherRecord,
    source::{POINTS_PER_DAY, WeatherSource},
};

/// Client for the OpenWeather "current weather" and "5 day / 3 hour forecast" endpoints.
#[derive(Debug, Clone)]
pub struct OpenWeatherSource {
    api_key: String,
    city: String,
    country: String,
    base_url: String,
    http: Client,
}

impl OpenWeatherSource {
    pub fn new(
        api_key: impl Into<String>,
        city: impl Into<String>,
        country: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Unavailable(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key: api_key.into(),
            city: city.into(),
            country: country.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Construct a source from config; fails early when no API key is configured.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let api_key = config.api_key()?;
        let source = Self::new(
            api_key,
            config.location.city.as_str(),
            config.location.country.as_str(),
            config.api.base_url.as_str(),
            config.request_timeout(),
        )?;
        Ok(source)
    }

    async fn get_body(&self, endpoint: &str, label: &str) -> Result<String, SourceError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let location = format!("{},{}", self.city, self.country);

        debug!("GET {url} for {location}");

        let res = self
            .http
            .get(&url)
            .query(&[
                ("q", location.as_str()),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await
            .map_err(|e| transport_error(label, e))?;

        let status = res.status();
        let body = res.text().await.map_err(|e| {
            SourceError::Unavailable(format!("Failed to read OpenWeather {label} response body: {e}"))
        })?;

        if !status.is_success() {
            return Err(status_error(label, status, &body));
        }

        Ok(body)
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherSource {
    async fn fetch_current(&self) -> Result<WeatherRecord, SourceError> {
        let body = self.get_body("weather", "current").await?;

        let parsed: OwCurrentResponse = serde_json::from_str(&body).map_err(|e| {
            SourceError::MalformedResponse(format!("Failed to parse OpenWeather current JSON: {e}"))
        })?;

        let timestamp = unix_to_utc(parsed.dt)?;
        let country = parsed
            .sys
            .and_then(|s| s.country)
            .unwrap_or_else(|| self.country.clone());
        let city = if parsed.name.is_empty() {
            self.city.clone()
        } else {
            parsed.name
        };

        Ok(to_record(
            timestamp,
            city,
            country,
            &parsed.main,
            &parsed.weather,
            &parsed.wind,
            &parsed.clouds,
            visibility_km(parsed.visibility, 0.0),
            false,
        ))
    }

    async fn fetch_forecast(&self, days: u8) -> Result<Vec<WeatherRecord>, SourceError> {
        if days == 0 {
            return Ok(Vec::new());
        }

        let body = self.get_body("forecast", "forecast").await?;

        let parsed: OwForecastResponse = serde_json::from_str(&body).map_err(|e| {
            SourceError::MalformedResponse(format!("Failed to parse OpenWeather forecast JSON: {e}"))
        })?;

        let city = parsed
            .city
            .as_ref()
            .map(|c| c.name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.city.clone());
        let country = parsed
            .city
            .and_then(|c| c.country)
            .unwrap_or_else(|| self.country.clone());

        let mut entries = parsed.list;
        entries.sort_by_key(|e| e.dt);

        entries
            .iter()
            .take(usize::from(days) * POINTS_PER_DAY)
            .map(|entry| -> Result<WeatherRecord, SourceError> {
                Ok(to_record(
                    unix_to_utc(entry.dt)?,
                    city.clone(),
                    country.clone(),
                    &entry.main,
                    &entry.weather,
                    &entry.wind,
                    &entry.clouds,
                    visibility_km(entry.visibility, MAX_VISIBILITY_KM),
                    true,
                ))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: f64,
    humidity: u8,
    pressure: f64,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    main: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Default, Deserialize)]
struct OwWind {
    #[serde(default)]
    speed: f64,
    #[serde(default)]
    deg: f64,
}

#[derive(Debug, Default, Deserialize)]
struct OwClouds {
    #[serde(default)]
    all: u8,
}

#[derive(Debug, Deserialize)]
struct OwSys {
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    #[serde(default)]
    name: String,
    dt: i64,
    main: OwMain,
    weather: Vec<OwWeather>,
    #[serde(default)]
    wind: OwWind,
    #[serde(default)]
    clouds: OwClouds,
    /// Metres.
    visibility: Option<u32>,
    sys: Option<OwSys>,
}

#[derive(Debug, Deserialize)]
struct OwCity {
    name: String,
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwForecastEntry {
    dt: i64,
    main: OwMain,
    weather: Vec<OwWeather>,
    #[serde(default)]
    wind: OwWind,
    #[serde(default)]
    clouds: OwClouds,
    visibility: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OwForecastResponse {
    city: Option<OwCity>,
    list: Vec<OwForecastEntry>,
}

#[allow(clippy::too_many_arguments)]
fn to_record(
    timestamp: DateTime<Utc>,
    city: String,
    country: String,
    main: &OwMain,
    weather: &[OwWeather],
    wind: &OwWind,
    clouds: &OwClouds,
    visibility: f64,
    is_forecast: bool,
) -> WeatherRecord {
    let (condition, description) = weather
        .first()
        .map(|w| (w.main.clone(), w.description.clone()))
        .unwrap_or_else(|| ("Unknown".to_string(), String::new()));

    WeatherRecord {
        timestamp,
        city,
        country,
        temperature: main.temp,
        feels_like: main.feels_like,
        humidity: main.humidity,
        pressure: main.pressure,
        wind_speed: wind.speed,
        wind_direction: (wind.deg.rem_euclid(360.0).round() as u16) % 360,
        condition,
        description,
        cloudiness: clouds.all,
        visibility,
        is_forecast,
    }
}

/// OpenWeather reports at most 10 km; forecast slots without a value count as clear.
const MAX_VISIBILITY_KM: f64 = 10.0;

fn visibility_km(metres: Option<u32>, missing: f64) -> f64 {
    metres.map_or(missing, |m| f64::from(m) / 1000.0)
}

fn transport_error(label: &str, err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Unavailable(format!("OpenWeather {label} request timed out: {err}"))
    } else {
        SourceError::Unavailable(format!("Failed to send request to OpenWeather ({label}): {err}"))
    }
}

fn status_error(label: &str, status: StatusCode, body: &str) -> SourceError {
    let msg = format!(
        "OpenWeather {label} request failed with status {status}: {}",
        truncate_body(body)
    );

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Auth(msg),
        _ => SourceError::Unavailable(msg),
    }
}

fn unix_to_utc(ts: i64) -> Result<DateTime<Utc>, SourceError> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| SourceError::MalformedResponse(format!("timestamp {ts} is out of range")))
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_map_to_auth_error() {
        let err = status_error("current", StatusCode::UNAUTHORIZED, r#"{"cod":401}"#);
        assert_eq!(err.kind(), "AuthError");

        let err = status_error("current", StatusCode::FORBIDDEN, "");
        assert_eq!(err.kind(), "AuthError");
    }

    #[test]
    fn other_statuses_are_transient() {
        for status in [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
        ] {
            assert_eq!(status_error("forecast", status, "").kind(), "SourceUnavailable");
        }
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(500);
        let out = truncate_body(&body);
        assert_eq!(out.len(), 203);
        assert!(out.ends_with("..."));
        assert_eq!(truncate_body("short"), "short");
    }

    #[test]
    fn visibility_is_converted_to_kilometres() {
        assert_eq!(visibility_km(Some(7_500), 0.0), 7.5);
        assert_eq!(visibility_km(None, 0.0), 0.0);
        assert_eq!(visibility_km(None, MAX_VISIBILITY_KM), 10.0);
    }

    #[test]
    fn missing_weather_entry_becomes_unknown() {
        let main = OwMain {
            temp: 1.0,
            feels_like: -2.0,
            humidity: 90,
            pressure: 1000.0,
        };
        let wind = OwWind { speed: 3.0, deg: 360.0 };
        let record = to_record(
            Utc::now(),
            "Hamburg".into(),
            "DE".into(),
            &main,
            &[],
            &wind,
            &OwClouds::default(),
            0.0,
            false,
        );

        assert_eq!(record.condition, "Unknown");
        assert_eq!(record.wind_direction, 0);
        assert!(!record.is_forecast);
    }
}
