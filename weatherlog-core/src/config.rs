use anyhow::{Context, Result, anyhow, bail};
use directories::ProjectDirs;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

/// One year.
pub const MAX_INTERVAL_HOURS: u64 = 24 * 366;
/// One hundred years.
pub const MAX_RETENTION_DAYS: u32 = 36_525;

/// Location the collector tracks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub city: String,
    /// ISO 3166 country code, e.g. "DE".
    pub country: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            city: "Hamburg".to_string(),
            country: "DE".to_string(),
        }
    }
}

/// Weather provider access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_hours: u64,
    pub retention_days: u32,
    pub forecast_days: u8,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_hours: 3,
            retention_days: 30,
            forecast_days: 5,
        }
    }
}

/// Where collected data and the diagnostic log live. Unset paths resolve to platform dirs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub data_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: LevelFilter,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: LevelFilter::Info,
        }
    }
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// [location]
/// city = "Hamburg"
/// country = "DE"
///
/// [api]
/// api_key = "..."
///
/// [schedule]
/// interval_hours = 3
/// retention_days = 30
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub location: LocationConfig,
    pub api: ApiConfig,
    pub schedule: ScheduleConfig,
    pub files: FilesConfig,
    pub general: GeneralConfig,
}

impl Config {
    /// Load config from the platform config dir, or defaults if it doesn't exist yet.
    /// Environment overrides are applied on top.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            toml::from_str::<Config>(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    /// Save config to the platform config dir.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = project_dirs()?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Overrides from `WEATHER_API_KEY`, `CITY_NAME`, `COUNTRY_CODE` and `WEATHERLOG_DATA_DIR`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("WEATHER_API_KEY") {
            self.api.api_key = Some(key);
        }
        if let Some(city) = non_empty("CITY_NAME") {
            self.location.city = city;
        }
        if let Some(country) = non_empty("COUNTRY_CODE") {
            self.location.country = country;
        }
        if let Some(dir) = non_empty("WEATHERLOG_DATA_DIR") {
            self.files.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Returns the API key, or an error with a hint on how to set one.
    pub fn api_key(&self) -> Result<&str> {
        self.api
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "No API key configured.\n\
                     Hint: run `weatherlog configure` or set WEATHER_API_KEY."
                )
            })
    }

    pub fn validate(&self) -> Result<()> {
        if self.location.city.trim().is_empty() {
            bail!("location.city must not be empty");
        }
        if !(1..=MAX_INTERVAL_HOURS).contains(&self.schedule.interval_hours) {
            bail!("schedule.interval_hours must be between 1 and {MAX_INTERVAL_HOURS}");
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.schedule.retention_days) {
            bail!("schedule.retention_days must be between 1 and {MAX_RETENTION_DAYS}");
        }
        if self.schedule.forecast_days == 0 {
            bail!("schedule.forecast_days must be at least 1");
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.files.data_dir {
            return dir.clone();
        }
        project_dirs()
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("data"))
    }

    pub fn log_file(&self) -> PathBuf {
        self.files
            .log_file
            .clone()
            .unwrap_or_else(|| self.data_dir().join("logs").join("weather_auto_update.log"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.schedule.interval_hours.saturating_mul(3600))
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("dev", "weatherlog", "weatherlog")
        .ok_or_else(|| anyhow!("Could not determine platform config directory"))
}
