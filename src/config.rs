use dotenv::dotenv;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "TRANSIT_ETA_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub simulator: SimulatorConfig,
    pub genai: GenAiConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Nivel de log: error, warn, info, debug o trace.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
        }
    }
}

/// Parámetros del motor de búsqueda y ETA. Distancias en km.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_distance_km: f64,
    pub max_candidates: usize,
    pub average_speed_kmh: f64,
    pub alert_radius_km: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_distance_km: 0.5,
            max_candidates: 3,
            average_speed_kmh: crate::queries::eta::DEFAULT_AVERAGE_SPEED_KMH,
            alert_radius_km: 0.8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub tick_interval_ms: u64,
    pub meters_per_tick: f64,
    pub terminal_wait_ms: u64,
    pub auto_return: bool,
    pub dispatch_delay_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 2000,
            meters_per_tick: 50.0,
            terminal_wait_ms: 30_000,
            auto_return: true,
            dispatch_delay_ms: 10_000,
        }
    }
}

impl SimulatorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn km_per_tick(&self) -> f64 {
        self.meters_per_tick / 1000.0
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenAiConfig {
    /// Se toma normalmente de `GEMINI_API_KEY`.
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for GenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_file: PathBuf,
    pub timeout_ms: u64,
    /// Vigencia de la caché de nombres de lugares y líneas.
    pub names_cache_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("data/transit.json"),
            timeout_ms: 5_000,
            names_cache_secs: 300,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AppConfig {
    /// Carga `.env`, el archivo TOML (si existe) y aplica las variables de
    /// entorno.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv().ok();

        let path = env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            log::info!("No config file at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Sobrescribe con variables de entorno. `lookup` se inyecta para
    /// poder probarlo sin tocar el entorno del proceso.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("GEMINI_API_KEY") {
            self.genai.api_key = Some(key);
        }
        if let Some(host) = lookup("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("SERVER_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::Invalid {
                key: "SERVER_PORT",
                reason: format!("'{}' is not a port number", port),
            })?;
        }
        if let Some(file) = lookup("DATA_FILE") {
            self.store.data_file = PathBuf::from(file);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.server.log_level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |key: &'static str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    key,
                    reason: format!("must be a positive number, got {}", value),
                })
            }
        };

        positive("engine.max_distance_km", self.engine.max_distance_km)?;
        positive("engine.average_speed_kmh", self.engine.average_speed_kmh)?;
        positive("engine.alert_radius_km", self.engine.alert_radius_km)?;
        positive("simulator.meters_per_tick", self.simulator.meters_per_tick)?;

        if self.engine.max_candidates == 0 {
            return Err(ConfigError::Invalid {
                key: "engine.max_candidates",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.simulator.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "simulator.tick_interval_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn log_level(&self) -> tracing::Level {
        self.server
            .log_level
            .parse()
            .unwrap_or(tracing::Level::INFO)
    }
}
