use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const CONFIG_DIR_NAME: &str = ".stevedore";
const CONFIG_FILE_NAME: &str = "config.json";
pub const DEFAULT_DATA_DIR: &str = "/tmp/registry";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;

pub fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: default_data_dir(),
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Config {
    /// Precedence: environment variables, then the config file, then the
    /// built-in defaults. CLI flags override all of these at the call site.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?.unwrap_or_default();

        if let Some(data_dir) = env_var("STEVEDORE_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(host) = env_var("STEVEDORE_HOST") {
            config.host = host;
        }
        if let Some(port) = env_var("STEVEDORE_PORT") {
            config.port = port
                .parse()
                .with_context(|| format!("Invalid STEVEDORE_PORT value: {port}"))?;
        }
        Ok(config)
    }

    fn load_from_file() -> Result<Option<Self>> {
        let Some(config_path) = Self::config_path() else {
            return Ok(None);
        };
        if !config_path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config = serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(Some(config))
    }

    fn config_path() -> Option<PathBuf> {
        let home = env_var("HOME")?;
        Some(
            PathBuf::from(home)
                .join(CONFIG_DIR_NAME)
                .join(CONFIG_FILE_NAME),
        )
    }
}
