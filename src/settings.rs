use crate::info;
use config::{Config, ConfigError, Environment, File};
use dotenv::dotenv;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Once;
use std::time::Duration;

pub const DEFAULT_DATA_DIR: &str = "~/.bitcoin/blocks";
pub const DEFAULT_HEIGHT_SAFETY_MARGIN: u32 = 6;
/// 8 txid-prefix bytes keep the key collision-free over the full chain
/// (7 would currently suffice, the extra byte is margin).
pub const DEFAULT_TXID_KEY_BYTES: usize = 8;

static DOTENV_ONCE: Once = Once::new();

fn ensure_dotenv_loaded() {
    DOTENV_ONCE.call_once(|| {
        match dotenv() {
            Ok(_) => info!("Config loaded including .env file."),
            Err(_) => info!("Config loaded without .env file."),
        }
    });
}

pub fn load_config<T>(path: &str, prefix: &str) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Debug,
{
    ensure_dotenv_loaded();

    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(prefix)
                .try_parsing(true)
                .separator("__"),
        );

    let cfg = builder.build()?.try_deserialize::<T>()?;
    info!("{:#?}", cfg);
    Ok(cfg)
}

fn duration_from_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_poll_interval", deserialize_with = "duration_from_secs")]
    pub tail_poll_interval_s: Duration,
    #[serde(default = "default_safety_margin")]
    pub height_safety_margin: u32,
    #[serde(default = "default_txid_key_bytes")]
    pub txid_key_bytes: usize,
    #[serde(default = "default_report_interval")]
    pub progress_report_interval: usize,
}

fn default_data_dir() -> String {
    DEFAULT_DATA_DIR.to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_safety_margin() -> u32 {
    DEFAULT_HEIGHT_SAFETY_MARGIN
}

fn default_txid_key_bytes() -> usize {
    DEFAULT_TXID_KEY_BYTES
}

fn default_report_interval() -> usize {
    1000
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            data_dir: default_data_dir(),
            tail_poll_interval_s: default_poll_interval(),
            height_safety_margin: default_safety_margin(),
            txid_key_bytes: default_txid_key_bytes(),
            progress_report_interval: default_report_interval(),
        }
    }
}

impl ScanConfig {
    pub fn load(path: &str) -> Result<ScanConfig, ConfigError> {
        load_config(path, "BLKSCAN")
    }

    /// Data directory with a leading `~` expanded against `$HOME`.
    pub fn data_dir_path(&self) -> PathBuf {
        if let Some(rest) = self.data_dir.strip_prefix("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        PathBuf::from(&self.data_dir)
    }
}
