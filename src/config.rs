use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ledger::{LEDGER_FILE_NAME, LOCK_FILE_NAME};
use crate::timestamp::TimestampMode;

pub const DEFAULT_FIRST_RUN_CAP: usize = 10;
const LIBREFM_PUBLIC_KEY: &str = "scrobble-sync";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceKeys {
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub service: String,
    pub username: String,
    pub password_md5: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub services: HashMap<String, ServiceKeys>,
    #[serde(default)]
    pub account: Option<Account>,
    #[serde(default)]
    pub timestamps: TimestampMode,
    #[serde(default = "default_first_run_cap")]
    pub first_run_cap: usize,
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            services: HashMap::new(),
            account: None,
            timestamps: TimestampMode::default(),
            first_run_cap: DEFAULT_FIRST_RUN_CAP,
            state_dir: None,
            webhook_url: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_first_run_cap() -> usize {
    DEFAULT_FIRST_RUN_CAP
}

pub fn default_config_path() -> PathBuf {
    let fallback = PathBuf::from(".config/scrobble-sync/config.json");
    dirs::home_dir().map_or(fallback, |home| {
        home.join(".config/scrobble-sync/config.json")
    })
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed reading config at {}", path.display()))?;
    let config = serde_json::from_str(&raw)
        .with_context(|| format!("Failed parsing config at {}", path.display()))?;
    Ok(config)
}

pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed creating config directory {}", parent.display()))?;
    }
    let serialized =
        serde_json::to_string_pretty(config).context("Failed serializing config to JSON")?;
    fs::write(path, format!("{serialized}\n"))
        .with_context(|| format!("Failed writing config at {}", path.display()))?;
    Ok(())
}

pub fn set_service_keys(config: &mut Config, service: &str, api_key: &str, api_secret: &str) {
    config.services.insert(
        service.to_string(),
        ServiceKeys {
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        },
    );
}

/// Libre.fm accepts any key pair; Last.fm needs the ones registered with `service set-keys`.
pub fn service_keys(config: &Config, service: &str) -> Option<ServiceKeys> {
    if service == "librefm" {
        return Some(ServiceKeys {
            api_key: LIBREFM_PUBLIC_KEY.to_string(),
            api_secret: LIBREFM_PUBLIC_KEY.to_string(),
        });
    }
    config.services.get(service).cloned()
}

pub fn set_account(config: &mut Config, service: &str, username: &str, password: &str) {
    config.account = Some(Account {
        service: service.to_string(),
        username: username.to_string(),
        password_md5: format!("{:x}", md5::compute(password)),
        active: true,
    });
}

/// Returns false when no account is configured.
pub fn set_account_active(config: &mut Config, active: bool) -> bool {
    match config.account.as_mut() {
        Some(account) => {
            account.active = active;
            true
        }
        None => false,
    }
}

/// Ledger and run lock live next to the config unless `state_dir` says otherwise.
pub fn state_dir(config: &Config, config_path: &Path) -> PathBuf {
    config.state_dir.clone().unwrap_or_else(|| {
        config_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    })
}

pub fn ledger_path(config: &Config, config_path: &Path) -> PathBuf {
    state_dir(config, config_path).join(LEDGER_FILE_NAME)
}

pub fn lock_path(config: &Config, config_path: &Path) -> PathBuf {
    state_dir(config, config_path).join(LOCK_FILE_NAME)
}
