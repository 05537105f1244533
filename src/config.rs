use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::deploy::DeployType;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub lfs: LfsConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Base URL clients use to reach the gateway; LFS action links are built from it
    #[serde(default = "default_public_domain")]
    pub public_domain: String,
    /// Realm sent in `WWW-Authenticate` challenges
    #[serde(default = "default_realm")]
    pub realm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Largest receive-pack request accepted (by Content-Length)
    #[serde(default = "default_max_push_bytes")]
    pub max_push_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LfsConfig {
    #[serde(default = "default_link_expiry_secs")]
    pub link_expiry_secs: u64,
    /// HMAC key for storage links. Generated into ~/.hubgate/signing.key when empty.
    #[serde(default)]
    pub signing_key: String,
    /// Objects above this size need the multipart transfer
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Deployments registered with the built-in control plane at startup
    #[serde(default)]
    pub units: Vec<DeployUnitConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployUnitConfig {
    pub id: i64,
    /// e.g. `models/alice/demo`
    pub repo: String,
    pub deploy_type: DeployType,
    pub owner: String,
    #[serde(default)]
    pub status_code: i32,
    #[serde(default)]
    pub instances: Vec<String>,
    #[serde(default)]
    pub commit_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub admins: Vec<String>,
    /// Repositories hidden from anonymous readers, e.g. `models/alice/secret`
    #[serde(default)]
    pub private_repos: Vec<String>,
    #[serde(default)]
    pub users: Vec<UserEntry>,
    #[serde(default)]
    pub grants: Vec<Grant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub username: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub repo: String,
    pub user: String,
    #[serde(default)]
    pub write: bool,
}

fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_public_domain() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_realm() -> String {
    "hubgate-git".to_string()
}

fn default_data_dir() -> String {
    get_hubgate_dir()
        .join("data")
        .to_string_lossy()
        .to_string()
}

fn default_max_push_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_link_expiry_secs() -> u64 {
    24 * 60 * 60
}

fn default_max_object_size() -> u64 {
    5 * 1024 * 1024 * 1024
}

fn default_status_interval_ms() -> u64 {
    5_000
}

fn default_heartbeat_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            public_domain: default_public_domain(),
            realm: default_realm(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_push_bytes: default_max_push_bytes(),
        }
    }
}

impl Default for LfsConfig {
    fn default() -> Self {
        Self {
            link_expiry_secs: default_link_expiry_secs(),
            signing_key: String::new(),
            max_object_size: default_max_object_size(),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            status_interval_ms: default_status_interval_ms(),
            heartbeat_secs: default_heartbeat_secs(),
            units: Vec::new(),
        }
    }
}

impl DeployConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.max(1))
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

impl Config {
    /// Load config from the default location, or create it with defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&get_config_path())
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            let config = Config::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&get_config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(config_path, content)?;

        Ok(())
    }
}

/// Get the hubgate directory (~/.hubgate)
pub fn get_hubgate_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hubgate")
}

/// Get the config file path (~/.hubgate/config.toml)
pub fn get_config_path() -> PathBuf {
    get_hubgate_dir().join("config.toml")
}

/// Get the signing key path (~/.hubgate/signing.key)
pub fn get_signing_key_path() -> PathBuf {
    get_hubgate_dir().join("signing.key")
}

/// Signing key for storage links: the configured one, else the key file,
/// generating it on first use.
pub fn ensure_signing_key(config: &LfsConfig) -> Result<Vec<u8>> {
    if !config.signing_key.is_empty() {
        return Ok(config.signing_key.as_bytes().to_vec());
    }
    ensure_signing_key_at(&get_signing_key_path())
}

pub fn ensure_signing_key_at(path: &Path) -> Result<Vec<u8>> {
    if path.exists() {
        let content = fs::read_to_string(path).context("Failed to read signing key")?;
        let key = hex::decode(content.trim()).context("Invalid signing key format")?;
        if key.is_empty() {
            anyhow::bail!("Signing key file is empty");
        }
        return Ok(key);
    }
    generate_signing_key(path)
}

fn generate_signing_key(path: &Path) -> Result<Vec<u8>> {
    use rand::RngCore;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut key = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    fs::write(path, hex::encode(&key))?;

    // Set permissions to 0600 (owner read/write only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(path, perms)?;
    }

    Ok(key)
}
