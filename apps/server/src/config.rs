//! Server configuration management.
//!
//! Configuration is stored as TOML at `$MHSERVER_CONFIG`, or
//! `~/.config/mhserver/server.toml` when the variable is unset. A file with
//! defaults is written on first start.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use mhserver_transfer::{
    DEFAULT_MAX_SAVE_REQUESTS, EngineConfig, Lifetimes, MemoryConfig, PAGE_SIZE,
};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the configuration file location.
pub const CONFIG_ENV: &str = "MHSERVER_CONFIG";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Root of every user's files. A leading `~` expands to `$HOME`.
    #[serde(default = "default_workspace_path")]
    pub workspace_path: String,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// WebSocket server port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Cap on concurrent chunk uploads.
    #[serde(default = "default_max_save_requests")]
    pub max_save_requests: usize,

    /// Users whose folders are created at startup.
    #[serde(default)]
    pub provision_users: Vec<String>,

    #[serde(default)]
    pub memory: MemorySection,
}

/// `[memory]` table: bounds for chunk planning, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_available_ram")]
    pub available_ram: u64,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: u64,
}

fn default_workspace_path() -> String {
    "~/.mhserver".into()
}

fn default_listen_addr() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8081
}

fn default_max_save_requests() -> usize {
    DEFAULT_MAX_SAVE_REQUESTS
}

fn default_available_ram() -> u64 {
    1 << 30
}

fn default_max_chunk_size() -> u64 {
    512 << 20
}

fn default_min_chunk_size() -> u64 {
    PAGE_SIZE
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            available_ram: default_available_ram(),
            max_chunk_size: default_max_chunk_size(),
            min_chunk_size: default_min_chunk_size(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_path: default_workspace_path(),
            listen_addr: default_listen_addr(),
            port: default_port(),
            max_save_requests: default_max_save_requests(),
            provision_users: Vec::new(),
            memory: MemorySection::default(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    /// Loads and validates the configuration at `path`, writing defaults
    /// there first if the file does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
        } else {
            let config = Config::default();
            config.save_to(path)?;
            config
        };
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Rejects values the engine cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mem = &self.memory;
        if mem.min_chunk_size == 0 {
            bail!("memory.min_chunk_size must be greater than 0");
        }
        if mem.max_chunk_size < mem.min_chunk_size {
            bail!(
                "memory.max_chunk_size ({}) is smaller than memory.min_chunk_size ({})",
                mem.max_chunk_size,
                mem.min_chunk_size
            );
        }
        for (name, value) in [
            ("min_chunk_size", mem.min_chunk_size),
            ("max_chunk_size", mem.max_chunk_size),
        ] {
            if value > PAGE_SIZE && value % PAGE_SIZE != 0 {
                bail!("memory.{name} ({value}) is not a multiple of {PAGE_SIZE}");
            }
        }
        if self.max_save_requests == 0 {
            bail!("max_save_requests must be greater than 0");
        }
        self.listen_ip()?;
        Ok(())
    }

    /// Parsed `listen_addr`.
    pub fn listen_ip(&self) -> anyhow::Result<IpAddr> {
        self.listen_addr
            .parse()
            .with_context(|| format!("invalid listen_addr {:?}", self.listen_addr))
    }

    /// Builds the immutable engine configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            workspace_path: expand_home(&self.workspace_path, std::env::var("HOME").ok()),
            memory: MemoryConfig {
                available_ram: self.memory.available_ram,
                max_chunk_size: self.memory.max_chunk_size,
                min_chunk_size: self.memory.min_chunk_size,
            },
            max_save_requests: self.max_save_requests,
            lifetimes: Lifetimes::default(),
        }
    }
}

/// Replaces a leading `~` with `home`. Paths without one, or with no home
/// known, are returned as-is.
fn expand_home(path: &str, home: Option<String>) -> PathBuf {
    match (path.strip_prefix('~'), home) {
        (Some(""), Some(home)) => PathBuf::from(home),
        (Some(rest), Some(home)) if rest.starts_with('/') => {
            PathBuf::from(home).join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(path),
    }
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("mhserver")
        .join("server.toml")
}
