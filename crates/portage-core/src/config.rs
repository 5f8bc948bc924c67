use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Proxy settings (optional section in config.toml).
///
/// When a scheme appears in `proxied_schemes` and `worker_protocol` is set,
/// jobs for that scheme are routed to the substitute protocol's workers
/// (e.g. ftp spoken through an http proxy uses http workers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy URL handed to workers via the config push.
    pub url: String,
    /// Schemes routed through the proxy.
    #[serde(default)]
    pub proxied_schemes: Vec<String>,
    /// Worker protocol that actually speaks to the proxy, if it differs
    /// from the request scheme.
    #[serde(default)]
    pub worker_protocol: Option<String>,
}

/// Process-wide session metadata pushed to every worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Accept-Language style preference list.
    pub languages: String,
    /// Accepted charsets.
    pub charsets: String,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    /// Free-form extra keys merged into the worker config push
    /// (per-request read/connect/response timeouts live here).
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            languages: "en".to_string(),
            charsets: "utf-8".to_string(),
            proxy: None,
            extra: BTreeMap::new(),
        }
    }
}

impl SessionConfig {
    /// Protocol actually spoken on the wire for `scheme`, after proxy
    /// substitution.
    pub fn resolved_protocol<'a>(&'a self, scheme: &'a str) -> &'a str {
        if let Some(proxy) = &self.proxy {
            if proxy.proxied_schemes.iter().any(|s| s == scheme) {
                if let Some(sub) = &proxy.worker_protocol {
                    return sub;
                }
            }
        }
        scheme
    }

    /// Flatten into the string map sent with the worker config push.
    pub fn to_worker_map(&self) -> BTreeMap<String, String> {
        let mut map = self.extra.clone();
        map.insert("Languages".to_string(), self.languages.clone());
        map.insert("Charsets".to_string(), self.charsets.clone());
        if let Some(proxy) = &self.proxy {
            map.insert("UseProxy".to_string(), proxy.url.clone());
        }
        map
    }
}

/// Global configuration loaded from `~/.config/portage/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortageConfig {
    /// Per-protocol worker cap used when the registry does not override it.
    pub max_workers: usize,
    /// Per-host worker cap used when the registry does not override it.
    pub max_workers_per_host: usize,
    /// Idle workers older than this are reaped from the pool.
    pub worker_idle_lifetime_secs: u64,
    /// How long to wait for a spawned worker to connect back.
    pub connect_timeout_secs: u64,
    /// Connect timeout when debugging workers (long enough for a human
    /// with a debugger attached).
    pub debug_connect_timeout_secs: u64,
    /// Use the debug connect timeout.
    #[serde(default)]
    pub debug_worker_launch: bool,
    /// Directory for worker rendezvous sockets; defaults to the XDG state
    /// dir when unset.
    #[serde(default)]
    pub socket_dir: Option<PathBuf>,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Default for PortageConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            max_workers_per_host: 2,
            worker_idle_lifetime_secs: 60,
            connect_timeout_secs: 20,
            debug_connect_timeout_secs: 3600,
            debug_worker_launch: false,
            socket_dir: None,
            session: SessionConfig::default(),
        }
    }
}

impl PortageConfig {
    pub fn worker_idle_lifetime(&self) -> Duration {
        Duration::from_secs(self.worker_idle_lifetime_secs)
    }

    /// Reap cadence: half the idle lifetime.
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.worker_idle_lifetime_secs.max(2) / 2)
    }

    pub fn connect_timeout(&self) -> Duration {
        if self.debug_worker_launch {
            Duration::from_secs(self.debug_connect_timeout_secs)
        } else {
            Duration::from_secs(self.connect_timeout_secs)
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("portage")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<PortageConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = PortageConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: PortageConfig = toml::from_str(&data)?;
    Ok(cfg)
}
