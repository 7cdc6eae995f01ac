//! ---
//! ring_section: "01-core-runtime"
//! ring_subsection: "module"
//! ring_type: "source"
//! ring_scope: "code"
//! ring_description: "Shared primitives and utilities for the netring runtime."
//! ring_version: "v0.1.0-alpha"
//! ring_owner: "tbd"
//! ---
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_member_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_deregistered_grace() -> Duration {
    Duration::from_secs(3600)
}

fn default_max_snapshot_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_store_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_store_port() -> u16 {
    6379
}

fn default_registry_listen_host() -> String {
    "0.0.0.0".to_owned()
}

fn default_registry_listen_port() -> u16 {
    8800
}

fn default_member_listen_port() -> u16 {
    8900
}

fn default_missing_check_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_check_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(45)
}

fn default_bandwidth_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_traceroute_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_metrics_push_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_tcp_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_http_endpoints() -> Vec<String> {
    vec!["/health".to_owned(), "/metrics".to_owned()]
}

fn default_bandwidth_test_size_mb() -> u32 {
    1
}

fn default_max_bandwidth_body_mb() -> u32 {
    16
}

fn default_traceroute_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_instance_id_file() -> PathBuf {
    PathBuf::from(".netring_instance_id")
}

fn default_registry_url() -> String {
    "http://127.0.0.1:8800".to_owned()
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Environment variable carrying an explicit configuration file path.
pub const ENV_CONFIG_PATH: &str = "NETRING_CONFIG";

/// Registry-side configuration object.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default = "RegistryConfig::default_server")]
    pub server: ServerConfig,
    #[serde(default = "default_member_ttl")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub member_ttl: Duration,
    #[serde(default = "default_cleanup_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub cleanup_interval: Duration,
    #[serde(default = "default_deregistered_grace")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub deregistered_grace: Duration,
    /// Upper bound on a pushed metrics snapshot body.
    #[serde(default = "default_max_snapshot_bytes")]
    pub max_snapshot_bytes: usize,
    /// API key required by the admin `/clear` endpoint. Absent disables it.
    #[serde(default)]
    pub admin_token: Option<String>,
    #[serde(default)]
    pub expected_members: ExpectedMembersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RegistryConfig {
    fn default_server() -> ServerConfig {
        ServerConfig {
            host: default_registry_listen_host(),
            port: default_registry_listen_port(),
        }
    }

    /// Load configuration from disk, respecting the `NETRING_CONFIG` override
    /// and then environment overrides for individual fields.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        let mut config: RegistryConfig = load_toml(candidates)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(host) = non_empty_env("NETRING_STORE_HOST") {
            self.store.host = host;
        }
        if let Some(port) = parse_env::<u16>("NETRING_STORE_PORT") {
            self.store.port = port;
        }
        if let Some(db) = parse_env::<u32>("NETRING_STORE_DB") {
            self.store.db = db;
        }
        if let Some(password) = non_empty_env("NETRING_STORE_PASSWORD") {
            self.store.password = Some(password);
        }
        if let Some(host) = non_empty_env("NETRING_SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_env::<u16>("NETRING_SERVER_PORT") {
            self.server.port = port;
        }
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.server.validate("server")?;
        if self.member_ttl.is_zero() {
            return Err(anyhow!("member_ttl must be positive"));
        }
        if self.cleanup_interval.is_zero() {
            return Err(anyhow!("cleanup_interval must be positive"));
        }
        if self.expected_members.enable_missing_detection
            && self.expected_members.config_file.is_none()
        {
            return Err(anyhow!(
                "expected_members.config_file is required when missing detection is enabled"
            ));
        }
        Ok(())
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            server: Self::default_server(),
            member_ttl: default_member_ttl(),
            cleanup_interval: default_cleanup_interval(),
            deregistered_grace: default_deregistered_grace(),
            max_snapshot_bytes: default_max_snapshot_bytes(),
            admin_token: None,
            expected_members: ExpectedMembersConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Member-side configuration object.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    /// Short logical site name ("us1-k8s", "eu1-docker"). Not unique.
    pub location: String,
    /// Fixed instance identifier; when unset the persisted one is used.
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default = "default_instance_id_file")]
    pub instance_id_file: PathBuf,
    #[serde(default)]
    pub registry: RegistryEndpoint,
    #[serde(default)]
    pub intervals: IntervalsConfig,
    #[serde(default = "MemberConfig::default_server")]
    pub server: ServerConfig,
    #[serde(default)]
    pub checks: ChecksConfig,
    /// Overrides the auto-detected address in the registration payload.
    #[serde(default)]
    pub host_ip: Option<IpAddr>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MemberConfig {
    fn default_server() -> ServerConfig {
        ServerConfig {
            host: default_registry_listen_host(),
            port: default_member_listen_port(),
        }
    }

    /// Load configuration from disk, respecting `NETRING_CONFIG` and the
    /// per-field environment overrides.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        let mut config: MemberConfig = load_toml(candidates)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(location) = non_empty_env("NETRING_LOCATION") {
            self.location = location;
        }
        if let Some(url) = non_empty_env("NETRING_REGISTRY_URL") {
            self.registry.url = url;
        }
        if let Some(instance_id) = non_empty_env("NETRING_INSTANCE_ID") {
            self.instance_id = Some(instance_id);
        }
        if let Some(raw) = non_empty_env("NETRING_HOST_IP") {
            let ip = raw
                .parse::<IpAddr>()
                .with_context(|| format!("NETRING_HOST_IP is not a valid address: {raw}"))?;
            self.host_ip = Some(ip);
        }
        if let Some(host) = non_empty_env("NETRING_SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_env::<u16>("NETRING_SERVER_PORT") {
            self.server.port = port;
        }
        Ok(())
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.location.trim().is_empty() {
            return Err(anyhow!("location must not be empty"));
        }
        self.server.validate("server")?;
        let url = Url::parse(&self.registry.url)
            .with_context(|| format!("registry.url is not a valid URL: {}", self.registry.url))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(anyhow!("registry.url must use http or https"));
        }
        if self.checks.http_endpoints.is_empty() {
            return Err(anyhow!("checks.http_endpoints must not be empty"));
        }
        for endpoint in &self.checks.http_endpoints {
            if !endpoint.starts_with('/') {
                return Err(anyhow!("http endpoint '{}' must start with '/'", endpoint));
            }
        }
        if self.checks.bandwidth_test_size_mb == 0 {
            return Err(anyhow!("checks.bandwidth_test_size_mb must be at least 1"));
        }
        if self.checks.max_bandwidth_body_mb < self.checks.bandwidth_test_size_mb {
            return Err(anyhow!(
                "checks.max_bandwidth_body_mb must be >= bandwidth_test_size_mb"
            ));
        }
        Ok(())
    }
}

fn load_toml<T, P>(candidates: &[P]) -> Result<T>
where
    T: serde::de::DeserializeOwned,
    P: AsRef<Path>,
{
    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        if !env_path.trim().is_empty() {
            return from_path(PathBuf::from(env_path));
        }
    }
    for candidate in candidates {
        if candidate.as_ref().exists() {
            return from_path(candidate.as_ref().to_path_buf());
        }
    }
    Err(anyhow!(
        "no configuration files found. inspected: {}",
        candidates
            .iter()
            .map(|p| p.as_ref().display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    ))
}

fn from_path<T: serde::de::DeserializeOwned>(path: PathBuf) -> Result<T> {
    debug!(config_path = %path.display(), "loading configuration");
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("unable to read config file {}", path.display()))?;
    toml::from_str::<T>(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    non_empty_env(name).and_then(|v| v.parse::<T>().ok())
}

/// Connection settings for the external key-value store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_host")]
    pub host: String,
    #[serde(default = "default_store_port")]
    pub port: u16,
    #[serde(default)]
    pub db: u32,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_store_host(),
            port: default_store_port(),
            db: 0,
            password: None,
        }
    }
}

/// Listen address for an HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// Resolve into a socket address for binding.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("server host is not an IP address: {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("{section}.port must be in [1, 65535]"));
        }
        self.host
            .parse::<IpAddr>()
            .map_err(|_| anyhow!("{section}.host is not an IP address: {}", self.host))?;
        Ok(())
    }
}

/// Registry endpoint the member reports to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEndpoint {
    #[serde(default = "default_registry_url")]
    pub url: String,
}

impl Default for RegistryEndpoint {
    fn default() -> Self {
        Self {
            url: default_registry_url(),
        }
    }
}

/// Periods of the member's supervised task loops.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalsConfig {
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub poll: Duration,
    #[serde(default = "default_check_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub check: Duration,
    #[serde(default = "default_heartbeat_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub heartbeat: Duration,
    #[serde(default = "default_bandwidth_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub bandwidth_test: Duration,
    #[serde(default = "default_traceroute_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub traceroute: Duration,
    #[serde(default = "default_metrics_push_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub metrics_push: Duration,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            poll: default_poll_interval(),
            check: default_check_interval(),
            heartbeat: default_heartbeat_interval(),
            bandwidth_test: default_bandwidth_interval(),
            traceroute: default_traceroute_interval(),
            metrics_push: default_metrics_push_interval(),
        }
    }
}

/// Probe tuning knobs.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksConfig {
    #[serde(default = "default_tcp_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub tcp_timeout: Duration,
    #[serde(default = "default_http_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub http_timeout: Duration,
    #[serde(default = "default_http_endpoints")]
    pub http_endpoints: Vec<String>,
    #[serde(default = "default_bandwidth_test_size_mb")]
    pub bandwidth_test_size_mb: u32,
    #[serde(default = "default_max_bandwidth_body_mb")]
    pub max_bandwidth_body_mb: u32,
    #[serde(default = "default_traceroute_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub traceroute_timeout: Duration,
}

impl ChecksConfig {
    /// Payload size for one outbound bandwidth test, in bytes.
    pub fn bandwidth_payload_bytes(&self) -> usize {
        self.bandwidth_test_size_mb as usize * 1024 * 1024
    }

    /// Upper bound accepted by the inbound `/bandwidth_test` handler.
    pub fn max_bandwidth_body_bytes(&self) -> usize {
        self.max_bandwidth_body_mb as usize * 1024 * 1024
    }
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            tcp_timeout: default_tcp_timeout(),
            http_timeout: default_http_timeout(),
            http_endpoints: default_http_endpoints(),
            bandwidth_test_size_mb: default_bandwidth_test_size_mb(),
            max_bandwidth_body_mb: default_max_bandwidth_body_mb(),
            traceroute_timeout: default_traceroute_timeout(),
        }
    }
}

/// Expected-location analysis settings on the registry.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedMembersConfig {
    #[serde(default)]
    pub enable_missing_detection: bool,
    /// YAML file declaring per-location expectations.
    #[serde(default)]
    pub config_file: Option<PathBuf>,
    #[serde(default = "default_missing_check_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub missing_check_interval: Duration,
}

impl Default for ExpectedMembersConfig {
    fn default() -> Self {
        Self {
            enable_missing_detection: false,
            config_file: None,
            missing_check_interval: default_missing_check_interval(),
        }
    }
}

/// Logging sinks and format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
