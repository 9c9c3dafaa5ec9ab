use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use anyhow::Result;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_appconfigdata::Client as AppConfigClient;
use std::path::Path;
use tokio::fs;

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    Wifi,
    Bluetooth,
    Usb,
}

impl ConnectionType {
    /// Only network profiles can be probed over TCP.
    pub fn is_network(self) -> bool {
        matches!(self, ConnectionType::Wifi)
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionType::Wifi => "WIFI",
            ConnectionType::Bluetooth => "BLUETOOTH",
            ConnectionType::Usb => "USB",
        })
    }
}

/// Command language the printer speaks. Informational only, nothing is encoded.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandLanguage {
    #[default]
    Escpos,
    Zpl,
    Epl,
    Cpcl,
}

impl fmt::Display for CommandLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommandLanguage::Escpos => "ESC/POS",
            CommandLanguage::Zpl => "ZPL",
            CommandLanguage::Epl => "EPL",
            CommandLanguage::Cpcl => "CPCL",
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PrinterProfile {
    pub name: String,
    #[serde(default)]
    pub connection: ConnectionType,
    #[serde(default)]
    pub host: String,
    /// Comma-separated, same syntax as the `--ports` flag.
    #[serde(default = "default_ports")]
    pub ports: String,
    #[serde(default)]
    pub command_language: CommandLanguage,
    #[serde(default)]
    pub paper_width: Option<String>,
}

impl fmt::Display for PrinterProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} • {}", self.name, self.connection, self.command_language)?;
        if let Some(width) = &self.paper_width {
            write!(f, " • {}", width)?;
        }
        if self.connection.is_network() {
            write!(f, " ({} ports {})", self.host, self.ports)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Zero leaves the connect timeout to the OS.
    #[serde(default = "default_print_timeout_ms")]
    pub print_timeout_ms: u64,
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    #[serde(default)]
    pub profiles: Vec<PrinterProfile>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_enable_latency_history")]
    pub enable_latency_history: bool,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: SocketAddr,
}

fn default_ports() -> String {
    "9100".to_string()
}

fn default_probe_interval_ms() -> u64 {
    30_000
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_print_timeout_ms() -> u64 {
    10_000
}

fn default_ping_timeout_ms() -> u64 {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enable_latency_history() -> bool {
    false // Default to show current latency only
}

fn default_metrics_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9464))
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            print_timeout_ms: default_print_timeout_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            profiles: Vec::new(),
            log_level: default_log_level(),
            enable_latency_history: default_enable_latency_history(),
            metrics_addr: default_metrics_addr(),
        }
    }
}

/// Per-operation time limits handed to a `PrinterTester`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub probe: Duration,
    pub print: Option<Duration>,
    pub ping: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        ProbeConfig::default().timeouts()
    }
}

impl ProbeConfig {
    /// Get the log level as a tracing::Level
    pub fn get_tracing_level(&self) -> Result<tracing::Level> {
        parse_tracing_level(&self.log_level)
    }

    /// Reject settings that would make probing meaningless
    pub fn validate(&self) -> Result<()> {
        self.get_tracing_level()?;
        if self.probe_timeout_ms == 0 {
            return Err(anyhow::anyhow!("probe_timeout_ms must be greater than zero"));
        }
        if self.ping_timeout_ms == 0 {
            return Err(anyhow::anyhow!("ping_timeout_ms must be greater than zero"));
        }
        if self.probe_interval_ms == 0 {
            return Err(anyhow::anyhow!("probe_interval_ms must be greater than zero"));
        }
        // Profiles are looked up by name, ignoring case
        let mut seen = HashSet::new();
        for profile in &self.profiles {
            if !seen.insert(profile.name.to_lowercase()) {
                return Err(anyhow::anyhow!("duplicate printer profile name: {}", profile.name));
            }
        }
        Ok(())
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            probe: Duration::from_millis(self.probe_timeout_ms),
            print: match self.print_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            ping: Duration::from_millis(self.ping_timeout_ms),
        }
    }

    pub fn profile(&self, name: &str) -> Option<&PrinterProfile> {
        self.profiles.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: ProbeConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// One-shot commands run fine without a config file.
    pub async fn load_or_default(file_path: &str) -> Result<Self> {
        if !Path::new(file_path).exists() {
            return Ok(Self::default());
        }
        ConfigManager::load_file_config(file_path).await
    }
}

pub fn parse_tracing_level(level: &str) -> Result<tracing::Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(tracing::Level::TRACE),
        "debug" => Ok(tracing::Level::DEBUG),
        "info" => Ok(tracing::Level::INFO),
        "warn" | "warning" => Ok(tracing::Level::WARN),
        "error" => Ok(tracing::Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {}. Valid levels are: trace, debug, info, warn, error", level))
    }
}

/// Live configuration for watch mode, refreshed in the background.
pub struct ConfigManager {
    pub config: Arc<RwLock<ProbeConfig>>,
    pub profiles: Arc<RwLock<Vec<PrinterProfile>>>,
}

impl ConfigManager {
    pub async fn start(config_file: &str) -> Result<Self> {
        // Check if we should use AppConfig or local file
        let use_app_config = std::env::var("USE_APP_CONFIG")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        if use_app_config {
            Self::start_with_app_config().await
        } else {
            Self::start_with_local_file(config_file).await
        }
    }

    fn from_initial(initial: ProbeConfig) -> Self {
        let profiles = Arc::new(RwLock::new(initial.profiles.clone()));
        ConfigManager {
            config: Arc::new(RwLock::new(initial)),
            profiles,
        }
    }

    /// Swap in `new_cfg` when it differs from the current config.
    pub async fn apply(&self, new_cfg: ProbeConfig) -> bool {
        let mut current = self.config.write().await;
        if *current == new_cfg {
            return false;
        }
        *self.profiles.write().await = new_cfg.profiles.clone();
        *current = new_cfg;
        true
    }

    fn handle(&self) -> Self {
        ConfigManager {
            config: self.config.clone(),
            profiles: self.profiles.clone(),
        }
    }

    async fn start_with_app_config() -> Result<Self> {
        tracing::info!("Starting with AWS AppConfig");

        // Load AWS config
        let region_provider = RegionProviderChain::default_provider().or_else("us-east-1");
        let aws_cfg = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;
        let client = AppConfigClient::new(&aws_cfg);

        let app_id = std::env::var("APP_CONFIG_APPLICATION_ID")?;
        let env_id = std::env::var("APP_CONFIG_ENVIRONMENT_ID")?;
        let profile_id = std::env::var("APP_CONFIG_PROFILE_ID")?;
        let poll_interval_sec = poll_interval_from_env("APP_CONFIG_POLL_INTERVAL_SECONDS", 60);

        let initial = Self::fetch_app_config(&client, &app_id, &env_id, &profile_id).await?;
        let manager = Self::from_initial(initial);

        let live = manager.handle();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(poll_interval_sec)).await;
                match Self::fetch_app_config(&client, &app_id, &env_id, &profile_id).await {
                    Ok(new_cfg) => {
                        if live.apply(new_cfg).await {
                            tracing::info!("AppConfig updated");
                        }
                    }
                    Err(e) => {
                        tracing::error!("Error polling AppConfig: {:?}", e);
                    }
                }
            }
        });

        Ok(manager)
    }

    async fn start_with_local_file(config_file: &str) -> Result<Self> {
        tracing::info!("Starting with local file: {}", config_file);

        let initial = Self::load_file_config(config_file).await?;
        let manager = Self::from_initial(initial);
        let poll_interval_sec = poll_interval_from_env("CONFIG_POLL_INTERVAL_SECONDS", 30);

        let live = manager.handle();
        let config_file = config_file.to_string();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(poll_interval_sec)).await;
                match Self::load_file_config(&config_file).await {
                    Ok(new_cfg) => {
                        if live.apply(new_cfg).await {
                            tracing::info!("Local config file updated");
                        }
                    }
                    Err(e) => {
                        tracing::error!("Error reading config file {}: {:?}", config_file, e);
                    }
                }
            }
        });

        Ok(manager)
    }

    async fn load_file_config(file_path: &str) -> Result<ProbeConfig> {
        if !Path::new(file_path).exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", file_path));
        }

        let content = fs::read_to_string(file_path).await?;
        ProbeConfig::from_json(&content)
    }

    async fn fetch_app_config(
        client: &AppConfigClient,
        app_id: &str,
        env_id: &str,
        profile_id: &str,
    ) -> Result<ProbeConfig> {
        let session_resp = client
            .start_configuration_session()
            .application_identifier(app_id)
            .environment_identifier(env_id)
            .configuration_profile_identifier(profile_id)
            .send()
            .await?;

        let token = session_resp
            .initial_configuration_token()
            .ok_or_else(|| anyhow::anyhow!("No initial token from AppConfigData"))?;

        let latest = client
            .get_latest_configuration()
            .configuration_token(token)
            .send()
            .await?;

        let cfg_bytes = latest
            .configuration()
            .map(|c| c.as_ref())
            .unwrap_or_default();

        let cfg: ProbeConfig = serde_json::from_slice(cfg_bytes)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn poll_interval_from_env(var: &str, default_secs: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default_secs)
}
