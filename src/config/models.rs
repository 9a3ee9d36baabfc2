use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub formats: FormatsConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Chat transport (Telegram Bot API)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Bot token (loaded from environment, never from the config file)
    #[serde(skip)]
    pub token: Option<String>,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token: None,
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

/// Retrieval surface (file server + health)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Base used to compose the links handed to users
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            public_base_url: default_public_base_url(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_public_base_url() -> String {
    "http://localhost:8000".to_string()
}

/// Shortlist shaping
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FormatsConfig {
    #[serde(default = "default_max_choices")]
    pub max_choices: usize,
    /// Variants taller than this are never offered
    #[serde(default)]
    pub max_height: Option<u32>,
}

impl Default for FormatsConfig {
    fn default() -> Self {
        Self {
            max_choices: default_max_choices(),
            max_height: None,
        }
    }
}

fn default_max_choices() -> usize {
    6
}

/// Extraction backend and the ordered identity strategies presented to it
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
    /// Netscape cookie file used by strategies with `use_cookies`
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,
    #[serde(default = "default_socket_timeout_secs")]
    pub socket_timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_merge_output_format")]
    pub merge_output_format: String,
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategyProfile>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            cookies_file: None,
            socket_timeout_secs: default_socket_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            merge_output_format: default_merge_output_format(),
            strategies: default_strategies(),
        }
    }
}

impl ExtractionConfig {
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn default_binary() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_socket_timeout_secs() -> u64 {
    15
}

fn default_probe_timeout_secs() -> u64 {
    120
}

fn default_fetch_timeout_secs() -> u64 {
    30 * 60
}

fn default_merge_output_format() -> String {
    "mp4".to_string()
}

const DESKTOP_CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

fn default_strategies() -> Vec<StrategyProfile> {
    let web = StrategyProfile {
        name: "web-cookies".to_string(),
        player_clients: vec!["web".to_string(), "tv".to_string()],
        player_skip: vec!["configs".to_string(), "webpage".to_string()],
        use_cookies: true,
        user_agent: Some(DESKTOP_CHROME_UA.to_string()),
        force_ipv4: true,
        source_address: Some("0.0.0.0".to_string()),
        skip_certificate_check: true,
    };

    vec![
        web.clone(),
        StrategyProfile {
            name: "web".to_string(),
            use_cookies: false,
            ..web
        },
        StrategyProfile {
            name: "tv-embedded".to_string(),
            player_clients: vec!["tv_embedded".to_string()],
            use_cookies: true,
            force_ipv4: true,
            ..StrategyProfile::named("tv-embedded")
        },
        StrategyProfile::named("default"),
    ]
}

/// One client identity presented to the extraction backend
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StrategyProfile {
    pub name: String,
    #[serde(default)]
    pub player_clients: Vec<String>,
    #[serde(default)]
    pub player_skip: Vec<String>,
    #[serde(default)]
    pub use_cookies: bool,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub force_ipv4: bool,
    #[serde(default)]
    pub source_address: Option<String>,
    #[serde(default)]
    pub skip_certificate_check: bool,
}

impl StrategyProfile {
    /// Profile with the backend's own defaults
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            player_clients: Vec::new(),
            player_skip: Vec::new(),
            use_cookies: false,
            user_agent: None,
            force_ipv4: false,
            source_address: None,
            skip_certificate_check: false,
        }
    }
}

/// Staging directory and its retention policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StagingConfig {
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: ByteSize,
    /// Transfers larger than this are refused by the backend
    #[serde(default)]
    pub max_file_bytes: Option<ByteSize>,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
            max_age_secs: default_max_age_secs(),
            max_total_bytes: default_max_total_bytes(),
            max_file_bytes: None,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl StagingConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_max_age_secs() -> u64 {
    6 * 60 * 60
}

fn default_max_total_bytes() -> ByteSize {
    ByteSize(10 * 1024 * 1024 * 1024) // 10 GB
}

fn default_sweep_interval_secs() -> u64 {
    300
}

/// Admission control and end-to-end bounds for backend work
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

impl LimitsConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

fn default_max_concurrent_jobs() -> usize {
    4
}

/// Two full fetch attempts plus headroom
fn default_job_timeout_secs() -> u64 {
    65 * 60
}
