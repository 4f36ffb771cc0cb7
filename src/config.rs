use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3001";
pub const DEFAULT_GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
pub const DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";
pub const DEFAULT_BASE_FOLDER: &str = "BY Observer/BYSO Files";
pub const DEFAULT_PICTURES_FOLDER: &str = "Pictures";
pub const DEFAULT_SCHEDULE_CSV: &str = "data/bais_zman_draft_2.csv";
pub const DEFAULT_SHUL_TIMES_URL: &str =
    "https://us-central1-bais-website.cloudfunctions.net/bais_shul_times";
pub const DEFAULT_CORS_ORIGIN: &str = "https://david654100.github.io";

/// Runtime settings for the gateway.
///
/// Values are layered: built-in defaults, then an optional TOML file, then
/// environment variables, then command-line flags (applied by the binary).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct GatewayConfig {
    pub listen: SocketAddr,

    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    pub authority: String,

    pub graph_base: String,
    pub drive_id: String,
    pub base_folder: String,
    pub pictures_folder: String,
    /// Folder labels accepted by the recent-file endpoint.
    pub folders: Vec<String>,
    pub max_pages: usize,

    pub upstream_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub token_margin_secs: i64,

    pub admin_ips: Vec<String>,
    pub schedule_csv: PathBuf,
    pub shul_times_url: String,

    pub cors_origins: Vec<String>,
    pub static_dir: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 3001)),
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: DEFAULT_SCOPE.to_string(),
            authority: DEFAULT_AUTHORITY.to_string(),
            graph_base: DEFAULT_GRAPH_BASE.to_string(),
            drive_id: String::new(),
            base_folder: DEFAULT_BASE_FOLDER.to_string(),
            pictures_folder: DEFAULT_PICTURES_FOLDER.to_string(),
            folders: vec!["Bulletin".to_string()],
            max_pages: 1000,
            upstream_timeout_secs: 10,
            download_timeout_secs: 60,
            token_margin_secs: 60,
            admin_ips: Vec::new(),
            schedule_csv: PathBuf::from(DEFAULT_SCHEDULE_CSV),
            shul_times_url: DEFAULT_SHUL_TIMES_URL.to_string(),
            cors_origins: vec![DEFAULT_CORS_ORIGIN.to_string()],
            static_dir: None,
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Splits a comma-separated list, dropping blank entries.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .collect()
}

impl GatewayConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("failed to read config `{}`: {error}", path.display()))?;
        toml::from_str(&raw)
            .map_err(|error| format!("invalid config `{}`: {error}", path.display()))
    }

    pub fn from_environment(mut self) -> Result<Self, String> {
        if let Some(value) = env_value("TENANT_ID") {
            self.tenant_id = value;
        }
        if let Some(value) = env_value("CLIENT_ID") {
            self.client_id = value;
        }
        if let Some(value) = env_value("CLIENT_SECRET") {
            self.client_secret = value;
        }
        if let Some(value) = env_value("SHAREPOINT_DRIVE_ID") {
            self.drive_id = value;
        }
        if let Some(value) = env_value("ADMIN_IPS") {
            self.admin_ips = split_list(&value);
        }
        if let Some(value) = env_value("GATEWAY_FOLDERS") {
            self.folders = split_list(&value);
        }
        if let Some(value) = env_value("CORS_ORIGINS") {
            self.cors_origins = split_list(&value);
        }
        if let Some(value) = env_value("SCHEDULE_CSV") {
            self.schedule_csv = PathBuf::from(value);
        }
        if let Some(value) = env_value("STATIC_DIR") {
            self.static_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = env_value("PORT") {
            let port = value
                .parse::<u16>()
                .map_err(|error| format!("invalid PORT `{value}`: {error}"))?;
            self.listen.set_port(port);
        }
        Ok(self)
    }

    /// Reports settings the drive endpoints cannot work without.
    pub fn validate(&self) -> Result<(), String> {
        let missing: Vec<&str> = [
            ("TENANT_ID", self.tenant_id.as_str()),
            ("CLIENT_ID", self.client_id.as_str()),
            ("CLIENT_SECRET", self.client_secret.as_str()),
            ("SHAREPOINT_DRIVE_ID", self.drive_id.as_str()),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(format!("missing required settings: {}", missing.join(", ")));
        }
        if self.max_pages == 0 {
            return Err("`max_pages` must be at least 1".to_string());
        }
        if self.token_margin_secs < 60 {
            return Err("`token_margin_secs` must be at least 60".to_string());
        }
        Ok(())
    }

    pub fn token_endpoint(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority.trim_end_matches('/'),
            self.tenant_id
        )
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}
