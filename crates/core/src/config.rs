//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// When enabled, restrict this endpoint to scraper IPs at the network level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (single-node deployments and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only, SQLite cannot cancel queries).
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL (optional if using individual fields).
        /// Takes precedence over individual fields if both are provided.
        url: Option<String>,
        /// Database host (e.g., "localhost" or "db.example.com").
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// Prefer VIEWFINDER_METADATA__PASSWORD over storing it in a file.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds. PostgreSQL cancels queries
        /// that exceed this duration.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(60)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/viewfinder.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) => Ok(()),
                (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => Err(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ),
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

/// Upstream imagery API configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Images endpoint of the upstream API.
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,
    /// Access token sent with every request.
    /// Prefer `access_token_file` or VIEWFINDER_UPSTREAM__ACCESS_TOKEN.
    pub access_token: Option<String>,
    /// File containing the access token (whitespace is trimmed).
    pub access_token_file: Option<PathBuf>,
    /// Photos requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Per-request timeout in seconds.
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
    /// Sustained upstream request rate shared by all callers.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    /// Burst allowance above the sustained rate.
    #[serde(default = "default_upstream_burst")]
    pub burst: u32,
    /// Comma-separated photo fields requested from the API.
    #[serde(default = "default_upstream_fields")]
    pub fields: String,
}

fn default_upstream_base_url() -> String {
    "https://graph.mapillary.com/images".to_string()
}

fn default_page_size() -> u32 {
    250
}

fn default_upstream_timeout_secs() -> u64 {
    60
}

fn default_requests_per_second() -> u32 {
    10
}

fn default_upstream_burst() -> u32 {
    20
}

fn default_upstream_fields() -> String {
    "id,geometry,compass_angle,thumb_1024_url,computed_rotation,computed_compass_angle,\
     computed_altitude,captured_at,is_pano,creator"
        .to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            access_token: None,
            access_token_file: None,
            page_size: default_page_size(),
            timeout_secs: default_upstream_timeout_secs(),
            requests_per_second: default_requests_per_second(),
            burst: default_upstream_burst(),
            fields: default_upstream_fields(),
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate upstream configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.page_size == 0 {
            return Err("upstream.page_size must be at least 1".to_string());
        }
        if self.requests_per_second == 0 {
            return Err("upstream.requests_per_second must be at least 1".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("upstream.timeout_secs must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Streaming behaviour for viewport requests.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Serve previously fetched photos and record new ones.
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    /// Fetch uncovered areas from the upstream API.
    #[serde(default = "default_true")]
    pub live_enabled: bool,
    /// Maximum photos delivered per request, cached and live combined.
    #[serde(default = "default_max_photos_per_request")]
    pub max_photos_per_request: usize,
    /// Discard the cache for a request when coverage is incomplete and the
    /// sampled cache scores below this value. 0.0 (the default) never
    /// discards; 0.9 refetches any partially covered viewport whose cache
    /// leaves more than a tenth of the grid empty.
    #[serde(default)]
    pub min_distribution_score: f64,
}

fn default_true() -> bool {
    true
}

fn default_max_photos_per_request() -> usize {
    1000
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            live_enabled: true,
            max_photos_per_request: default_max_photos_per_request(),
            min_distribution_score: 0.0,
        }
    }
}

impl StreamingConfig {
    /// Validate streaming configuration. Returns warnings for settings that
    /// are allowed but probably unintended.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if !(0.0..=1.0).contains(&self.min_distribution_score) {
            return Err(format!(
                "streaming.min_distribution_score must be within [0, 1], got {}",
                self.min_distribution_score
            ));
        }

        if self.max_photos_per_request == 0 {
            warnings.push(
                "streaming.max_photos_per_request=0: every stream will be empty".to_string(),
            );
        }

        if !self.cache_enabled && !self.live_enabled {
            warnings.push(
                "streaming.cache_enabled and streaming.live_enabled are both false: \
                 streams will never contain photos"
                    .to_string(),
            );
        }

        Ok(warnings)
    }
}

/// Per-caller spacing of upstream requests.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateGateConfig {
    /// Minimum interval between upstream requests made for one caller.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Entries idle for longer than this are evicted.
    #[serde(default = "default_entry_ttl_secs")]
    pub entry_ttl_secs: u64,
    /// Upper bound on tracked callers; a sweep runs inline when reached.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Interval between background cleanup sweeps.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_min_interval_ms() -> u64 {
    1000
}

fn default_entry_ttl_secs() -> u64 {
    300
}

fn default_max_entries() -> usize {
    100_000
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for RateGateConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            entry_ttl_secs: default_entry_ttl_secs(),
            max_entries: default_max_entries(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl RateGateConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.entry_ttl_secs)
    }

    /// Validate rate gate configuration.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        // tokio::time::interval panics on a zero period
        if self.cleanup_interval_secs == 0 {
            return Err("rate_gate.cleanup_interval_secs cannot be 0".to_string());
        }

        if self.max_entries == 0 {
            return Err("rate_gate.max_entries must be at least 1".to_string());
        }

        if self.entry_ttl() < self.min_interval() {
            warnings.push(format!(
                "rate_gate.entry_ttl_secs={} is shorter than min_interval_ms={}; \
                 callers may be evicted before their interval elapses",
                self.entry_ttl_secs, self.min_interval_ms
            ));
        }

        Ok(warnings)
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub rate_gate: RateGateConfig,
}

impl AppConfig {
    /// Create a test configuration.
    ///
    /// **For testing only.** Uses SQLite metadata, no rate gate delay and
    /// metrics disabled.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig {
                metrics_enabled: false,
                ..Default::default()
            },
            metadata: MetadataConfig::default(),
            upstream: UpstreamConfig::default(),
            streaming: StreamingConfig::default(),
            rate_gate: RateGateConfig {
                min_interval_ms: 0,
                ..Default::default()
            },
        }
    }

    /// Validate every section, collecting warnings.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        self.metadata.validate()?;
        self.upstream.validate()?;
        let mut warnings = self.streaming.validate()?;
        warnings.extend(self.rate_gate.validate()?);
        Ok(warnings)
    }
}
