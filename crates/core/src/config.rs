use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StashError;
use crate::quota::QuotaSpec;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub redis: RedisConfig,
    pub retention: RetentionConfig,
    pub quotas: QuotaSpec,
    pub drain: DrainConfig,
    pub archive: ArchiveConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `FEEDSTASH_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("FEEDSTASH_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let retention = RetentionConfig::from_env_profiled(p);
        let drain = DrainConfig::from_env_profiled(p, retention.max_keep);
        Self {
            profile: p.to_string(),
            redis: RedisConfig::from_env_profiled(p),
            quotas: quotas_from_env_profiled(p),
            archive: ArchiveConfig::from_env_profiled(p),
            retention,
            drain,
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  redis:     {} queue={}", self.redis.redacted_url(), self.redis.queue_name);
        tracing::info!(
            "  retention: max_keep={}, slim_mode={}, summary_chars={}",
            self.retention.max_keep, self.retention.slim_mode, self.retention.summary_chars
        );
        if self.quotas.is_empty() {
            tracing::info!("  quotas:    (none)");
        } else {
            let quotas: Vec<String> = self.quotas.iter().map(|(s, f)| format!("{s}={f}")).collect();
            tracing::info!("  quotas:    {}", quotas.join(", "));
        }
        tracing::info!(
            "  drain:     enabled={}, depth>{}, memory>{}MB, every {}min, batch={}",
            self.drain.enabled,
            self.drain.queue_threshold,
            self.drain.memory_threshold_mb,
            self.drain.interval_minutes,
            self.drain.batch_size
        );
        tracing::info!(
            "  archive:   dir={}, format={}, retention_days={}",
            self.archive.export_dir.display(),
            self.archive.format,
            self.archive.retention_days
        );
    }

    /// Check the loaded values for problems that defaults cannot paper over.
    pub fn validate(&self) -> Validation {
        let mut v = Validation::default();

        if self.retention.max_keep == 0 {
            v.errors.push("MAX_KEEP must be greater than 0".into());
        }
        if self.drain.batch_size == 0 {
            v.errors.push("DRAIN_BATCH_SIZE must be greater than 0".into());
        }
        if self.drain.memory_threshold_mb <= 0.0 {
            v.errors.push("DRAIN_MEMORY_THRESHOLD_MB must be positive".into());
        }
        if self.redis.connect_timeout_ms == 0 || self.redis.io_timeout_ms == 0 {
            v.errors.push("Redis timeouts must be greater than 0".into());
        }
        if self.redis.queue_name.trim().is_empty() {
            v.errors.push("REDIS_QUEUE_NAME must not be empty".into());
        }
        for (source, fraction) in self.quotas.iter() {
            if !(0.0..=1.0).contains(&fraction) {
                v.errors.push(format!("quota for '{source}' must be within [0, 1], got {fraction}"));
            }
        }
        let total = self.quotas.total();
        if total > 1.0 {
            v.warnings.push(format!(
                "source quotas sum to {total:.2}; the queue can hold more than max_keep before a drain"
            ));
        }
        if self.drain.queue_threshold < self.retention.max_keep {
            v.warnings.push(format!(
                "DRAIN_QUEUE_THRESHOLD ({}) is below MAX_KEEP ({}); depth-triggered drains will be no-ops",
                self.drain.queue_threshold, self.retention.max_keep
            ));
        }
        if self.archive.retention_days == 0 {
            v.warnings.push("ARCHIVE_RETENTION_DAYS is 0; every archive is swept on the next cycle".into());
        }

        v
    }
}

impl Default for Config {
    fn default() -> Self {
        let retention = RetentionConfig::default();
        Self {
            profile: String::new(),
            redis: RedisConfig::default(),
            quotas: QuotaSpec::default(),
            drain: DrainConfig::with_max_keep(retention.max_keep),
            archive: ArchiveConfig::default(),
            retention,
        }
    }
}

/// Result of [`Config::validate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Validation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<Vec<String>, StashError> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(StashError::Config(self.errors.join("; ")))
        }
    }
}

// ── Redis ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: u32,
    pub password: Option<String>,
    pub queue_name: String,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
}

impl RedisConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "REDIS_HOST", "localhost"),
            port: profiled_env_parse(p, "REDIS_PORT", 6379),
            db: profiled_env_parse(p, "REDIS_DB", 0),
            password: profiled_env_opt(p, "REDIS_PASSWORD"),
            queue_name: profiled_env_or(p, "REDIS_QUEUE_NAME", "data_queue"),
            connect_timeout_ms: profiled_env_parse(p, "REDIS_CONNECT_TIMEOUT_MS", 5000),
            io_timeout_ms: profiled_env_parse(p, "REDIS_IO_TIMEOUT_MS", 5000),
        }
    }

    pub fn url(&self) -> String {
        match &self.password {
            Some(pass) => format!("redis://:{}@{}:{}/{}", pass, self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Connection URL with the password masked.
    pub fn redacted_url(&self) -> String {
        match &self.password {
            Some(_) => format!("redis://:***@{}:{}/{}", self.host, self.port, self.db),
            None => self.url(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 6379,
            db: 0,
            password: None,
            queue_name: "data_queue".into(),
            connect_timeout_ms: 5000,
            io_timeout_ms: 5000,
        }
    }
}

// ── Retention / slim mode ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Records kept live in the queue after a drain.
    pub max_keep: u64,
    /// Reduce records to the slim allow-list before they are stored.
    pub slim_mode: bool,
    /// Character budget for a summary synthesized from `text` in slim mode.
    pub summary_chars: usize,
}

impl RetentionConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_keep: profiled_env_parse(p, "MAX_KEEP", 10_000),
            slim_mode: profiled_env_bool(p, "SLIM_MODE", false),
            summary_chars: profiled_env_parse(p, "SLIM_SUMMARY_CHARS", 500),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_keep: 10_000,
            slim_mode: false,
            summary_chars: 500,
        }
    }
}

// ── Quotas ────────────────────────────────────────────────────

fn quotas_from_env_profiled(p: &str) -> QuotaSpec {
    let Some(raw) = profiled_env_opt(p, "SOURCE_QUOTAS") else {
        return QuotaSpec::default();
    };
    let mut spec = QuotaSpec::default();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match QuotaSpec::parse(entry) {
            Ok(parsed) => {
                for (source, fraction) in parsed.iter() {
                    spec.insert(source, fraction);
                }
            }
            Err(e) => tracing::warn!(entry, error = %e, "Skipping malformed SOURCE_QUOTAS entry"),
        }
    }
    spec
}

// ── Drain triggers ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainConfig {
    pub enabled: bool,
    /// Drain when the queue holds more than this many records.
    pub queue_threshold: u64,
    /// Drain when the store reports more memory than this.
    pub memory_threshold_mb: f64,
    /// Drain when this long has passed since the last successful drain.
    pub interval_minutes: u64,
    /// Upper bound on records fetched per range request.
    pub batch_size: usize,
    /// Head window scanned when rebuilding source counters.
    pub reconcile_max_scan: u64,
}

impl DrainConfig {
    fn from_env_profiled(p: &str, max_keep: u64) -> Self {
        Self {
            enabled: profiled_env_bool(p, "AUTO_EXPORT_ENABLED", true),
            queue_threshold: profiled_env_parse(p, "DRAIN_QUEUE_THRESHOLD", 5000),
            memory_threshold_mb: profiled_env_parse(p, "DRAIN_MEMORY_THRESHOLD_MB", 100.0),
            interval_minutes: profiled_env_parse(p, "DRAIN_INTERVAL_MINUTES", 60),
            batch_size: profiled_env_parse(p, "DRAIN_BATCH_SIZE", 1000),
            reconcile_max_scan: profiled_env_parse(p, "RECONCILE_MAX_SCAN", max_keep),
        }
    }

    pub fn with_max_keep(max_keep: u64) -> Self {
        Self {
            enabled: true,
            queue_threshold: 5000,
            memory_threshold_mb: 100.0,
            interval_minutes: 60,
            batch_size: 1000,
            reconcile_max_scan: max_keep,
        }
    }
}

// ── Archive ───────────────────────────────────────────────────

/// On-disk encoding of an archive file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveFormat {
    /// Pretty-printed JSON document.
    Json,
    /// Compact JSON inside a zstd frame.
    JsonZstd,
    /// Columnar Parquet with zstd pages.
    Parquet,
}

impl ArchiveFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveFormat::Json => "json",
            ArchiveFormat::JsonZstd => "json.zst",
            ArchiveFormat::Parquet => "parquet",
        }
    }

    /// File extension, without the leading dot.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// Recognise a format from a full file name.
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.ends_with(".json.zst") {
            Some(ArchiveFormat::JsonZstd)
        } else if name.ends_with(".json") {
            Some(ArchiveFormat::Json)
        } else if name.ends_with(".parquet") {
            Some(ArchiveFormat::Parquet)
        } else {
            None
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveFormat {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ArchiveFormat::Json),
            "json.zst" | "json_zst" | "zstd" | "compressed" => Ok(ArchiveFormat::JsonZstd),
            "parquet" => Ok(ArchiveFormat::Parquet),
            other => Err(StashError::Config(format!("unknown archive format '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub export_dir: PathBuf,
    pub format: ArchiveFormat,
    pub retention_days: u32,
    pub sweep_enabled: bool,
}

impl ArchiveConfig {
    fn from_env_profiled(p: &str) -> Self {
        let format = match profiled_env_opt(p, "ARCHIVE_FORMAT") {
            Some(raw) => raw.parse::<ArchiveFormat>().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to json archive format");
                ArchiveFormat::Json
            }),
            None => ArchiveFormat::Json,
        };
        Self {
            export_dir: PathBuf::from(profiled_env_or(p, "EXPORT_DIR", "data_exports")),
            format,
            retention_days: profiled_env_parse(p, "ARCHIVE_RETENTION_DAYS", 30),
            sweep_enabled: profiled_env_bool(p, "ARCHIVE_SWEEP_ENABLED", true),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            export_dir: PathBuf::from("data_exports"),
            format: ArchiveFormat::Json,
            retention_days: 30,
            sweep_enabled: true,
        }
    }
}
