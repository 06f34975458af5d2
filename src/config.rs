//! Configuration for vibe-data
//!
//! CLI arguments and environment variable handling using clap, plus the
//! runtime knobs for the response cache.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::cli::Command;

/// Default entry lifetime for cached responses (5 minutes)
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Default spacing between dispatched fetches (2 seconds)
pub const DEFAULT_MIN_REQUEST_SPACING: Duration = Duration::from_millis(2000);

/// Upper bound accepted for `CACHE_TTL_SECS` (one week)
pub const MAX_CACHE_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Upper bound accepted for `MIN_REQUEST_SPACING_MS` (one hour)
pub const MAX_MIN_REQUEST_SPACING_MS: u64 = 60 * 60 * 1000;

/// vibe-data - local data layer for the vibe events client
#[derive(Parser, Debug, Clone)]
#[command(name = "vibe-data")]
#[command(about = "Response cache and simulated persistence for the vibe events client")]
pub struct Args {
    /// Directory holding the durable and session storage files
    #[arg(long, env = "DATA_DIR", default_value = ".vibe-data")]
    pub data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Lifetime of cached responses in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "300")]
    pub cache_ttl_secs: u64,

    /// Minimum spacing between dispatched fetches in milliseconds
    #[arg(long, env = "MIN_REQUEST_SPACING_MS", default_value = "2000")]
    pub min_request_spacing_ms: u64,

    /// Base URL of the remote user API (used for elevated-mode user updates)
    #[arg(long, env = "REMOTE_URL")]
    pub remote_url: Option<String>,

    /// Bearer token for the remote user API
    #[arg(long, env = "REMOTE_TOKEN")]
    pub remote_token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    /// Path of the storage file that survives across sessions
    pub fn durable_path(&self) -> PathBuf {
        self.data_dir.join("durable.json")
    }

    /// Path of the storage file scoped to the current session
    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    /// Cache settings derived from the arguments
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_secs(self.cache_ttl_secs),
            min_request_spacing: Duration::from_millis(self.min_request_spacing_ms),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_ttl_secs == 0 {
            return Err("CACHE_TTL_SECS must be greater than zero".to_string());
        }
        if self.cache_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(format!(
                "CACHE_TTL_SECS must be at most {}, got {}",
                MAX_CACHE_TTL_SECS, self.cache_ttl_secs
            ));
        }
        if self.min_request_spacing_ms > MAX_MIN_REQUEST_SPACING_MS {
            return Err(format!(
                "MIN_REQUEST_SPACING_MS must be at most {}, got {}",
                MAX_MIN_REQUEST_SPACING_MS, self.min_request_spacing_ms
            ));
        }

        if let Some(ref url) = self.remote_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!("REMOTE_URL must be an http(s) URL, got {}", url));
            }
        }

        Ok(())
    }
}

/// Configuration for the response cache and request coalescer
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a stored response stays readable (default: 5 minutes)
    pub ttl: Duration,
    /// Minimum gap between two dispatched fetches, across all keys (default: 2s)
    pub min_request_spacing: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            min_request_spacing: DEFAULT_MIN_REQUEST_SPACING,
        }
    }
}

impl CacheConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CACHE_TTL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                if secs > 0 && secs <= MAX_CACHE_TTL_SECS {
                    config.ttl = Duration::from_secs(secs);
                }
            }
        }

        if let Ok(val) = std::env::var("MIN_REQUEST_SPACING_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                if ms <= MAX_MIN_REQUEST_SPACING_MS {
                    config.min_request_spacing = Duration::from_millis(ms);
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["vibe-data"];
        argv.extend_from_slice(extra);
        argv.push("mode");
        argv.push("show");
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(300));
        assert_eq!(config.min_request_spacing, Duration::from_millis(2000));
    }

    #[test]
    fn test_args_cache_config() {
        let args = parse(&["--cache-ttl-secs", "60", "--min-request-spacing-ms", "500"]);
        let config = args.cache_config();
        assert_eq!(config.ttl, Duration::from_secs(60));
        assert_eq!(config.min_request_spacing, Duration::from_millis(500));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let args = parse(&["--cache-ttl-secs", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_cache_knobs() {
        let args = parse(&["--min-request-spacing-ms", u64::MAX.to_string().as_str()]);
        assert!(args.validate().is_err());

        let args = parse(&["--cache-ttl-secs", (MAX_CACHE_TTL_SECS + 1).to_string().as_str()]);
        assert!(args.validate().is_err());

        let args = parse(&[
            "--cache-ttl-secs",
            MAX_CACHE_TTL_SECS.to_string().as_str(),
            "--min-request-spacing-ms",
            MAX_MIN_REQUEST_SPACING_MS.to_string().as_str(),
        ]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_http_remote() {
        let args = parse(&["--remote-url", "ftp://example.com"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_storage_paths() {
        let args = parse(&["--data-dir", "/tmp/vibe"]);
        assert_eq!(args.durable_path(), PathBuf::from("/tmp/vibe/durable.json"));
        assert_eq!(args.session_path(), PathBuf::from("/tmp/vibe/session.json"));
    }
}
