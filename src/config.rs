use anyhow::{Context, Result};
use clap::Parser;
use std::{
    env,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::utils::paths::{BUCKETS_DIR_NAME, DATA_DIR_NAME, TRASH_DIR_NAME};

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Shared root directory.
    pub dir: PathBuf,
    pub password: Option<String>,
    pub api_auth: bool,
    /// Requests per minute per IP; 0 disables the tier.
    pub rate_limit: u32,
    pub auth_rate_limit: u32,
    pub upload_rate_limit: u32,
    pub allowed_origins: Vec<String>,
    pub log_level: String,
    /// Overrides `<dir>/.beamdrop_data/beamdrop.db`.
    pub database_url: Option<String>,
    pub signature_window_secs: i64,
    pub session_ttl_secs: i64,
    pub stats_interval_secs: u64,
    /// 0 disables the limit.
    pub max_upload_bytes: u64,
    /// Base URL used when handing out share links.
    pub public_url: Option<String>,
    /// Take the client IP from `X-Forwarded-For`.
    pub trust_proxy: bool,
    /// PEM certificate and key; serving switches to HTTPS when both are set.
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Share a directory over HTTP with an S3-style object API")]
pub struct Args {
    /// Host to bind to (overrides BEAMDROP_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BEAMDROP_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory to share (overrides BEAMDROP_DIR)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Password protecting the web UI and object API (overrides BEAMDROP_PASSWORD)
    #[arg(short = 'p', long)]
    pub password: Option<String>,

    /// Require signed requests on the object API (overrides BEAMDROP_API_AUTH)
    #[arg(long)]
    pub api_auth: bool,

    /// General requests per minute per IP, 0 to disable (overrides BEAMDROP_RATE_LIMIT)
    #[arg(long)]
    pub rate_limit: Option<u32>,

    /// Login attempts per minute per IP (overrides BEAMDROP_AUTH_RATE_LIMIT)
    #[arg(long)]
    pub auth_rate_limit: Option<u32>,

    /// Uploads per minute per IP (overrides BEAMDROP_UPLOAD_RATE_LIMIT)
    #[arg(long)]
    pub upload_rate_limit: Option<u32>,

    /// Comma separated CORS origins (overrides BEAMDROP_ALLOWED_ORIGINS)
    #[arg(long)]
    pub allowed_origins: Option<String>,

    /// Log level when RUST_LOG is unset (overrides BEAMDROP_LOG_LEVEL)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Database URL (overrides BEAMDROP_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Allowed clock skew for signed requests, in seconds
    #[arg(long)]
    pub signature_window_secs: Option<i64>,

    /// Lifetime of UI sessions, in seconds
    #[arg(long)]
    pub session_ttl_secs: Option<i64>,

    /// Interval between live stats pushes, in seconds
    #[arg(long)]
    pub stats_interval_secs: Option<u64>,

    /// Largest accepted upload in bytes, 0 for unlimited
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Public base URL for share links (overrides BEAMDROP_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Trust X-Forwarded-For for client IPs (overrides BEAMDROP_TRUST_PROXY)
    #[arg(long)]
    pub trust_proxy: bool,

    /// TLS certificate in PEM format (overrides BEAMDROP_TLS_CERT)
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key in PEM format (overrides BEAMDROP_TLS_KEY)
    #[arg(long)]
    pub tls_key: Option<PathBuf>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read and parse `BEAMDROP_*`, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("BEAMDROP_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_or("BEAMDROP_PORT", 7777u16)?;
        let env_dir = env::var("BEAMDROP_DIR").unwrap_or_else(|_| ".".into());
        let env_origins = env::var("BEAMDROP_ALLOWED_ORIGINS").unwrap_or_default();

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            dir: args.dir.unwrap_or_else(|| PathBuf::from(env_dir)),
            password: args
                .password
                .or_else(|| env_opt("BEAMDROP_PASSWORD"))
                .filter(|p| !p.is_empty()),
            api_auth: args.api_auth || env_flag("BEAMDROP_API_AUTH"),
            rate_limit: args
                .rate_limit
                .map_or_else(|| env_or("BEAMDROP_RATE_LIMIT", 100), Ok)?,
            auth_rate_limit: args
                .auth_rate_limit
                .map_or_else(|| env_or("BEAMDROP_AUTH_RATE_LIMIT", 10), Ok)?,
            upload_rate_limit: args
                .upload_rate_limit
                .map_or_else(|| env_or("BEAMDROP_UPLOAD_RATE_LIMIT", 30), Ok)?,
            allowed_origins: split_origins(
                args.allowed_origins.as_deref().unwrap_or(&env_origins),
            ),
            log_level: args
                .log_level
                .or_else(|| env_opt("BEAMDROP_LOG_LEVEL"))
                .unwrap_or_else(|| "info".into()),
            database_url: args
                .database_url
                .or_else(|| env_opt("BEAMDROP_DATABASE_URL")),
            signature_window_secs: args
                .signature_window_secs
                .map_or_else(|| env_or("BEAMDROP_SIGNATURE_WINDOW_SECS", 900), Ok)?,
            session_ttl_secs: args
                .session_ttl_secs
                .map_or_else(|| env_or("BEAMDROP_SESSION_TTL_SECS", 86_400), Ok)?,
            stats_interval_secs: args
                .stats_interval_secs
                .map_or_else(|| env_or("BEAMDROP_STATS_INTERVAL_SECS", 2), Ok)?,
            max_upload_bytes: args.max_upload_bytes.map_or_else(
                || env_or("BEAMDROP_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
                Ok,
            )?,
            public_url: args.public_url.or_else(|| env_opt("BEAMDROP_PUBLIC_URL")),
            trust_proxy: args.trust_proxy || env_flag("BEAMDROP_TRUST_PROXY"),
            tls_cert: args
                .tls_cert
                .or_else(|| env_opt("BEAMDROP_TLS_CERT").map(PathBuf::from)),
            tls_key: args
                .tls_key
                .or_else(|| env_opt("BEAMDROP_TLS_KEY").map(PathBuf::from)),
        };
        cfg.tls_files()?;

        Ok((cfg, args.migrate))
    }

    /// Defaults rooted at `dir`, without reading the environment.
    pub fn for_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 7777,
            dir: dir.into(),
            password: None,
            api_auth: false,
            rate_limit: 100,
            auth_rate_limit: 10,
            upload_rate_limit: 30,
            allowed_origins: Vec::new(),
            log_level: "info".into(),
            database_url: None,
            signature_window_secs: 900,
            session_ttl_secs: 86_400,
            stats_interval_secs: 2,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            public_url: None,
            trust_proxy: false,
            tls_cert: None,
            tls_key: None,
        }
    }

    /// Certificate and key paths when TLS is configured. Setting only one of
    /// them is an error.
    pub fn tls_files(&self) -> Result<Option<(&Path, &Path)>> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Ok(Some((cert.as_path(), key.as_path()))),
            (None, None) => Ok(None),
            _ => anyhow::bail!("--tls-cert and --tls-key must be given together"),
        }
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.join(DATA_DIR_NAME)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.data_dir().join("tmp")
    }

    pub fn trash_dir(&self) -> PathBuf {
        self.dir.join(TRASH_DIR_NAME)
    }

    pub fn buckets_dir(&self) -> PathBuf {
        self.dir.join(BUCKETS_DIR_NAME)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("beamdrop.db")
    }

    pub fn master_key_path(&self) -> PathBuf {
        self.data_dir().join("master.key")
    }

    pub fn max_upload(&self) -> Option<u64> {
        (self.max_upload_bytes > 0).then_some(self.max_upload_bytes)
    }

    /// Public URL of a share token.
    pub fn share_url(&self, token: &str) -> String {
        match &self.public_url {
            Some(base) => format!("{}/share/{}", base.trim_end_matches('/'), token),
            None => format!("/share/{}", token),
        }
    }

    /// Shared root rebased onto `root`; used once the root is canonical.
    pub fn with_dir(mut self, root: &Path) -> Self {
        self.dir = root.to_path_buf();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_are_split_and_trimmed() {
        assert_eq!(
            split_origins(" https://a.example , ,http://b.example"),
            vec!["https://a.example", "http://b.example"]
        );
        assert!(split_origins("").is_empty());
    }

    #[test]
    fn derived_locations() {
        let cfg = AppConfig::for_dir("/srv/share");
        assert_eq!(cfg.tmp_dir(), PathBuf::from("/srv/share/.beamdrop_data/tmp"));
        assert_eq!(cfg.buckets_dir(), PathBuf::from("/srv/share/buckets"));
        assert_eq!(cfg.share_url("abc"), "/share/abc");
        let cfg = AppConfig {
            public_url: Some("https://files.example/".into()),
            max_upload_bytes: 0,
            ..cfg
        };
        assert_eq!(cfg.share_url("abc"), "https://files.example/share/abc");
        assert_eq!(cfg.max_upload(), None);
    }

    #[test]
    fn tls_needs_both_files() {
        let cfg = AppConfig::for_dir("/srv/share");
        assert!(!cfg.tls_enabled());
        assert!(cfg.tls_files().unwrap().is_none());

        let half = AppConfig {
            tls_cert: Some("/etc/beamdrop/cert.pem".into()),
            ..cfg.clone()
        };
        assert!(half.tls_files().is_err());
        assert!(!half.tls_enabled());

        let full = AppConfig {
            tls_key: Some("/etc/beamdrop/key.pem".into()),
            ..half
        };
        let (cert, key) = full.tls_files().unwrap().unwrap();
        assert_eq!(cert, Path::new("/etc/beamdrop/cert.pem"));
        assert_eq!(key, Path::new("/etc/beamdrop/key.pem"));
        assert!(full.tls_enabled());
    }

    #[test]
    fn short_p_is_the_password() {
        let args = Args::try_parse_from(["beamdrop", "-p", "secret", "--port", "8080"]).unwrap();
        assert_eq!(args.password.as_deref(), Some("secret"));
        assert_eq!(args.port, Some(8080));
        assert!(Args::try_parse_from(["beamdrop", "-p"]).is_err());
    }
}
