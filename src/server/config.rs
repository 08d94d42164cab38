//! Server configuration from command-line flags with `ONWARD_*` environment
//! fallbacks. Flags win over environment variables, which win over defaults.

use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_JWT_SECRET: &str = "onward-dev-secret";
pub const DEFAULT_ACCESS_TTL_SECS: i64 = 3600;
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 30 * 86_400;
pub const DEFAULT_PUSH_URL: &str = "https://exp.host/--/api/v2/push/send";

/// Requests allowed per client IP within one rate-limit window.
pub const RATE_LIMIT_MAX_REQUESTS: u64 = 100;
pub const RATE_LIMIT_WINDOW_SECS: u64 = 900;

#[derive(Parser, Debug, Default)]
#[command(name = "onward-server", version, about = "Onward recovery API server")]
pub struct Cli {
    /// Address to listen on (env: ONWARD_BIND)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Data directory holding the SQLite database (env: ONWARD_HOME)
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Secret used to sign and verify tokens (env: ONWARD_JWT_SECRET)
    #[arg(long)]
    pub jwt_secret: Option<String>,

    /// Access token lifetime in seconds (env: ONWARD_ACCESS_TTL_SECS)
    #[arg(long)]
    pub access_ttl: Option<i64>,

    /// Refresh token lifetime in seconds (env: ONWARD_REFRESH_TTL_SECS)
    #[arg(long)]
    pub refresh_ttl: Option<i64>,

    /// Push gateway endpoint (env: ONWARD_PUSH_URL)
    #[arg(long)]
    pub push_url: Option<String>,

    /// Base URL of the AI chat backend; canned replies when unset
    /// (env: ONWARD_AI_URL)
    #[arg(long)]
    pub ai_url: Option<String>,

    /// Production mode: hide internal error details in responses
    /// (env: ONWARD_PRODUCTION)
    #[arg(long)]
    pub production: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub push_url: String,
    pub ai_base_url: Option<String>,
    pub production: bool,
}

impl Config {
    pub fn from_cli_and_env(cli: Cli) -> Self {
        let bind_addr = cli
            .bind
            .or_else(|| std::env::var("ONWARD_BIND").ok())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let data_dir = cli
            .data_dir
            .or_else(|| std::env::var("ONWARD_HOME").ok().map(PathBuf::from))
            .unwrap_or_else(default_data_dir);

        let jwt_secret = cli
            .jwt_secret
            .or_else(|| std::env::var("ONWARD_JWT_SECRET").ok())
            .unwrap_or_else(|| DEFAULT_JWT_SECRET.to_string());

        let access_ttl_secs = cli
            .access_ttl
            .or_else(|| env_i64("ONWARD_ACCESS_TTL_SECS"))
            .unwrap_or(DEFAULT_ACCESS_TTL_SECS);

        let refresh_ttl_secs = cli
            .refresh_ttl
            .or_else(|| env_i64("ONWARD_REFRESH_TTL_SECS"))
            .unwrap_or(DEFAULT_REFRESH_TTL_SECS);

        let push_url = cli
            .push_url
            .or_else(|| std::env::var("ONWARD_PUSH_URL").ok())
            .unwrap_or_else(|| DEFAULT_PUSH_URL.to_string());

        let ai_base_url = cli
            .ai_url
            .or_else(|| std::env::var("ONWARD_AI_URL").ok())
            .filter(|url| !url.is_empty());

        let production = cli.production || env_flag("ONWARD_PRODUCTION");

        Config {
            bind_addr,
            db_path: data_dir.join("onward.db"),
            jwt_secret,
            access_ttl_secs,
            refresh_ttl_secs,
            push_url,
            ai_base_url,
            production,
        }
    }
}

fn default_data_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => PathBuf::from(home).join(".onward"),
        _ => PathBuf::from(".onward"),
    }
}

fn env_i64(name: &str) -> Option<i64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).ok().as_deref(),
        Some("1") | Some("true") | Some("yes")
    )
}
