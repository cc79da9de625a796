//! Server configuration, loaded from environment variables at startup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use devroom_core::{DEFAULT_PROGRAMS, DisabledSandboxProvider, LocalSandboxProvider, SandboxProvider};

/// Runtime configuration for devroom-server.
///
/// Every field except the signing secret has a default so the server works
/// without further setup.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// sqlx SQLite URL (default: `"sqlite://devroom.db"`). The file is created
    /// if missing.
    pub database_url: String,

    /// HS256 secret that session tokens are signed with.
    pub jwt_secret: Option<String>,

    /// Generative Language API key. Without it the AI participant answers
    /// every prompt with the fallback text.
    pub gemini_api_key: Option<String>,

    pub gemini_model: String,

    /// Base URL of the Generative Language API.
    pub gemini_base_url: String,

    /// Inline marker addressing the AI (default: `"@ai"`).
    pub ai_marker: String,

    /// Admit sockets for project ids that do not exist, with an empty tree.
    pub allow_missing_project: bool,

    /// Comma-separated allowed origins; wildcard when unset.
    pub cors_allowed_origins: Option<String>,

    /// Serve Swagger UI at `/swagger-ui` (default: `true`).
    pub enable_swagger: bool,

    /// Run project code on this host (default: `false`). Without it every
    /// sandbox run fails at boot.
    pub sandbox_enabled: bool,

    /// Programs a sandbox may launch (default: `npm,node`).
    pub sandbox_programs: Vec<String>,

    /// Parent directory for sandbox working directories (system temp dir
    /// when unset).
    pub sandbox_root: Option<PathBuf>,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// When set, logs also go to a daily rolling file in this directory.
    pub log_dir: Option<PathBuf>,

    /// Dispatcher command-queue capacity.
    pub queue_capacity: usize,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Build [`Config`] from an arbitrary key lookup.
    pub fn from_source(get: impl Fn(&str) -> Option<String>) -> Self {
        let env_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_owned());
        let non_empty = |key: &str| get(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
        let flag = |key: &str, default: bool| get(key).map(|v| is_truthy(&v)).unwrap_or(default);

        Self {
            bind_address: env_or("DEVROOM_BIND", "0.0.0.0:3000"),
            database_url: env_or("DEVROOM_DATABASE_URL", "sqlite://devroom.db"),
            jwt_secret: non_empty("DEVROOM_JWT_SECRET"),
            gemini_api_key: non_empty("DEVROOM_GEMINI_API_KEY"),
            gemini_model: env_or("DEVROOM_GEMINI_MODEL", "gemini-1.5-flash"),
            gemini_base_url: env_or(
                "DEVROOM_GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com",
            ),
            ai_marker: env_or("DEVROOM_AI_MARKER", devroom_core::DEFAULT_MARKER),
            allow_missing_project: flag("DEVROOM_ALLOW_MISSING_PROJECT", false),
            cors_allowed_origins: non_empty("DEVROOM_CORS_ORIGINS"),
            enable_swagger: flag("DEVROOM_ENABLE_SWAGGER", true),
            sandbox_enabled: flag("DEVROOM_SANDBOX_ENABLED", false),
            sandbox_programs: non_empty("DEVROOM_SANDBOX_PROGRAMS")
                .map(|v| split_list(&v))
                .unwrap_or_else(|| DEFAULT_PROGRAMS.iter().map(|p| (*p).to_owned()).collect()),
            sandbox_root: non_empty("DEVROOM_SANDBOX_ROOT").map(PathBuf::from),
            log_level: env_or("DEVROOM_LOG", "info"),
            log_json: flag("DEVROOM_LOG_JSON", false),
            log_dir: non_empty("DEVROOM_LOG_DIR").map(PathBuf::from),
            queue_capacity: parse_or(get("DEVROOM_QUEUE_CAPACITY"), 256),
        }
    }

    /// Sandbox backend selected by `sandbox_enabled`.
    pub fn sandbox_provider(&self) -> Arc<dyn SandboxProvider> {
        if self.sandbox_enabled {
            Arc::new(LocalSandboxProvider::new(self.sandbox_root.clone()).with_programs(self.sandbox_programs.clone()))
        } else {
            Arc::new(DisabledSandboxProvider)
        }
    }

    /// Apply command-line overrides.
    pub fn with_cli(mut self, cli: Cli) -> Self {
        if let Some(bind) = cli.bind {
            self.bind_address = bind;
        }
        if let Some(url) = cli.database_url {
            self.database_url = url;
        }
        self
    }
}

/// Command-line flags. They take precedence over the environment.
#[derive(Debug, Parser)]
#[command(name = "devroom-server", version, about = "Realtime project collaboration server")]
pub struct Cli {
    /// Address to bind, e.g. `127.0.0.1:8080`.
    #[arg(long)]
    pub bind: Option<String>,

    /// sqlx database URL.
    #[arg(long)]
    pub database_url: Option<String>,
}

// ── private helpers ──────────────────────────────────────────────────────────

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Config::from_source(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = config(&[]);
        assert_eq!(cfg.bind_address, "0.0.0.0:3000");
        assert_eq!(cfg.database_url, "sqlite://devroom.db");
        assert_eq!(cfg.ai_marker, "@ai");
        assert!(cfg.jwt_secret.is_none());
        assert!(cfg.gemini_api_key.is_none());
        assert!(!cfg.allow_missing_project);
        assert!(cfg.enable_swagger);
        assert!(!cfg.log_json);
        assert!(!cfg.sandbox_enabled);
        assert_eq!(cfg.sandbox_programs, ["npm", "node"]);
        assert_eq!(cfg.queue_capacity, 256);
    }

    #[tokio::test]
    async fn sandbox_is_off_unless_enabled() {
        let err = config(&[]).sandbox_provider().boot().await.err().unwrap();
        assert!(matches!(err, devroom_core::SandboxError::Disabled));

        let cfg = config(&[
            ("DEVROOM_SANDBOX_ENABLED", "true"),
            ("DEVROOM_SANDBOX_PROGRAMS", " node , ,deno"),
        ]);
        assert!(cfg.sandbox_enabled);
        assert_eq!(cfg.sandbox_programs, ["node", "deno"]);
        assert!(cfg.sandbox_provider().boot().await.is_ok());
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("DEVROOM_BIND", "127.0.0.1:9000"),
            ("DEVROOM_JWT_SECRET", "s3cret"),
            ("DEVROOM_ALLOW_MISSING_PROJECT", "true"),
            ("DEVROOM_ENABLE_SWAGGER", "0"),
            ("DEVROOM_LOG_JSON", "1"),
            ("DEVROOM_QUEUE_CAPACITY", "8"),
            ("DEVROOM_SANDBOX_ROOT", "/tmp/rooms"),
        ]);
        assert_eq!(cfg.bind_address, "127.0.0.1:9000");
        assert_eq!(cfg.jwt_secret.as_deref(), Some("s3cret"));
        assert!(cfg.allow_missing_project);
        assert!(!cfg.enable_swagger);
        assert!(cfg.log_json);
        assert_eq!(cfg.queue_capacity, 8);
        assert_eq!(cfg.sandbox_root, Some(PathBuf::from("/tmp/rooms")));
    }

    #[test]
    fn blank_and_invalid_values_fall_back() {
        let cfg = config(&[
            ("DEVROOM_GEMINI_API_KEY", "  "),
            ("DEVROOM_QUEUE_CAPACITY", "lots"),
        ]);
        assert!(cfg.gemini_api_key.is_none());
        assert_eq!(cfg.queue_capacity, 256);
    }

    #[test]
    fn cli_overrides_environment() {
        let cli = Cli::parse_from(["devroom-server", "--bind", "127.0.0.1:1", "--database-url", "sqlite::memory:"]);
        let cfg = config(&[("DEVROOM_BIND", "0.0.0.0:2")]).with_cli(cli);
        assert_eq!(cfg.bind_address, "127.0.0.1:1");
        assert_eq!(cfg.database_url, "sqlite::memory:");
    }
}
