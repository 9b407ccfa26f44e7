use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

use crate::auth::token;

#[derive(Parser, Debug, Default)]
#[command(name = "glimsee", about = "Backend for the Glimsee social app")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Run in development mode (session cookie without the Secure flag)
    #[arg(long)]
    pub dev: bool,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    /// Browser origin allowed to call the API with credentials.
    pub cors_origin: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
    pub max_upload_bytes: usize,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub cookie_name: String,
    /// Token signing secret. Generated and persisted in the data dir when unset.
    pub secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            environment: Environment::Production,
            cors_origin: Some("http://localhost:5173".to_string()),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "jwt".to_string(),
            secret: None,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }
        if cli.dev {
            config.server.environment = Environment::Development;
        }

        // Environment overrides
        if let Ok(env) = std::env::var("GLIMSEE_ENV") {
            if env.eq_ignore_ascii_case("development") {
                config.server.environment = Environment::Development;
            }
        }
        if let Ok(secret) = std::env::var("GLIMSEE_SESSION_SECRET") {
            if !secret.is_empty() {
                config.auth.secret = Some(secret);
            }
        }

        // Resolve paths relative to data dir
        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("glimsee.db"));
        }
        if config.storage.path.is_none() {
            config.storage.path = Some(data_dir.join("uploads"));
        }
        if config.auth.secret.is_none() {
            config.auth.secret = Some(token::load_or_create_secret(&data_dir)?);
        }

        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".glimsee")
        })
    }

    /// Local-only defaults rooted at `data_dir`, in development mode.
    pub fn for_data_dir(data_dir: &std::path::Path, secret: &str) -> Self {
        let mut config = Config::default();
        config.server.environment = Environment::Development;
        config.database.path = Some(data_dir.join("glimsee.db"));
        config.storage.path = Some(data_dir.join("uploads"));
        config.auth.secret = Some(secret.to_string());
        config
    }

    pub fn db_path(&self) -> anyhow::Result<&PathBuf> {
        self.database
            .path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("database path not configured"))
    }

    pub fn uploads_path(&self) -> anyhow::Result<&PathBuf> {
        self.storage
            .path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("storage path not configured"))
    }

    pub fn is_development(&self) -> bool {
        self.server.environment == Environment::Development
    }

    /// Session cookies are `Secure` everywhere except local development.
    pub fn secure_cookies(&self) -> bool {
        !self.is_development()
    }
}
