//! Configuration with layered resolution using figment.
//!
//! Resolution order (highest priority last):
//! 1. User config: `~/.config/qualgraph/config.toml` (XDG) or platform config dir
//! 2. Project config: `.qualgraph.toml`
//! 3. Environment variables: `QUALGRAPH_*`, nested keys separated by `__`
//!    (e.g. `QUALGRAPH_WRITER__CHUNK_SIZE=100`)
//!
//! # Intended Usage
//!
//! **Global config** (`~/.config/qualgraph/config.toml`):
//! ```toml
//! [neo4j]
//! uri = "bolt://localhost:7687"
//! user = "neo4j"
//! password = "secret"
//! ```
//!
//! **Project config** (`.qualgraph.toml` next to the ETL inputs):
//! ```toml
//! [writer]
//! chunk_size = 200
//!
//! [schema]
//! evidence_min_len = 10
//!
//! [[schema.inference]]
//! name = "process-tool"
//! source = "Process"
//! target = "Tool"
//! min_score = 3
//! min_confidence = 0.5
//! top_k = 3
//! ```
//!
//! Every section except `[neo4j]` has defaults, so an empty project file is
//! valid.

use std::ops::Deref;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::models::SchemaConfig;

/// Boxed wrapper for figment::Error to reduce Result size on the stack.
#[derive(Debug)]
pub struct ConfigError(Box<figment::Error>);

impl Deref for ConfigError {
    type Target = figment::Error;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self(Box::new(err))
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub neo4j: Neo4jConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
}

/// Neo4j connection settings.
///
/// Typically defined in global config (`~/.config/qualgraph/config.toml`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Neo4jConfig {
    /// Bolt URI (required). Example: `bolt://localhost:7687`
    pub uri: String,
    #[serde(default = "default_neo4j_user")]
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_neo4j_user() -> String {
    "neo4j".to_string()
}

/// Batch discipline for the upsert writer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Facts per transaction.
    pub chunk_size: usize,
    /// Extra attempts for a chunk whose transaction failed.
    pub retries: usize,
}

/// Upper bound on facts per transaction.
pub const MAX_CHUNK_SIZE: usize = 1000;

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            retries: 1,
        }
    }
}

impl WriterConfig {
    /// Chunk size clamped to `1..=MAX_CHUNK_SIZE`.
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, MAX_CHUNK_SIZE)
    }
}

impl Config {
    /// Load config with layered resolution (user → project → env).
    pub fn load() -> Result<Self, ConfigError> {
        Self::figment().extract().map_err(ConfigError::from)
    }

    /// The layered provider chain, exposed for tests and tooling.
    pub fn figment() -> Figment {
        let user_config = Self::user_config_path();

        Figment::new()
            // Layer 0: Built-in vocabulary
            .merge(Serialized::default("schema", SchemaConfig::default()))
            // Layer 1: User config (lowest priority)
            .merge(Toml::file(user_config))
            // Layer 2: Project config
            .merge(Toml::file(".qualgraph.toml"))
            // Layer 3: Environment variables (highest priority)
            .merge(Env::prefixed("QUALGRAPH_").split("__"))
    }

    /// User config path: ~/.config/qualgraph/config.toml (XDG) or platform config dir.
    fn user_config_path() -> std::path::PathBuf {
        // Prefer XDG config location (~/.config) on all platforms
        if let Some(home) = dirs::home_dir() {
            let xdg_path = home.join(".config").join("qualgraph").join("config.toml");
            if xdg_path.exists() {
                return xdg_path;
            }
        }
        // Fall back to platform-specific config dir
        dirs::config_dir()
            .map(|p| p.join("qualgraph").join("config.toml"))
            .unwrap_or_default()
    }
}
