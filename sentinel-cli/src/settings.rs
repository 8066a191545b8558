//! Layered process configuration.
//!
//! Sources, later ones winning: built-in defaults, the TOML config file,
//! then `SENTINEL_`-prefixed environment variables with `__` separating
//! nested keys (`SENTINEL_RAG__FINAL_TOP_N=3`,
//! `SENTINEL_PROVIDERS__GENERATOR__BACKEND=openai`).

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::{Figment, Provider};
use sentinel_rag::{ProviderSettings, RagConfig};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "sentinel.toml";
pub const ENV_PREFIX: &str = "SENTINEL_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub rag: RagConfig,
    pub providers: ProviderSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

/// The full source stack for a config file at `path`. A missing file is skipped.
pub fn figment(path: &Path) -> Figment {
    layered(Toml::file(path))
}

fn layered(file: impl Provider) -> Figment {
    Figment::from(Serialized::defaults(Settings::default()))
        .merge(file)
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load and validate settings.
pub fn load(path: &Path) -> anyhow::Result<Settings> {
    let settings: Settings = figment(path).extract()?;
    settings.rag.validate()?;
    Ok(settings)
}
