//! 🔧 App Configuration: TOML (and `TBX_*` env vars) in, one [`AppConfig`] out.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment. Every credential the run needs lives in here and gets handed
//! to the collaborator that needs it. Nothing reads ambient globals.

use std::path::{Path, PathBuf};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::notify::NotifyConfig;
use crate::payload::PayloadShape;
use crate::pipeline::StepConfig;
use crate::relational::RelationalConfig;
use crate::store::StoreConfig;

/// 📂 Where the first rows come from and where every pass leaves its output.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// initial row file; may be absent when an `extract` step produces it
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("staging")
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: None,
            staging_dir: default_staging_dir(),
        }
    }
}

/// 📦 The whole run, as configured.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub relational: RelationalConfig,
    #[serde(default)]
    pub shapes: Vec<PayloadShape>,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// 🚀 Load the config from an optional TOML file merged over `TBX_*` env vars.
///
/// 📐 `None` means env vars only. `Some(path)` means env vars plus the file, and the
/// file wins on conflicts. Nested keys in env vars use a double underscore:
/// `TBX_SOURCE__STAGING_DIR=/tmp/stage`.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("TBX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (TBX_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (TBX_*). \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
