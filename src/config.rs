use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::color::TransformContext;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "COLORCONVERT_CONFIG";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Colour configuration shared by every conversion.
pub struct AppConfig {
    /// Directories searched for relative LUT file names.
    pub search_path: Vec<PathBuf>,
    /// Extra colorspace names mapped onto built-in ones.
    pub aliases: BTreeMap<String, String>,
    /// Edge length of the 3D LUT baked for `--gpulegacy`.
    pub legacy_lut_size: usize,
    pub exposure: f32,
    pub gamma: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            search_path: Vec::new(),
            aliases: BTreeMap::new(),
            legacy_lut_size: 32,
            exposure: 0.0,
            gamma: 1.0,
        }
    }
}

impl AppConfig {
    /// Returns the config file path and whether it was named explicitly.
    pub fn config_path() -> Option<(PathBuf, bool)> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some((PathBuf::from(path), true));
        }
        dirs::config_dir().map(|d| (d.join("colorconvert").join("config.toml"), false))
    }

    /// Loads the config. An explicitly named file must exist and parse; the
    /// default location silently falls back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        match Self::config_path() {
            Some((path, true)) => Self::load_from(&path),
            Some((path, false)) if path.is_file() => match Self::load_from(&path) {
                Ok(config) => Ok(config),
                Err(err) => {
                    tracing::warn!("ignoring config {}: {:#}", path.display(), err);
                    Ok(Self::default())
                }
            },
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        if config.legacy_lut_size < 2 {
            anyhow::bail!(
                "config {}: legacy_lut_size must be at least 2, got {}",
                path.display(),
                config.legacy_lut_size
            );
        }
        tracing::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn transform_context(&self) -> TransformContext {
        TransformContext {
            search_path: self.search_path.clone(),
            aliases: self.aliases.clone(),
            exposure: self.exposure,
            gamma: self.gamma,
        }
    }
}
