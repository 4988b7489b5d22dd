use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::stack::ChannelType;

/// Options applied when a stack is loaded.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Directory for the disk-backed pixel buffer; system temp dir if absent.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

/// TOML description of a composite stack.
///
/// ```toml
/// [[stacks]]
/// name = "phase"
/// path = "phase.tif"
///
/// [[channels]]
/// stack = "phase"
/// index = 0
/// type = "phase-contrast"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositionConfig {
    #[serde(default)]
    pub load: LoadOptions,
    #[serde(default)]
    pub stacks: Vec<StackSourceConfig>,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StackSourceConfig {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Name of an entry in `stacks`.
    pub stack: String,
    /// Channel index within that stack.
    #[serde(default)]
    pub index: usize,
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub kind: ChannelType,
}

impl CompositionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read a composition file. Relative stack paths are resolved against
    /// the directory containing the file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            for stack in &mut config.stacks {
                if stack.path.is_relative() {
                    stack.path = base.join(&stack.path);
                }
            }
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
