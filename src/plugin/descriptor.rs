// src/plugin/descriptor.rs
//! Plugin identity and capabilities
//!
//! External plugins describe themselves in a `plugin.json` next to their
//! entrypoint:
//!
//! ```json
//! {
//!   "plugin_id": "osis",
//!   "kind": "format",
//!   "version": "1.2.0",
//!   "entrypoint": "bin/osis-plugin",
//!   "capabilities": { "inputs": ["osis"], "outputs": ["ir"] }
//! }
//! ```
//!
//! The full ID is `kind.name` (`format.osis`). A `plugin_id` that already
//! carries the kind prefix is used unchanged.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum_macros::{AsRefStr, Display, EnumString};

/// Descriptor file looked up in each external plugin directory
pub const DESCRIPTOR_FILE: &str = "plugin.json";

/// Where a plugin's code lives
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PluginSource {
    /// Compiled into this binary
    #[default]
    Embedded,
    /// Separate executable under the plugin directory
    External,
}

/// Formats a plugin consumes and produces
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// A converter plugin's manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub plugin_id: String,
    pub kind: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub entrypoint: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub source: PluginSource,
    /// Directory the descriptor was loaded from (external plugins only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl PluginDescriptor {
    /// Descriptor for a compiled-in plugin
    pub fn embedded(kind: &str, name: &str, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            plugin_id: name.to_string(),
            kind: kind.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            entrypoint: String::new(),
            capabilities: Capabilities {
                inputs: inputs.iter().map(|s| s.to_string()).collect(),
                outputs: outputs.iter().map(|s| s.to_string()).collect(),
            },
            source: PluginSource::Embedded,
            dir: None,
        }
    }

    /// Load and validate `<dir>/plugin.json`
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(DESCRIPTOR_FILE);
        let bytes = std::fs::read(&path)?;
        let mut descriptor: Self = serde_json::from_slice(&bytes).map_err(|_| {
            Error::PluginValidation(format!("{} is not a valid plugin descriptor", path.display()))
        })?;

        if descriptor.plugin_id.trim().is_empty() || descriptor.kind.trim().is_empty() {
            return Err(Error::PluginValidation(format!(
                "{} must name plugin_id and kind",
                path.display()
            )));
        }
        if descriptor.entrypoint.trim().is_empty() {
            return Err(Error::PluginValidation(format!(
                "{} has no entrypoint",
                path.display()
            )));
        }

        descriptor.source = PluginSource::External;
        descriptor.dir = Some(dir.to_path_buf());
        Ok(descriptor)
    }

    /// Full `kind.name` identity
    pub fn id(&self) -> String {
        let prefix = format!("{}.", self.kind);
        if self.plugin_id.starts_with(&prefix) {
            self.plugin_id.clone()
        } else {
            format!("{}{}", prefix, self.plugin_id)
        }
    }

    pub fn accepts(&self, format: &str) -> bool {
        self.capabilities.inputs.iter().any(|i| i.eq_ignore_ascii_case(format))
    }

    pub fn produces(&self, format: &str) -> bool {
        self.capabilities.outputs.iter().any(|o| o.eq_ignore_ascii_case(format))
    }

    /// Turns `format` into IR
    pub fn is_extractor_for(&self, format: &str) -> bool {
        self.accepts(format) && self.produces("ir")
    }

    /// Turns IR into `format`
    pub fn is_emitter_for(&self, format: &str) -> bool {
        self.accepts("ir") && self.produces(format)
    }

    pub fn is_embedded(&self) -> bool {
        self.source == PluginSource::Embedded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_id_joins_kind_and_name() {
        let d = PluginDescriptor::embedded("format", "sword-pure", &["sword"], &["ir"]);
        assert_eq!(d.id(), "format.sword-pure");

        let mut prefixed = d.clone();
        prefixed.plugin_id = "format.sword-pure".to_string();
        assert_eq!(prefixed.id(), "format.sword-pure");
    }

    #[test]
    fn test_capability_matching() {
        let extractor = PluginDescriptor::embedded("format", "osis", &["OSIS"], &["ir"]);
        assert!(extractor.is_extractor_for("osis"));
        assert!(!extractor.is_emitter_for("osis"));

        let emitter = PluginDescriptor::embedded("format", "ir-json", &["ir"], &["json"]);
        assert!(emitter.is_emitter_for("json"));
        assert!(!emitter.is_extractor_for("json"));
    }

    #[test]
    fn test_load_external() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(DESCRIPTOR_FILE),
            r#"{"plugin_id":"usfm","kind":"format","version":"0.3.0","entrypoint":"run.sh",
                "capabilities":{"inputs":["usfm"],"outputs":["ir"]}}"#,
        )
        .unwrap();

        let d = PluginDescriptor::load(dir.path()).unwrap();
        assert_eq!(d.id(), "format.usfm");
        assert_eq!(d.source, PluginSource::External);
        assert_eq!(d.dir.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_load_rejects_missing_entrypoint() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(DESCRIPTOR_FILE),
            r#"{"plugin_id":"usfm","kind":"format"}"#,
        )
        .unwrap();
        assert!(matches!(
            PluginDescriptor::load(dir.path()),
            Err(Error::PluginValidation(_))
        ));
    }

    #[test]
    fn test_source_strings() {
        assert_eq!(PluginSource::External.to_string(), "external");
        assert_eq!("embedded".parse::<PluginSource>().unwrap(), PluginSource::Embedded);
    }
}
