// src/plugin/protocol.rs
//! JSON request/response protocol spoken by converter plugins
//!
//! The host writes one request object, newline terminated, to the plugin's
//! stdin:
//!
//! ```json
//! {"command": "extract-ir", "args": {"inputPath": "/tmp/x/source", "outDir": "/tmp/x/ir"}}
//! ```
//!
//! and reads exactly one response object from stdout:
//!
//! ```json
//! {"status": "ok", "result": {"irPath": "/tmp/x/ir/kjv.ir.json", "lossClass": "L1"}}
//! ```
//!
//! Older plugins send `profile` instead of `command`; both are accepted.

use crate::convert::LossClass;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::debug;

/// Operations a plugin may be asked to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Operation {
    Detect,
    ExtractIr,
    EmitNative,
}

/// Request sent to a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(alias = "profile")]
    pub command: Operation,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectArgs {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractIrArgs {
    #[serde(alias = "input_path")]
    pub input_path: String,
    #[serde(alias = "out_dir")]
    pub out_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitNativeArgs {
    #[serde(alias = "ir_path")]
    pub ir_path: String,
    #[serde(alias = "out_dir")]
    pub out_dir: String,
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl Request {
    pub fn detect(path: &Path) -> Self {
        Self {
            command: Operation::Detect,
            args: serde_json::json!({ "path": path_arg(path) }),
        }
    }

    pub fn extract_ir(input_path: &Path, out_dir: &Path) -> Self {
        Self {
            command: Operation::ExtractIr,
            args: serde_json::json!({
                "inputPath": path_arg(input_path),
                "outDir": path_arg(out_dir),
            }),
        }
    }

    pub fn emit_native(ir_path: &Path, out_dir: &Path) -> Self {
        Self {
            command: Operation::EmitNative,
            args: serde_json::json!({
                "irPath": path_arg(ir_path),
                "outDir": path_arg(out_dir),
            }),
        }
    }

    /// Decode `args` into an operation-specific type
    pub fn parse_args<T: DeserializeOwned>(&self) -> std::result::Result<T, String> {
        serde_json::from_value(self.args.clone())
            .map_err(|_| format!("invalid arguments for {}", self.command))
    }

    /// One line of JSON, newline terminated
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Response read back from a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            status: Status::Ok,
            result,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            result: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }

    /// Parse a plugin's stdout
    ///
    /// Parser details are logged, never returned: the plugin is untrusted and
    /// its output does not cross into error messages verbatim.
    pub fn from_stdout(plugin: &str, stdout: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(stdout);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::ProtocolError {
                plugin: plugin.to_string(),
                message: "plugin wrote no response".to_string(),
            });
        }
        serde_json::from_str(trimmed).map_err(|e| {
            debug!("Unparseable response from {}: {}", plugin, e);
            Error::ProtocolError {
                plugin: plugin.to_string(),
                message: "response is not a valid JSON response object".to_string(),
            }
        })
    }

    /// The result payload, or the plugin's reported failure
    pub fn into_result(self, plugin: &str) -> Result<serde_json::Value> {
        match self.status {
            Status::Ok => Ok(self.result),
            Status::Error => Err(Error::PluginFailed {
                plugin: plugin.to_string(),
                message: self
                    .error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "plugin reported an error".to_string()),
            }),
        }
    }

    /// Decode an `ok` result into `T`
    pub fn decode<T: DeserializeOwned>(self, plugin: &str, what: &str) -> Result<T> {
        let value = self.into_result(plugin)?;
        serde_json::from_value(value).map_err(|e| {
            debug!("Bad {} result from {}: {}", what, plugin, e);
            Error::ProtocolError {
                plugin: plugin.to_string(),
                message: format!("malformed {} result", what),
            }
        })
    }
}

/// Result of `detect`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectResult {
    #[serde(default)]
    pub detected: bool,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub reason: String,
}

/// One module's outcome in a multi-module `extract-ir` result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleOutcome {
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, alias = "ir_path")]
    pub ir_path: String,
    #[serde(default, alias = "loss_class")]
    pub loss_class: LossClass,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub reason: String,
}

/// `extract-ir` result in either of its two shapes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractIrResult {
    /// One entry per module found in the input
    Multi { modules: Vec<ModuleOutcome> },
    /// A single IR document
    Single {
        #[serde(rename = "irPath", alias = "ir_path")]
        ir_path: String,
        #[serde(default, rename = "lossClass", alias = "loss_class")]
        loss_class: LossClass,
    },
}

/// IR document produced by a successful extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrOutput {
    pub ir_path: PathBuf,
    pub loss_class: LossClass,
}

impl ExtractIrResult {
    /// Reduce either shape to one IR document
    ///
    /// In the multi-module shape the first `ok` module with an IR path wins.
    /// Otherwise the first `error` or `skipped` module's message is reported.
    pub fn into_output(self, plugin: &str) -> Result<IrOutput> {
        let modules = match self {
            Self::Single { ir_path, loss_class } => {
                if ir_path.trim().is_empty() {
                    return Err(Error::PluginFailed {
                        plugin: plugin.to_string(),
                        message: "no IR generated".to_string(),
                    });
                }
                return Ok(IrOutput {
                    ir_path: PathBuf::from(ir_path),
                    loss_class,
                });
            }
            Self::Multi { modules } => modules,
        };

        if let Some(module) = modules
            .iter()
            .find(|m| m.status.eq_ignore_ascii_case("ok") && !m.ir_path.trim().is_empty())
        {
            return Ok(IrOutput {
                ir_path: PathBuf::from(&module.ir_path),
                loss_class: module.loss_class,
            });
        }

        let failure = modules.iter().find(|m| {
            m.status.eq_ignore_ascii_case("error") || m.status.eq_ignore_ascii_case("skipped")
        });
        let message = match failure {
            Some(m) => {
                let detail = [&m.error, &m.reason]
                    .into_iter()
                    .find(|s| !s.trim().is_empty())
                    .cloned()
                    .unwrap_or_else(|| m.status.clone());
                if m.module.is_empty() {
                    detail
                } else {
                    format!("{}: {}", m.module, detail)
                }
            }
            None => "no IR generated".to_string(),
        };
        Err(Error::PluginFailed {
            plugin: plugin.to_string(),
            message,
        })
    }
}

/// Result of `emit-native`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitOutput {
    #[serde(alias = "output_path")]
    pub output_path: PathBuf,
    #[serde(default, alias = "loss_class")]
    pub loss_class: LossClass,
}
