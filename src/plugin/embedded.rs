// src/plugin/embedded.rs
//! Compiled-in converter plugins
//!
//! Embedded plugins speak the same request/response types as external ones
//! but run in-process, so they are available under every posture and need
//! no path validation.

use super::descriptor::PluginDescriptor;
use super::protocol::{
    DetectArgs, DetectResult, EmitNativeArgs, EmitOutput, ExtractIrArgs, ModuleOutcome, Operation,
    Request, Response,
};
use crate::convert::LossClass;
use crate::hash;
use crate::sword::{self, SwordConf};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// An in-process plugin
pub trait EmbeddedPlugin: Send + Sync {
    fn descriptor(&self) -> PluginDescriptor;

    /// Handle one request; failures are reported in the response
    fn handle(&self, request: &Request) -> Response;
}

/// Version tag written into every IR document
pub const IR_VERSION: &str = "1";

/// Intermediate representation written by the SWORD extractor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IrDocument {
    pub ir_version: String,
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub source_format: String,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Text data files carried verbatim
    #[serde(default)]
    pub documents: Vec<IrText>,
    /// Binary data files recorded by size and hash only
    #[serde(default)]
    pub data_files: Vec<IrDataFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrText {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrDataFile {
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

fn respond(result: Result<serde_json::Value, String>) -> Response {
    match result {
        Ok(value) => Response::ok(value),
        Err(message) => Response::error(message),
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

/// Extracts IR from SWORD module trees (`mods.d/*.conf` plus data files)
pub struct SwordPure;

impl SwordPure {
    fn detect(&self, args: DetectArgs) -> Result<serde_json::Value, String> {
        let root = Path::new(&args.path);
        let result = if sword::is_module_tree(root) {
            DetectResult {
                detected: true,
                format: "sword".to_string(),
                reason: format!("{}/*.conf present", sword::MODS_DIR),
            }
        } else {
            DetectResult {
                detected: false,
                format: String::new(),
                reason: format!("no {} directory", sword::MODS_DIR),
            }
        };
        to_value(&result)
    }

    fn extract(&self, args: ExtractIrArgs) -> Result<serde_json::Value, String> {
        let root = PathBuf::from(&args.input_path);
        let out_dir = PathBuf::from(&args.out_dir);
        let confs = sword::read_confs(&root).map_err(|e| e.to_string())?;
        if confs.is_empty() {
            return Err("no SWORD module configuration found".to_string());
        }
        fs::create_dir_all(&out_dir).map_err(|e| e.to_string())?;

        let mut modules = Vec::with_capacity(confs.len());
        for (conf_path, conf) in &confs {
            debug!("Extracting SWORD module {} from {}", conf.name, conf_path.display());
            modules.push(match build_ir(&root, conf) {
                Ok((doc, loss)) => {
                    let ir_path = out_dir.join(format!("{}.ir.json", conf.name.to_ascii_lowercase()));
                    match write_ir(&ir_path, &doc) {
                        Ok(()) => ModuleOutcome {
                            module: conf.name.clone(),
                            status: "ok".to_string(),
                            ir_path: ir_path.to_string_lossy().into_owned(),
                            loss_class: loss,
                            ..Default::default()
                        },
                        Err(e) => ModuleOutcome {
                            module: conf.name.clone(),
                            status: "error".to_string(),
                            error: e,
                            ..Default::default()
                        },
                    }
                }
                Err(reason) => ModuleOutcome {
                    module: conf.name.clone(),
                    status: "skipped".to_string(),
                    reason,
                    ..Default::default()
                },
            });
        }

        if let [only] = modules.as_slice()
            && only.status == "ok"
        {
            return Ok(serde_json::json!({
                "irPath": only.ir_path,
                "lossClass": only.loss_class,
            }));
        }
        Ok(serde_json::json!({ "modules": modules }))
    }
}

fn build_ir(root: &Path, conf: &SwordConf) -> Result<(IrDocument, LossClass), String> {
    let mut doc = IrDocument {
        ir_version: IR_VERSION.to_string(),
        id: conf.name.clone(),
        title: conf.description().to_string(),
        language: conf.language().to_string(),
        source_format: "sword".to_string(),
        driver: conf.driver().to_string(),
        metadata: conf
            .entries
            .iter()
            .filter_map(|(k, v)| v.first().map(|first| (k.clone(), first.clone())))
            .collect(),
        ..Default::default()
    };

    let Some(data_path) = conf.data_path() else {
        return Ok((doc, LossClass::L3));
    };
    let data_root = crate::filesystem::path::join_member(root, data_path).map_err(|e| e.to_string())?;
    // DataPath may name a file prefix (`.../kjv/kjv`) rather than a directory
    let data_dir = if data_root.is_dir() {
        data_root
    } else {
        match data_root.parent() {
            Some(parent) if parent.is_dir() => parent.to_path_buf(),
            _ => return Err(format!("data path {} not found", data_path)),
        }
    };

    for entry in WalkDir::new(&data_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| e.to_string())?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        let bytes = fs::read(entry.path()).map_err(|e| e.to_string())?;
        match std::str::from_utf8(&bytes) {
            Ok(text) if !text.contains('\0') => doc.documents.push(IrText {
                path: relative,
                content: text.to_string(),
            }),
            _ => doc.data_files.push(IrDataFile {
                path: relative,
                size: bytes.len() as u64,
                sha256: hash::sha256(&bytes),
            }),
        }
    }

    let loss = if doc.data_files.is_empty() && !doc.documents.is_empty() {
        LossClass::L0
    } else {
        LossClass::L3
    };
    Ok((doc, loss))
}

fn write_ir(path: &Path, doc: &IrDocument) -> Result<(), String> {
    let json = serde_json::to_string_pretty(doc).map_err(|e| e.to_string())?;
    fs::write(path, json).map_err(|e| e.to_string())
}

impl EmbeddedPlugin for SwordPure {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::embedded("format", "sword-pure", &["sword"], &["ir"])
    }

    fn handle(&self, request: &Request) -> Response {
        respond(match request.command {
            Operation::Detect => request.parse_args().and_then(|a| self.detect(a)),
            Operation::ExtractIr => request.parse_args().and_then(|a| self.extract(a)),
            Operation::EmitNative => Err("format.sword-pure cannot emit native output".to_string()),
        })
    }
}

/// Emits IR as a pretty-printed JSON corpus
pub struct IrJson;

impl IrJson {
    fn emit(&self, args: EmitNativeArgs) -> Result<serde_json::Value, String> {
        let ir_path = PathBuf::from(&args.ir_path);
        let bytes = fs::read(&ir_path).map_err(|e| format!("cannot read IR: {}", e))?;
        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|_| "IR is not valid JSON".to_string())?;
        if !value.is_object() {
            return Err("IR is not a JSON object".to_string());
        }

        let file_name = ir_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "corpus.ir.json".to_string());
        let stem = file_name
            .strip_suffix(".ir.json")
            .or_else(|| file_name.strip_suffix(".json"))
            .unwrap_or(&file_name);

        let out_dir = PathBuf::from(&args.out_dir);
        fs::create_dir_all(&out_dir).map_err(|e| e.to_string())?;
        let output_path = out_dir.join(format!("{}.json", stem));
        let pretty = serde_json::to_string_pretty(&value).map_err(|e| e.to_string())?;
        fs::write(&output_path, pretty).map_err(|e| e.to_string())?;

        to_value(&EmitOutput {
            output_path,
            loss_class: LossClass::L0,
        })
    }
}

impl EmbeddedPlugin for IrJson {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::embedded("format", "ir-json", &["ir"], &["json"])
    }

    fn handle(&self, request: &Request) -> Response {
        respond(match request.command {
            Operation::Detect => to_value(&DetectResult {
                detected: false,
                format: String::new(),
                reason: "format.ir-json only emits".to_string(),
            }),
            Operation::ExtractIr => Err("format.ir-json cannot extract IR".to_string()),
            Operation::EmitNative => request.parse_args().and_then(|a| self.emit(a)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::protocol::ExtractIrResult;
    use tempfile::TempDir;

    fn module_tree(root: &Path, confs: &[(&str, &str)]) {
        fs::create_dir_all(root.join("mods.d")).unwrap();
        for (name, body) in confs {
            fs::write(root.join("mods.d").join(format!("{}.conf", name)), body).unwrap();
        }
    }

    #[test]
    fn test_sword_detect() {
        let dir = TempDir::new().unwrap();
        let plugin = SwordPure;

        let resp = plugin.handle(&Request::detect(dir.path()));
        let result: DetectResult = resp.decode("format.sword-pure", "detect").unwrap();
        assert!(!result.detected);

        module_tree(dir.path(), &[("kjv", "[KJV]\n")]);
        let resp = plugin.handle(&Request::detect(dir.path()));
        let result: DetectResult = resp.decode("format.sword-pure", "detect").unwrap();
        assert!(result.detected);
        assert_eq!(result.format, "sword");
    }

    #[test]
    fn test_sword_extract_single_module() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        module_tree(
            &src,
            &[("kjv", "[KJV]\nDataPath=./modules/texts/rawtext/kjv/\nModDrv=RawText\nLang=en\n")],
        );
        let data = src.join("modules/texts/rawtext/kjv");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("ot"), "In the beginning").unwrap();

        let out = dir.path().join("ir");
        let resp = SwordPure.handle(&Request::extract_ir(&src, &out));
        let result: ExtractIrResult = resp.decode("format.sword-pure", "extract-ir").unwrap();
        let output = result.into_output("format.sword-pure").unwrap();

        assert_eq!(output.ir_path, out.join("kjv.ir.json"));
        assert_eq!(output.loss_class, LossClass::L0);
        let doc: IrDocument = serde_json::from_slice(&fs::read(&output.ir_path).unwrap()).unwrap();
        assert_eq!(doc.id, "KJV");
        assert_eq!(doc.language, "en");
        assert_eq!(doc.documents[0].content, "In the beginning");
    }

    #[test]
    fn test_sword_extract_binary_data_is_inventoried() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        module_tree(&src, &[("kjv", "[KJV]\nDataPath=./modules/texts/ztext/kjv/\n")]);
        let data = src.join("modules/texts/ztext/kjv");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("ot.bzz"), [0u8, 159, 146, 150]).unwrap();

        let out = dir.path().join("ir");
        let output = SwordPure
            .handle(&Request::extract_ir(&src, &out))
            .decode::<ExtractIrResult>("p", "extract-ir")
            .unwrap()
            .into_output("p")
            .unwrap();
        assert_eq!(output.loss_class, LossClass::L3);
        let doc: IrDocument = serde_json::from_slice(&fs::read(&output.ir_path).unwrap()).unwrap();
        assert_eq!(doc.data_files.len(), 1);
        assert_eq!(doc.data_files[0].size, 4);
    }

    #[test]
    fn test_sword_extract_multi_module() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        module_tree(
            &src,
            &[
                ("asv", "[ASV]\nDataPath=./missing/asv/\n"),
                ("web", "[WEB]\nModDrv=zText\n"),
            ],
        );
        let out = dir.path().join("ir");
        let result: ExtractIrResult = SwordPure
            .handle(&Request::extract_ir(&src, &out))
            .decode("p", "extract-ir")
            .unwrap();
        match &result {
            ExtractIrResult::Multi { modules } => {
                assert_eq!(modules.len(), 2);
                assert_eq!(modules[0].status, "skipped");
                assert_eq!(modules[1].status, "ok");
            }
            other => panic!("expected multi-module result, got {:?}", other),
        }
        assert_eq!(result.into_output("p").unwrap().ir_path, out.join("web.ir.json"));
    }

    #[test]
    fn test_sword_extract_without_confs_fails() {
        let dir = TempDir::new().unwrap();
        let resp = SwordPure.handle(&Request::extract_ir(dir.path(), &dir.path().join("ir")));
        assert!(resp.into_result("format.sword-pure").is_err());
    }

    #[test]
    fn test_ir_json_emit() {
        let dir = TempDir::new().unwrap();
        let ir = dir.path().join("kjv.ir.json");
        fs::write(&ir, r#"{"id":"KJV","documents":[]}"#).unwrap();

        let out = dir.path().join("out");
        let emitted: EmitOutput = IrJson
            .handle(&Request::emit_native(&ir, &out))
            .decode("format.ir-json", "emit-native")
            .unwrap();
        assert_eq!(emitted.output_path, out.join("kjv.json"));
        assert!(emitted.loss_class.is_lossless());
        let written: serde_json::Value =
            serde_json::from_slice(&fs::read(&emitted.output_path).unwrap()).unwrap();
        assert_eq!(written["id"], "KJV");
    }

    #[test]
    fn test_ir_json_rejects_non_object() {
        let dir = TempDir::new().unwrap();
        let ir = dir.path().join("bad.ir.json");
        fs::write(&ir, "[1,2]").unwrap();
        let resp = IrJson.handle(&Request::emit_native(&ir, dir.path()));
        assert!(resp.into_result("format.ir-json").is_err());
    }
}
