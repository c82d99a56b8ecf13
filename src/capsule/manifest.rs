// src/capsule/manifest.rs

//! `manifest.json` schema
//!
//! The manifest is optional: plenty of capsules in the wild ship without
//! one, and readers must treat that as a normal state. Fields written by the
//! conversion pipeline are all optional so an untouched capsule round-trips
//! without gaining keys. Keys this crate does not know about are preserved.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Member name of the manifest inside a capsule
pub const MANIFEST_NAME: &str = "manifest.json";

/// Current manifest schema version written by this crate
pub const MANIFEST_VERSION: &str = "1.0";

/// Capsule manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub module_type: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub language: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rights: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_format: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_at: String,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    // Written by IR generation and conversion
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub has_ir: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ir_generated: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ir_loss_class: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_loss: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emission_loss: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converted_from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_date: Option<String>,

    /// Unknown keys, kept so rewrites never drop data
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Manifest {
    /// Minimal manifest for a capsule that had none
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            title: title.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
            ..Default::default()
        }
    }

    /// Parse manifest bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|_| Error::ManifestError("manifest is not valid JSON".to_string()))?;
        if !value.is_object() {
            return Err(Error::ManifestError("manifest is not a JSON object".to_string()));
        }
        serde_json::from_value(value)
            .map_err(|_| Error::ManifestError("manifest fields have unexpected types".to_string()))
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// True if the module type names a Bible text
    pub fn is_bible(&self) -> bool {
        let kind = self.module_type.to_ascii_lowercase();
        kind == "bible" || kind == "biblical texts"
    }
}
