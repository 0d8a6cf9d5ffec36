use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::Value;

use crate::error::LoaderError;

/// One module as delivered in the bundle: base64-encoded UTF-8 source plus
/// the original file path, retained verbatim so tracebacks name it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModuleSpec {
    pub name: String,
    pub path: String,
    pub source: String,
}

impl ModuleSpec {
    /// Decodes `source` as base64 UTF-8 text.
    pub fn decode_source(&self) -> Result<String, LoaderError> {
        let bytes = STANDARD
            .decode(&self.source)
            .map_err(|source| LoaderError::DecodeSource {
                module: self.name.clone(),
                source,
            })?;
        String::from_utf8(bytes).map_err(|source| LoaderError::InvalidUtf8 {
            module: self.name.clone(),
            source,
        })
    }
}

/// A package node in the bundle's package tree: zero or more top-level
/// (non-package) modules plus zero or more nested packages.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PackageSpec {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
    #[serde(default)]
    pub packages: Vec<PackageSpec>,
}

/// The full program bundle delivered once at start-up on `program_fd`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Bundle {
    pub program: ModuleSpec,
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
    #[serde(default)]
    pub packages: Vec<PackageSpec>,
    pub pipe_in: i32,
    pub pipe_out: i32,
    pub status_in: i32,
    #[serde(default, rename = "KVPairs")]
    pub kv_pairs: HashMap<String, Value>,
    #[serde(default)]
    pub debug_port: Option<u16>,
    #[serde(default)]
    pub break_on_start: Option<bool>,
}

impl Bundle {
    pub fn from_json(bytes: &[u8]) -> Result<Self, LoaderError> {
        serde_json::from_slice(bytes).map_err(LoaderError::ParseBundle)
    }
}

/// The canonical name the entry module is re-registered under once loaded.
pub const MAIN_MODULE_NAME: &str = "__main__";

/// Name rhai's resolver synthesizes source under for a package that has no
/// explicit `__init__` module of its own.
pub const INIT_MODULE_BASENAME: &str = "__init__";
