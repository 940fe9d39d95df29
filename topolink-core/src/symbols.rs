use std::fmt::Debug;
use std::path::{Path, PathBuf};

use crate::cache::AssetKind;

/// Resolves symbol identifiers to controller URLs.
pub trait SymbolRegistry: Send + Sync + Debug {
    /// URL the icon of `symbol_id` is downloaded from.
    fn resolve_url(&self, symbol_id: &str) -> String;
}

/// Symbols served by the controller itself under `/symbols/<id>/raw`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerSymbols;

impl SymbolRegistry for ControllerSymbols {
    fn resolve_url(&self, symbol_id: &str) -> String {
        format!("/symbols/{}/raw", urlencoding::encode(symbol_id))
    }
}

/// A cached icon file ready to be loaded by the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconHandle {
    path: PathBuf,
    kind: AssetKind,
}

impl IconHandle {
    /// Handle for a cached file; the kind follows its extension.
    pub fn from_path(path: PathBuf) -> Self {
        let kind = match path.extension().and_then(|e| e.to_str()) {
            Some("svg") => AssetKind::Svg,
            _ => AssetKind::Png,
        };
        Self { path, kind }
    }

    /// Cached file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Image format.
    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    /// True for SVG icons.
    pub fn is_vector(&self) -> bool {
        self.kind == AssetKind::Svg
    }
}
