//! Source mirroring for trace artifacts
//!
//! Copies the source file of every type a trace touched into the trace's
//! `sources/` directory, so a diagram can be read next to the code it shows.
//! Types map to paths by their namespace: `shop.order.Cart` becomes
//! `shop/order/Cart.<ext>`. Missing sources get a short placeholder note.

use crate::config::TracerConfig;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming an extra source root, probed first
pub const SOURCE_ROOT_ENV: &str = "RASTREO_SOURCE_ROOT";

pub trait SourceLocator: Send + Sync + fmt::Debug {
    /// Source text for a qualified type name, if it can be found
    fn locate(&self, type_name: &str) -> Option<String>;
}

const UNNAMED: &str = "_unnamed";

/// Relative path of a type's source file
///
/// Nested type suffixes (`Outer$Inner`) resolve to the outer type's file.
/// Path separators count as namespace separators, so the result is always a
/// plain relative path that stays under whatever directory it is joined to.
pub fn relative_source_path(type_name: &str, extension: &str) -> PathBuf {
    let outer = type_name.split('$').next().unwrap_or(type_name);
    let mut path: PathBuf = outer
        .split(['.', '/', '\\'])
        .filter(|s| !s.is_empty())
        .map(|s| s.replace(':', "_"))
        .collect();
    if path.as_os_str().is_empty() {
        path.push(UNNAMED);
    }
    let extension: String = extension
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '.' | ':'))
        .collect();
    path.set_extension(extension);
    path
}

pub fn placeholder(type_name: &str) -> String {
    format!("// Source not found for {type_name}\n")
}

/// Probes a list of directories on the local filesystem
#[derive(Debug, Clone)]
pub struct FsSourceLocator {
    roots: Vec<PathBuf>,
    extension: String,
}

impl FsSourceLocator {
    pub fn new(roots: Vec<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            roots,
            extension: extension.into(),
        }
    }

    /// Configured roots, preceded by `RASTREO_SOURCE_ROOT` when set
    pub fn from_config(config: &TracerConfig) -> Self {
        let mut roots = Vec::with_capacity(config.source_roots.len() + 1);
        if let Some(root) = std::env::var_os(SOURCE_ROOT_ENV) {
            roots.push(PathBuf::from(root));
        }
        roots.extend(config.source_roots.iter().cloned());
        Self::new(roots, config.source_extension.clone())
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }
}

impl SourceLocator for FsSourceLocator {
    fn locate(&self, type_name: &str) -> Option<String> {
        let relative = relative_source_path(type_name, &self.extension);
        self.roots.iter().find_map(|root| {
            let candidate = root.join(&relative);
            match std::fs::read_to_string(&candidate) {
                Ok(text) => Some(text),
                Err(e) => {
                    debug!(path = %candidate.display(), error = %e, "source probe missed");
                    None
                }
            }
        })
    }
}

/// Outcome of mirroring one trace's sources
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorSummary {
    pub found: usize,
    pub missing: usize,
}

/// Write one file per type under `dir`; returns how many were found
pub fn mirror_sources(
    dir: &Path,
    types: &[String],
    locator: &dyn SourceLocator,
    extension: &str,
) -> std::io::Result<MirrorSummary> {
    let mut summary = MirrorSummary::default();
    for type_name in types {
        let target = dir.join(relative_source_path(type_name, extension));
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = match locator.locate(type_name) {
            Some(text) => {
                summary.found += 1;
                text
            }
            None => {
                summary.missing += 1;
                placeholder(type_name)
            }
        };
        std::fs::write(&target, text)?;
    }
    Ok(summary)
}
