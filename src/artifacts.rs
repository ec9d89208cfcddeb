//! Per-trace artifact output
//!
//! A completed (or drained) trace is handed to an [`ArtifactSink`]. The
//! filesystem sink lays each trace out as:
//!
//! ```text
//! <output_dir>/<trace id>/
//! ├── trace.json        structured record
//! ├── sequence.puml     sequence diagram (optional)
//! └── sources/          mirrored sources (optional)
//! ```

use crate::config::TracerConfig;
use crate::diagram::DiagramRenderer;
use crate::export::TraceRecord;
use crate::source_mirror::{mirror_sources, FsSourceLocator, SourceLocator};
use crate::trace_id::TraceId;
use crate::trace_tree::TraceTree;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub const RECORD_FILE: &str = "trace.json";
pub const DIAGRAM_FILE: &str = "sequence.puml";
pub const SOURCES_DIR: &str = "sources";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize trace record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("artifact queue full, trace {0} dropped")]
    QueueFull(TraceId),

    #[error("artifact queue is shut down")]
    QueueClosed,
}

/// Receives finished trace trees
pub trait ArtifactSink: Send + Sync {
    fn submit(&self, tree: TraceTree) -> Result<(), ArtifactError>;
}

impl<S: ArtifactSink + ?Sized> ArtifactSink for Arc<S> {
    fn submit(&self, tree: TraceTree) -> Result<(), ArtifactError> {
        (**self).submit(tree)
    }
}

/// Paths produced for one trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenArtifacts {
    pub dir: PathBuf,
    pub record: PathBuf,
    pub diagram: Option<PathBuf>,
    pub sources_found: usize,
    pub sources_missing: usize,
}

/// Writes artifacts synchronously on the submitting thread
#[derive(Debug)]
pub struct ArtifactWriter {
    output_dir: PathBuf,
    generate_diagram: bool,
    save_sources: bool,
    source_extension: String,
    renderer: DiagramRenderer,
    locator: Box<dyn SourceLocator>,
}

impl ArtifactWriter {
    /// Record and diagram only; no source mirroring
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            generate_diagram: true,
            save_sources: false,
            source_extension: "rs".to_string(),
            renderer: DiagramRenderer::new(),
            locator: Box::new(FsSourceLocator::new(Vec::new(), "rs")),
        }
    }

    pub fn from_config(config: &TracerConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            generate_diagram: config.generate_diagram,
            save_sources: config.save_sources,
            source_extension: config.source_extension.clone(),
            renderer: DiagramRenderer::new(),
            locator: Box::new(FsSourceLocator::from_config(config)),
        }
    }

    pub fn with_diagram(mut self, enabled: bool) -> Self {
        self.generate_diagram = enabled;
        self
    }

    pub fn with_sources(mut self, locator: impl SourceLocator + 'static) -> Self {
        self.save_sources = true;
        self.locator = Box::new(locator);
        self
    }

    pub fn with_source_extension(mut self, extension: impl Into<String>) -> Self {
        self.source_extension = extension.into();
        self
    }

    pub fn with_renderer(mut self, renderer: DiagramRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn trace_dir(&self, trace_id: TraceId) -> PathBuf {
        self.output_dir.join(trace_id.to_string())
    }

    pub fn write(&self, tree: &TraceTree) -> Result<WrittenArtifacts, ArtifactError> {
        let dir = self.trace_dir(tree.trace_id);
        std::fs::create_dir_all(&dir).map_err(|source| ArtifactError::Io {
            path: dir.clone(),
            source,
        })?;

        let record = dir.join(RECORD_FILE);
        let json = TraceRecord::from_tree(tree).to_json_pretty()?;
        write_file(&record, json)?;

        let diagram = if self.generate_diagram {
            let path = dir.join(DIAGRAM_FILE);
            write_file(&path, self.renderer.render(tree))?;
            Some(path)
        } else {
            None
        };

        let mut written = WrittenArtifacts {
            dir,
            record,
            diagram,
            sources_found: 0,
            sources_missing: 0,
        };
        if self.save_sources {
            let sources = written.dir.join(SOURCES_DIR);
            let summary = mirror_sources(
                &sources,
                tree.involved_types(),
                self.locator.as_ref(),
                &self.source_extension,
            )
            .map_err(|source| ArtifactError::Io {
                path: sources.clone(),
                source,
            })?;
            written.sources_found = summary.found;
            written.sources_missing = summary.missing;
        }
        Ok(written)
    }
}

impl ArtifactSink for ArtifactWriter {
    fn submit(&self, tree: TraceTree) -> Result<(), ArtifactError> {
        let written = self.write(&tree)?;
        info!(
            trace_id = %tree.trace_id,
            calls = tree.call_count(),
            partial = tree.partial,
            dir = %written.dir.display(),
            "trace artifacts written"
        );
        Ok(())
    }
}

fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> Result<(), ArtifactError> {
    std::fs::write(path, contents).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })
}
