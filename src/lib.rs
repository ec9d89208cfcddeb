//! Rastreo - call-tree tracing through code instrumentation
//!
//! Three cooperating engines:
//!
//! - [`transform`] rewrites compiled units ([`unit`]) so every eligible member
//!   reports its entry, normal exit and escaping failure to the recorder,
//!   falling back to the untouched unit whenever anything goes wrong.
//! - [`recorder`] reconstructs per-thread call trees concurrently and hands
//!   each finished trace to an [`artifacts::ArtifactSink`].
//! - [`diagram`] and [`export`] turn a trace into a PlantUML sequence diagram
//!   and a JSON record; [`flush`] writes traces still open at shutdown.

pub mod artifact_queue;
pub mod artifacts;
pub mod call_id;
pub mod cli;
pub mod clock;
pub mod config;
pub mod diagram;
pub mod event;
pub mod export;
pub mod filter;
pub mod flush;
pub mod recorder;
pub mod source_mirror;
pub mod trace_id;
pub mod trace_tree;
pub mod transform;
pub mod unit;
