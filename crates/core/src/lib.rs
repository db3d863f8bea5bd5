//! Mache core — schema-driven projection of structured data sources into a
//! navigable, writable directory hierarchy.
//!
//! Relational tables of JSON records and parsed source trees are projected
//! through a declarative topology into one graph of nodes. Readers see a
//! filesystem; writers edit file contents and the write-back pipeline
//! splices the edits back into the originating records or source files.
//! The network-filesystem transport, mounting, and authentication live
//! outside this crate and program against [`facade::GraphReader`].

pub mod ast;
pub mod cache;
pub mod error;
pub mod facade;
pub mod ingest;
pub mod node;
pub mod refs;
pub mod schema;
pub mod store;
pub mod tablescan;
pub mod template;
pub mod vfs;
pub mod writeback;

pub use error::{Error, Result};
pub use facade::{GraphReader, HotSwap};
pub use ingest::{IngestStats, SourceIngestor};
pub use node::{ContentRef, Node, NodeContent, NodeMode, SourceOrigin};
pub use refs::{QueryOutput, RefIndex};
pub use schema::{CompiledSchema, Topology};
pub use store::GraphStore;
pub use tablescan::TableProjection;
pub use template::{MiniTemplate, TemplateEngine};
pub use vfs::{DiagnosticStore, ProjectionView};
pub use writeback::{WriteOutcome, WritePipeline};
