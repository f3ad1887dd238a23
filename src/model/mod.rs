//! Container I/O orchestration
//!
//! Sequences mapper calls across whole graphs: reading a container into a
//! graph, writing a graph atomically, exporting a modified graph to a new
//! container, and caching namespaces inside containers.

pub mod error;
pub mod export;
pub mod loader;
pub mod namespaces;
pub mod saver;
pub mod session;

pub use error::{SessionError, SessionResult};
pub use export::{ExportReport, GraphExporter, export_file};
pub use loader::GraphLoader;
pub use namespaces::{cache_namespaces, load_cached_namespaces, used_namespaces};
pub use saver::GraphSaver;
pub use session::{ContainerIo, SessionState};
