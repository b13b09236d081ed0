//! Ingestion core for hookscope.
//!
//! Producers append newline-delimited JSON events to per-period log
//! files without coordinating with each other. This crate turns those
//! files into an ordered stream of annotated events:
//!
//! ```text
//! LogTailer --> Validator --> HierarchyResolver --> EventStore
//! ```
//!
//! - [`tailer`] -- offset-tracking reader over the active log file
//! - [`validator`] -- schema gate for raw records
//! - [`hierarchy`] -- per-session parent resolution
//! - [`session_store`] -- persisted session state shared across processes
//! - [`event_store`] -- bounded window with derived `children`/`depth`
//! - [`stats`] -- ingestion counters for health reporting
//! - [`config`] -- YAML configuration

pub mod config;
pub mod event_store;
pub mod hierarchy;
pub mod session_store;
pub mod stats;
pub mod tailer;
pub mod validator;

pub use config::{
    ConfigError, HierarchyConfig, HookscopeConfig, LoggingConfig, ServerSettings, StoreConfig,
    TailerConfig,
};
pub use event_store::EventStore;
pub use hierarchy::HierarchyResolver;
pub use session_store::{
    FileSessionStore, MemorySessionStore, SessionState, SessionStore, SessionStoreError,
};
pub use stats::{IngestCounters, IngestStats};
pub use tailer::{LogTailer, TailBatch, TailError};
pub use validator::{ValidationError, Validator};
