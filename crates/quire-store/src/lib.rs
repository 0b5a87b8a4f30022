//! # quire-store
//!
//! Document containers with a prepared query cache.
//!
//! Named operations are registered once in a [`QueryRegistry`]. The first
//! time an operation runs on a [`Container`] it is compiled and the
//! handle is cached; later runs only rebind variables. Documents are JSON
//! values kept in SQLite files, one file per container, attached under
//! the container alias.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  QueryRegistry (dashmap, process-wide)       │
//! ├──────────────────────────────────────────────┤
//! │  Manager  (home dir, defaults, open set)     │
//! │   └─ Container (alias, connection, sync)     │
//! │       └─ PreparedCache (moka, per container) │
//! │           └─ PreparedHandle (context, stats) │
//! ├──────────────────────────────────────────────┤
//! │  timing: OperationTimer + error chain logs   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use quire_store::{Bindings, Document, Manager, QueryOperation, ValueType};
//!
//! let manager = Manager::new("data");
//! manager.registry().register(
//!     QueryOperation::builder(
//!         "GetNote",
//!         "SELECT name, content FROM notes.documents WHERE name = $name",
//!     )
//!     .variable("name", ValueType::String)
//!     .build(),
//! )?;
//!
//! let notes = manager.open_container("notes.db", "notes")?;
//! notes.with_sync(|c| c.put_document(&Document::new("n1", serde_json::json!({"t": 1}))))?;
//! let found = notes.execute("GetNote", &Bindings::new().bind("name", "n1"))?;
//! ```

pub mod config;
pub mod container;
pub mod context;
pub mod document;
pub mod error;
pub mod manager;
pub mod paging;
pub mod prepared;
pub mod registry;
pub mod results;
pub mod timing;
pub mod value;
mod unit;

// ── re-exports ───────────────────────────────────────────────────────

pub use config::{ContainerConfig, ContainerOptions, ContainerSettings, ManagerSettings, StoreSettings};
pub use container::Container;
pub use context::QueryContext;
pub use document::Document;
pub use error::{StoreError, StoreResult};
pub use manager::Manager;
pub use paging::PageWindow;
pub use prepared::{CacheStats, PreparedHandle, PreparedQuery, validate_bindings};
pub use registry::{QueryOperation, QueryOperationBuilder, QueryRegistry};
pub use results::{Item, ResultSequence, Row};
pub use timing::{OperationTimer, timed};
pub use value::{Bindings, Value, ValueType, format_timestamp};
