//! Service layer for visitlog-store
//!
//! Services sit between the CLI and the storage modules. They own the shared
//! database handle and loaded taxonomy, and move blocking SQLite work off the
//! async runtime.
//!
//! ```text
//! CLI (main.rs)
//!     ↓
//! Service Layer (selection_service.rs)
//!     ↓
//! SelectionStore / PathReconstructor / SelectionViewBuilder
//!     ↓
//! SchemaCapability (db/schema_ops.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod selection_service;

// Re-exports
pub use selection_service::{import_taxonomy, ImportSummary, SaveOutcome, SelectionService};
