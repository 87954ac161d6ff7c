//! # Tributary
//!
//! Column-level data lineage with provenance: SQL and stored procedures are
//! parsed into lineage facts, ingested into an auditable graph with validity
//! windows, and traversed upstream or downstream at any point in time.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │   SQL text (any dialect) │   │   Stored procedure body  │
//! └──────────────────────────┘   └──────────────────────────┘
//!              │ [sql::lineage]               │ [procedure]
//!              │  structured → heuristic      │  statements, dynamic SQL, calls
//!              ▼                              ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │           LineageFact / ProcedureLineageFact             │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [ingest]
//! ┌─────────────────────────────────────────────────────────┐
//! │      LineageStore (datasets, processes, edges,           │
//! │      column lineage, audit log)                          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [traversal] (+ cache)
//! ┌─────────────────────────────────────────────────────────┐
//! │                  GraphProjection                         │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod ingest;
pub mod model;
pub mod procedure;
pub mod sql;
pub mod store;
pub mod traversal;

// Re-export the dialect module at crate level
pub use sql::dialect;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::dialect::{Dialect, SqlDialect};
    pub use crate::ingest::{
        IngestError, IngestOutcome, IngestRequest, IngestStatus, IngestionEngine,
        ProcessDescriptor,
    };
    pub use crate::model::{Dataset, Direction, LineageEdge, Process};
    pub use crate::procedure::{parse_procedure, ProcedureLineageFact, ProcedureLineageParser};
    pub use crate::sql::lineage::{LineageFact, SqlLineageParser};
    pub use crate::sql::parse_sql;
    pub use crate::store::{LineageStore, MemoryStore, SqliteStore};
    pub use crate::traversal::{GraphProjection, TraversalEngine, TraversalRequest};
}

// Also export at crate root for convenience
pub use dialect::Dialect;
pub use ingest::IngestionEngine;
pub use procedure::parse_procedure;
pub use sql::parse_sql;
pub use traversal::TraversalEngine;
