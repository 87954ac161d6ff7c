//! Lineage graph entities.
//!
//! - [`Dataset`] - a table, view or file, keyed by `urn:dataset:...`
//! - [`Process`] - a job that produces datasets, keyed by `urn:process:...`
//! - [`LineageEdge`] - source dataset → process → target dataset, with a validity window
//! - [`ColumnLineage`] - column mapping attached to one edge
//! - [`AuditLogEntry`] - append-only record of every mutation

pub mod urn;

pub use urn::{dataset_urn, process_urn, DatasetUrn, UrnError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Relationship type used when a process does not specify one.
pub const DEFAULT_RELATIONSHIP_TYPE: &str = "transformation";

// =============================================================================
// Entities
// =============================================================================

/// A dataset node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub urn: String,
    pub name: String,
    pub dataset_type: String,
    pub catalog: Option<String>,
    pub schema_name: Option<String>,
    /// Opaque storage location details.
    pub storage_descriptor: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dataset {
    /// Metadata-only dataset derived from its URN.
    pub fn minimal(urn: &str, now: DateTime<Utc>) -> Self {
        let parsed = DatasetUrn::parse_lenient(urn);
        let mut parts = parsed.qualified_name.rsplit('.');
        let name = parts.next().unwrap_or(&parsed.qualified_name).to_string();
        let schema_name = parts.next().map(str::to_string);
        let catalog = parts.next().map(str::to_string);

        Self {
            urn: urn.to_string(),
            name,
            dataset_type: parsed.source_type.unwrap_or_else(|| "unknown".to_string()),
            catalog,
            schema_name,
            storage_descriptor: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A process node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub urn: String,
    pub name: String,
    pub process_type: String,
    pub source_system: Option<String>,
    pub job_id: Option<String>,
    pub job_name: Option<String>,
    /// Free-form definition (SQL text, DAG spec, ...).
    pub definition: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted lineage edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageEdge {
    /// Store-assigned identity.
    pub id: i64,
    pub source_urn: String,
    pub process_urn: String,
    pub target_urn: String,
    pub relationship_type: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub ingestion_id: String,
    pub metadata: Option<Value>,
}

impl LineageEdge {
    /// Composite key used as the audit entity URN.
    pub fn audit_key(&self) -> String {
        edge_audit_key(
            &self.source_urn,
            &self.process_urn,
            &self.target_urn,
            &self.ingestion_id,
        )
    }

    /// The node this edge leads to when walking in `direction`.
    pub fn next_node(&self, direction: Direction) -> &str {
        match direction {
            Direction::Upstream => &self.source_urn,
            Direction::Downstream => &self.target_urn,
        }
    }
}

/// `source|process|target|ingestion_id`.
pub fn edge_audit_key(source: &str, process: &str, target: &str, ingestion_id: &str) -> String {
    format!("{}|{}|{}|{}", source, process, target, ingestion_id)
}

/// An edge to be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEdge {
    pub source_urn: String,
    pub process_urn: String,
    pub target_urn: String,
    pub relationship_type: String,
    pub valid_from: DateTime<Utc>,
    pub ingestion_id: String,
    pub metadata: Option<Value>,
}

impl NewEdge {
    pub fn audit_key(&self) -> String {
        edge_audit_key(
            &self.source_urn,
            &self.process_urn,
            &self.target_urn,
            &self.ingestion_id,
        )
    }

    /// The persisted edge with its assigned identity.
    pub fn with_id(self, id: i64) -> LineageEdge {
        LineageEdge {
            id,
            source_urn: self.source_urn,
            process_urn: self.process_urn,
            target_urn: self.target_urn,
            relationship_type: self.relationship_type,
            valid_from: self.valid_from,
            valid_to: None,
            ingestion_id: self.ingestion_id,
            metadata: self.metadata,
        }
    }
}

/// A column mapping attached to an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnLineage {
    pub id: i64,
    pub edge_id: i64,
    pub source_column: String,
    pub target_column: String,
    pub transformation_type: String,
    pub transformation_expression: Option<String>,
}

/// A column mapping to be attached to edge `edge_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewColumnLineage {
    pub edge_id: i64,
    pub source_column: String,
    pub target_column: String,
    pub transformation_type: String,
    pub transformation_expression: Option<String>,
}

impl NewColumnLineage {
    pub fn with_id(self, id: i64) -> ColumnLineage {
        ColumnLineage {
            id,
            edge_id: self.edge_id,
            source_column: self.source_column,
            target_column: self.target_column,
            transformation_type: self.transformation_type,
            transformation_expression: self.transformation_expression,
        }
    }
}

// =============================================================================
// Audit
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
        }
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            other => Err(format!("unknown audit action: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Dataset,
    Process,
    LineageEdge,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Dataset => "dataset",
            EntityType::Process => "process",
            EntityType::LineageEdge => "lineage_edge",
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dataset" => Ok(EntityType::Dataset),
            "process" => Ok(EntityType::Process),
            "lineage_edge" => Ok(EntityType::LineageEdge),
            other => Err(format!("unknown entity type: {}", other)),
        }
    }
}

/// Immutable record of one mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_urn: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub actor: String,
    pub ingestion_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    /// New entry with a fresh v4 id.
    pub fn new(
        action: AuditAction,
        entity_type: EntityType,
        entity_urn: impl Into<String>,
        actor: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            entity_type,
            entity_urn: entity_urn.into(),
            before: None,
            after: None,
            actor: actor.into(),
            ingestion_id: None,
            timestamp,
        }
    }

    pub fn with_before(mut self, before: Option<Value>) -> Self {
        self.before = before;
        self
    }

    pub fn with_after(mut self, after: Option<Value>) -> Self {
        self.after = after;
        self
    }

    pub fn with_ingestion(mut self, ingestion_id: impl Into<String>) -> Self {
        self.ingestion_id = Some(ingestion_id.into());
        self
    }
}

// =============================================================================
// Queries
// =============================================================================

/// Traversal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Follow edges whose target is the current node back to their source.
    Upstream,
    /// Follow edges whose source is the current node forward to their target.
    Downstream,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upstream => write!(f, "upstream"),
            Direction::Downstream => write!(f, "downstream"),
        }
    }
}

/// Which edges are traversable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalFilter {
    /// Edges whose validity window contains the instant
    /// (`valid_from <= t` and `valid_to` unset or `>= t`).
    AsOf(DateTime<Utc>),
    /// Edges still active at the instant (`valid_to` unset or `> now`).
    Current(DateTime<Utc>),
}

impl TemporalFilter {
    pub fn admits(&self, edge: &LineageEdge) -> bool {
        match *self {
            TemporalFilter::AsOf(t) => {
                edge.valid_from <= t && edge.valid_to.map_or(true, |to| to >= t)
            }
            TemporalFilter::Current(now) => edge.valid_to.map_or(true, |to| to > now),
        }
    }
}
