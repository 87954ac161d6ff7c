//! Ingestion request and outcome types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::dataset_urn;
use crate::procedure::ProcedureLineageFact;
use crate::sql::lineage::{ColumnMapping, LineageFact};

/// The process an ingestion is attributed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    pub urn: String,
    /// Display name; derived from the URN when empty.
    #[serde(default)]
    pub name: String,
    /// Unset keeps the stored type on re-ingestion; new processes get `job`.
    #[serde(default)]
    pub process_type: Option<String>,
    #[serde(default)]
    pub source_system: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub definition: Option<Value>,
    /// Overrides the relationship type of created edges.
    #[serde(default)]
    pub relationship_type: Option<String>,
}

pub const DEFAULT_PROCESS_TYPE: &str = "job";

impl ProcessDescriptor {
    pub fn new(urn: impl Into<String>) -> Self {
        Self {
            urn: urn.into(),
            name: String::new(),
            process_type: None,
            source_system: None,
            job_id: None,
            job_name: None,
            definition: None,
            relationship_type: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_process_type(mut self, process_type: impl Into<String>) -> Self {
        self.process_type = Some(process_type.into());
        self
    }

    pub fn with_source_system(mut self, source_system: impl Into<String>) -> Self {
        self.source_system = Some(source_system.into());
        self
    }

    pub fn with_job(mut self, job_id: impl Into<String>, job_name: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self.job_name = Some(job_name.into());
        self
    }

    pub fn with_definition(mut self, definition: Value) -> Self {
        self.definition = Some(definition);
        self
    }

    pub fn with_relationship_type(mut self, relationship_type: impl Into<String>) -> Self {
        self.relationship_type = Some(relationship_type.into());
        self
    }

    /// The configured name, or the last `:` segment of the URN.
    pub fn display_name(&self) -> String {
        if !self.name.trim().is_empty() {
            return self.name.clone();
        }
        self.urn.rsplit(':').next().unwrap_or(&self.urn).to_string()
    }
}

/// One lineage ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub process: ProcessDescriptor,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Attached to every edge the ingestion creates.
    #[serde(default)]
    pub column_mappings: Vec<ColumnMapping>,
    /// Idempotency key; derived from the process and datasets when absent.
    #[serde(default)]
    pub ingestion_id: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

impl IngestRequest {
    pub fn new(process: ProcessDescriptor, inputs: Vec<String>, outputs: Vec<String>) -> Self {
        Self {
            process,
            inputs,
            outputs,
            column_mappings: Vec::new(),
            ingestion_id: None,
            actor: None,
        }
    }

    pub fn with_column_mappings(mut self, mappings: Vec<ColumnMapping>) -> Self {
        self.column_mappings = mappings;
        self
    }

    pub fn with_ingestion_id(mut self, ingestion_id: impl Into<String>) -> Self {
        self.ingestion_id = Some(ingestion_id.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Build a request from a parsed SQL statement.
    ///
    /// Table names become `urn:dataset:<source_type>:<table>`.
    pub fn from_lineage_fact(
        process: ProcessDescriptor,
        fact: &LineageFact,
        source_type: &str,
    ) -> Self {
        Self::new(
            process,
            urns(fact.source_tables.iter(), source_type),
            urns(fact.target_table.iter(), source_type),
        )
        .with_column_mappings(fact.column_lineage.clone())
    }

    /// Build a request from a parsed stored procedure.
    pub fn from_procedure_fact(
        process: ProcessDescriptor,
        fact: &ProcedureLineageFact,
        source_type: &str,
    ) -> Self {
        Self::new(
            process,
            urns(fact.all_source_tables.iter(), source_type),
            urns(fact.all_target_tables.iter(), source_type),
        )
        .with_column_mappings(fact.column_lineage.clone())
    }
}

fn urns<'a>(tables: impl Iterator<Item = &'a String>, source_type: &str) -> Vec<String> {
    tables.map(|t| dataset_urn(source_type, t)).collect()
}

/// Whether an ingestion changed the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Success,
    /// The ingestion id was already present; nothing was written.
    Skipped,
}

/// Result of [`super::IngestionEngine::ingest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub status: IngestStatus,
    pub ingestion_id: String,
    /// Edges created, or for a skipped ingestion the edges already present.
    pub edges_created: usize,
    pub columns_ingested: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl IngestOutcome {
    pub(super) fn skipped(ingestion_id: String, existing: usize) -> Self {
        Self {
            status: IngestStatus::Skipped,
            ingestion_id,
            edges_created: existing,
            columns_ingested: 0,
            warnings: Vec::new(),
        }
    }
}
