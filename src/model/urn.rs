//! URN construction and parsing.
//!
//! Datasets are `urn:dataset:<source-type>:<qualified-name>` and processes
//! are `urn:process:<system>:<job-id>`. Short forms such as `urn:dataset:x`
//! are accepted everywhere; only [`DatasetUrn::parse`] insists on the prefix.

use thiserror::Error;

pub const DATASET_PREFIX: &str = "urn:dataset:";
pub const PROCESS_PREFIX: &str = "urn:process:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrnError {
    #[error("not a dataset URN: {0}")]
    NotADataset(String),

    #[error("empty URN component in {0}")]
    EmptyComponent(String),
}

/// Build a dataset URN.
pub fn dataset_urn(source_type: &str, qualified_name: &str) -> String {
    format!("{}{}:{}", DATASET_PREFIX, source_type, qualified_name)
}

/// Build a process URN.
pub fn process_urn(system: &str, job_id: &str) -> String {
    format!("{}{}:{}", PROCESS_PREFIX, system, job_id)
}

/// Components of a dataset URN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetUrn {
    pub source_type: Option<String>,
    pub qualified_name: String,
}

impl DatasetUrn {
    /// Parse a `urn:dataset:` URN.
    pub fn parse(urn: &str) -> Result<Self, UrnError> {
        let rest = urn
            .strip_prefix(DATASET_PREFIX)
            .ok_or_else(|| UrnError::NotADataset(urn.to_string()))?;
        if rest.is_empty() || rest.split(':').any(str::is_empty) {
            return Err(UrnError::EmptyComponent(urn.to_string()));
        }
        Ok(Self::split(rest))
    }

    /// Parse any string; text without the dataset prefix is split on its
    /// last `:` only.
    pub fn parse_lenient(urn: &str) -> Self {
        match urn.strip_prefix(DATASET_PREFIX) {
            Some(rest) => Self::split(rest),
            None => Self {
                source_type: None,
                qualified_name: urn.rsplit(':').next().unwrap_or(urn).to_string(),
            },
        }
    }

    fn split(rest: &str) -> Self {
        match rest.split_once(':') {
            Some((source_type, name)) => Self {
                source_type: Some(source_type.to_string()),
                qualified_name: name.to_string(),
            },
            None => Self {
                source_type: None,
                qualified_name: rest.to_string(),
            },
        }
    }
}
