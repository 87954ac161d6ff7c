//! Idempotency keys for ingestions.

use sha2::{Digest, Sha256};

/// Derive an ingestion id from a process and its inputs and outputs.
///
/// Inputs and outputs are sorted and de-duplicated first, so listing order
/// does not change the id. The id is the lowercase hex SHA-256 of the JSON
/// tuple `[process_urn, inputs, outputs]`.
pub fn ingestion_key(
    process_urn: &str,
    inputs: &[String],
    outputs: &[String],
) -> Result<String, serde_json::Error> {
    fn canonical(urns: &[String]) -> Vec<&str> {
        let mut urns: Vec<&str> = urns.iter().map(String::as_str).collect();
        urns.sort_unstable();
        urns.dedup();
        urns
    }
    let encoded = serde_json::to_vec(&(process_urn, canonical(inputs), canonical(outputs)))?;
    Ok(format!("{:x}", Sha256::digest(&encoded)))
}
