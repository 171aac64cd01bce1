//! Cross-process input references.
//!
//! An input address of the form `#<process-id>:output=<io-id>` names the
//! output of another process in the catalog. References are resolved over a
//! snapshot of the task map against the already-validated output addresses.
//! Only direct self-reference is rejected; chains across distinct processes
//! are allowed and resolve against the state the snapshot captured.

use crate::process::ProcessConfig;
use crate::task::Task;
use std::collections::HashMap;
use thiserror::Error;

/// Error type for reference resolution.
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("empty address")]
    EmptyAddress,

    /// Starts with `#` but is not `#<id>:output=<oid>`.
    #[error("invalid format ({0})")]
    InvalidFormat(String),

    #[error("self-reference not possible ({0})")]
    SelfReference(String),

    #[error("unknown process '{id}' ({address})")]
    UnknownProcess { id: String, address: String },

    #[error("the process '{id}' has no outputs with the ID '{output}' ({address})")]
    UnknownOutput {
        id: String,
        output: String,
        address: String,
    },

    /// A failed resolution with the owning input named.
    #[error("reference error for '#{process}:{input}': {source}")]
    Input {
        process: String,
        input: String,
        #[source]
        source: Box<ReferenceError>,
    },
}

/// Resolve one address. Non-reference addresses pass through unchanged.
fn resolve_address(
    tasks: &HashMap<String, Task>,
    id: &str,
    address: &str,
) -> Result<String, ReferenceError> {
    if address.is_empty() {
        return Err(ReferenceError::EmptyAddress);
    }

    if !address.starts_with('#') {
        return Ok(address.to_string());
    }

    let (ref_id, output_id) = address[1..]
        .split_once(":output=")
        .filter(|(id, out)| !id.is_empty() && !out.is_empty())
        .ok_or_else(|| ReferenceError::InvalidFormat(address.to_string()))?;

    if ref_id == id {
        return Err(ReferenceError::SelfReference(address.to_string()));
    }

    let task = tasks.get(ref_id).ok_or_else(|| ReferenceError::UnknownProcess {
        id: ref_id.to_string(),
        address: address.to_string(),
    })?;

    task.config
        .output
        .iter()
        .find(|output| output.id == output_id)
        .map(|output| output.address.clone())
        .ok_or_else(|| ReferenceError::UnknownOutput {
            id: ref_id.to_string(),
            output: output_id.to_string(),
            address: address.to_string(),
        })
}

/// Resolve all input references of a working config, in place.
pub(crate) fn resolve_addresses(
    tasks: &HashMap<String, Task>,
    config: &mut ProcessConfig,
) -> Result<(), ReferenceError> {
    for input in config.input.iter_mut() {
        let address = resolve_address(tasks, &config.id, &input.address).map_err(|source| {
            ReferenceError::Input {
                process: config.id.clone(),
                input: input.id.clone(),
                source: Box::new(source),
            }
        })?;

        input.address = address;
    }

    Ok(())
}
