//! Structural validation of process configs.
//!
//! Checks ids and addresses after trimming, enforces per-scope uniqueness,
//! and runs address validation for every input and output against the
//! configured disk filesystems. The accepted (normalised) forms overwrite
//! the working config.

use crate::address::{self, AddressError};
use crate::ffmpeg::Engine;
use crate::fs::Filesystem;
use crate::process::ProcessConfig;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Error type for config validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("at least one input must be defined for the process '{0}'")]
    NoInput(String),

    #[error("at least one output must be defined for the process '{0}'")]
    NoOutput(String),

    #[error("empty input IDs are not allowed (process '{0}')")]
    EmptyInputId(String),

    #[error("empty output IDs are not allowed (process '{0}')")]
    EmptyOutputId(String),

    #[error("the input ID '{id}' is already in use for the process '{process}'")]
    DuplicateInputId { id: String, process: String },

    #[error("the output ID '{id}' is already in use for the process '{process}'")]
    DuplicateOutputId { id: String, process: String },

    #[error("the address for input '#{process}:{input}' must not be empty")]
    EmptyInputAddress { process: String, input: String },

    #[error("the address for output '#{process}:{output}' must not be empty")]
    EmptyOutputAddress { process: String, output: String },

    #[error("the address for input '#{process}:{input}' ({address}) is invalid: {source}")]
    InvalidInputAddress {
        process: String,
        input: String,
        address: String,
        #[source]
        source: AddressError,
    },

    #[error("the address for output '#{process}:{output}' is invalid: {source}")]
    InvalidOutputAddress {
        process: String,
        output: String,
        #[source]
        source: AddressError,
    },
}

/// Base directory a disk filesystem exposes, `/` when it reports none.
fn basedir(fs: &Arc<dyn Filesystem>) -> String {
    fs.metadata("base").unwrap_or_else(|| "/".to_string())
}

/// Validate a working config in place.
///
/// Returns whether any output writes files below a disk base directory.
pub(crate) fn validate_config(
    config: &mut ProcessConfig,
    engine: &dyn Engine,
    diskfs: &[Arc<dyn Filesystem>],
) -> Result<bool, ValidationError> {
    if config.input.is_empty() {
        return Err(ValidationError::NoInput(config.id.clone()));
    }

    let mut ids = HashSet::new();

    for input in config.input.iter_mut() {
        input.id = input.id.trim().to_string();

        if input.id.is_empty() {
            return Err(ValidationError::EmptyInputId(config.id.clone()));
        }

        if !ids.insert(input.id.clone()) {
            return Err(ValidationError::DuplicateInputId {
                id: input.id.clone(),
                process: config.id.clone(),
            });
        }

        input.address = input.address.trim().to_string();

        if input.address.is_empty() {
            return Err(ValidationError::EmptyInputAddress {
                process: config.id.clone(),
                input: input.id.clone(),
            });
        }

        input.address = address::validate_input_address(engine, &input.address).map_err(
            |source| ValidationError::InvalidInputAddress {
                process: config.id.clone(),
                input: input.id.clone(),
                address: input.address.clone(),
                source,
            },
        )?;
    }

    if config.output.is_empty() {
        return Err(ValidationError::NoOutput(config.id.clone()));
    }

    let mut ids = HashSet::new();
    let mut has_files = false;

    for output in config.output.iter_mut() {
        output.id = output.id.trim().to_string();

        if output.id.is_empty() {
            return Err(ValidationError::EmptyOutputId(config.id.clone()));
        }

        if !ids.insert(output.id.clone()) {
            return Err(ValidationError::DuplicateOutputId {
                id: output.id.clone(),
                process: config.id.clone(),
            });
        }

        output.address = output.address.trim().to_string();

        if output.address.is_empty() {
            return Err(ValidationError::EmptyOutputAddress {
                process: config.id.clone(),
                output: output.id.clone(),
            });
        }

        // The address is accepted if at least one disk filesystem accepts
        // it; the accepted form overwrites the original. Without any disk
        // filesystem, the whole root is the base directory.
        if diskfs.is_empty() {
            let (validated, is_file) =
                address::validate_output_address(engine, &output.address, "/").map_err(
                    |source| ValidationError::InvalidOutputAddress {
                        process: config.id.clone(),
                        output: output.id.clone(),
                        source,
                    },
                )?;

            output.address = validated;
            if is_file {
                has_files = true;
            }

            continue;
        }

        let mut accepted = None;
        let mut last_error = None;

        for fs in diskfs {
            match address::validate_output_address(engine, &output.address, &basedir(fs)) {
                Ok((validated, is_file)) => {
                    accepted = Some((validated, is_file));
                }
                Err(source) => last_error = Some(source),
            }
        }

        match accepted {
            Some((validated, is_file)) => {
                output.address = validated;
                if is_file {
                    has_files = true;
                }
            }
            None => {
                return Err(ValidationError::InvalidOutputAddress {
                    process: config.id.clone(),
                    output: output.id.clone(),
                    source: last_error.unwrap_or(AddressError::NotAllowed),
                });
            }
        }
    }

    Ok(has_files)
}
