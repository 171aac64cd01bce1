//! Input and output address validation.
//!
//! Addresses are classified as URL, tee, pipe, device, or plain file and
//! normalised accordingly. File outputs must stay inside the base directory
//! of a disk filesystem; the engine's allow-list is consulted for every
//! accepted form.

use crate::ffmpeg::Engine;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Error type for address validation.
#[derive(Debug, Error)]
pub enum AddressError {
    /// The address has a URL scheme but is not syntactically valid.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The engine's allow-list rejected the address.
    #[error("address is not allowed")]
    NotAllowed,

    /// The address could not be resolved to an absolute path.
    #[error("not a valid path: {0}")]
    InvalidPath(String),

    /// A file output outside the filesystem's base directory.
    #[error("{address} is not inside of {base}")]
    OutsideBase { address: String, base: String },
}

/// Whether the address starts with a URL scheme (`rtmp:`, `udp:`, ...).
pub(crate) fn has_scheme(address: &str) -> bool {
    let Some(colon) = address.find(':') else {
        return false;
    };

    let scheme = &address[..colon];
    let mut chars = scheme.chars();

    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
}

fn validate_url(address: &str) -> Result<(), AddressError> {
    url::Url::parse(address)
        .map(|_| ())
        .map_err(|e| AddressError::InvalidUrl(e.to_string()))
}

/// Resolve a path to its lexically normalised absolute form. Relative paths
/// are anchored at the current working directory.
fn absolute(path: &str) -> Result<PathBuf, AddressError> {
    let path = Path::new(path);

    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| AddressError::InvalidPath(e.to_string()))?
            .join(path)
    };

    let mut resolved = PathBuf::new();

    for component in joined.components() {
        match component {
            Component::RootDir => resolved.push("/"),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(part) => resolved.push(part),
            Component::Prefix(_) => {}
        }
    }

    Ok(resolved)
}

/// Strip a leading bracketed tee options group, returning `(options, rest)`.
fn split_tee_options(element: &str) -> (&str, &str) {
    if !element.starts_with('[') {
        return ("", element);
    }

    match element.find(']') {
        Some(end) => (&element[..=end], &element[end + 1..]),
        None => ("", element),
    }
}

/// Validate an input address.
///
/// Addresses with a URL scheme must be syntactically valid URLs; everything
/// else is opaque. The engine allow-list decides either way.
pub(crate) fn validate_input_address(
    engine: &dyn Engine,
    address: &str,
) -> Result<String, AddressError> {
    if has_scheme(address) {
        validate_url(address)?;
    }

    if !engine.validate_input_address(address) {
        return Err(AddressError::NotAllowed);
    }

    Ok(address.to_string())
}

/// Validate an output address against a disk filesystem's base directory.
///
/// Returns the normalised address and whether it produces a file inside
/// the base directory.
pub(crate) fn validate_output_address(
    engine: &dyn Engine,
    address: &str,
    basedir: &str,
) -> Result<(String, bool), AddressError> {
    // An address that contains a "|" or starts with a "[" is for the tee
    // muxer. Validate each element on its own and reassemble.
    if address.contains('|') || address.starts_with('[') {
        let mut is_file = false;
        let mut elements = Vec::new();

        for element in address.split('|') {
            let (options, rest) = split_tee_options(element);

            let (validated, file) = validate_output_address(engine, rest, basedir)?;
            if file {
                is_file = true;
            }

            elements.push(format!("{options}{validated}"));
        }

        return Ok((elements.join("|"), is_file));
    }

    let address = address.strip_prefix("file:").unwrap_or(address);

    if has_scheme(address) {
        validate_url(address)?;

        if !engine.validate_output_address(address) {
            return Err(AddressError::NotAllowed);
        }

        return Ok((address.to_string(), false));
    }

    if address == "-" {
        return Ok(("pipe:".to_string(), false));
    }

    let resolved = absolute(address)?;
    let resolved_str = resolved.to_string_lossy().to_string();

    if resolved.starts_with("/dev/") {
        let device = format!("file:{resolved_str}");

        if !engine.validate_output_address(&device) {
            return Err(AddressError::NotAllowed);
        }

        return Ok((device, false));
    }

    if !resolved.starts_with(basedir) {
        return Err(AddressError::OutsideBase {
            address: resolved_str,
            base: basedir.to_string(),
        });
    }

    let file = format!("file:{resolved_str}");

    if !engine.validate_output_address(&file) {
        return Err(AddressError::NotAllowed);
    }

    Ok((file, true))
}
