//! Programs carried in shareable links
//!
//! A link holds the program as base64 in its fragment, `file:///…/run.html#cHJpbnQoMSk=`.
//! A bare base64 string is accepted as well.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use thiserror::Error;

/// Link decoding errors
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("program is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("program is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Decode the program of `link`; an empty fragment means no program.
pub fn decode_program(link: &str) -> Result<Option<String>, LinkError> {
    let encoded = match link.rsplit_once('#') {
        Some((_, fragment)) => fragment,
        None => link,
    }
    .trim();
    if encoded.is_empty() {
        return Ok(None);
    }

    let bytes = match STANDARD.decode(encoded) {
        Ok(bytes) => bytes,
        Err(_) => STANDARD_NO_PAD.decode(encoded.trim_end_matches('='))?,
    };
    Ok(Some(String::from_utf8(bytes)?))
}
