//! Pluggable password decoding for the `password`/properties-bag credential
//! path.

use crate::error::Error;

pub trait PasswordDecoder: Send + Sync + 'static {
    fn decode(&self, encoded: &str) -> Result<String, Error>;
}

/// The default: passwords are stored in plain text, so decoding is the
/// identity function.
pub struct IdentityDecoder;

impl PasswordDecoder for IdentityDecoder {
    fn decode(&self, encoded: &str) -> Result<String, Error> {
        Ok(encoded.to_string())
    }
}
