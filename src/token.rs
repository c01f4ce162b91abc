//! Write-key token deobfuscation.
//!
//! The write key is kept in configuration as its base64 encoding so it is not
//! stored in plain text. This is obfuscation only, not encryption.

use base64::Engine as _;

/// Errors that can occur while recovering a write key from its token.
#[derive(Debug)]
pub enum TokenError {
    /// The token is not valid base64
    Decode(base64::DecodeError),

    /// The decoded bytes are not UTF-8
    Utf8(std::string::FromUtf8Error),

    /// The token decodes to an empty key
    Empty,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Decode(e) => write!(f, "Failed to base64-decode token: {}", e),
            TokenError::Utf8(e) => write!(f, "Decoded token is not UTF-8: {}", e),
            TokenError::Empty => write!(f, "Token decodes to an empty write key"),
        }
    }
}

impl std::error::Error for TokenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TokenError::Decode(e) => Some(e),
            TokenError::Utf8(e) => Some(e),
            TokenError::Empty => None,
        }
    }
}

/// Recover the write key from its stored token.
pub fn deobfuscate(token: &str) -> Result<String, TokenError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(token.trim())
        .map_err(TokenError::Decode)?;

    let key = String::from_utf8(bytes).map_err(TokenError::Utf8)?;
    if key.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(key)
}

/// Produce the token to store for a write key.
pub fn obfuscate(write_key: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(write_key)
}
