use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use rand::rngs::OsRng;

/// The size of session and CSRF tokens in bytes.
pub const TOKEN_SIZE: usize = 32;

/// Length of an encoded token (URL-safe base64 without padding).
pub const ENCODED_TOKEN_LEN: usize = 43;

/// Generates a new random token.
///
/// # Returns
///
/// A URL-safe base64-encoded token.
pub fn generate_token() -> String {
    let mut token = [0u8; TOKEN_SIZE];
    OsRng.fill_bytes(&mut token);

    general_purpose::URL_SAFE_NO_PAD.encode(token)
}

/// Checks that `value` has the shape of a token produced by [`generate_token`].
pub fn is_well_formed(value: &str) -> bool {
    value.len() == ENCODED_TOKEN_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
