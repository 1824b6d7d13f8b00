//! Short, human-shareable room codes.
//!
//! A code is six uppercase hexadecimal characters taken from a random
//! UUID v4, e.g. `3F9A0C`. Codes are only unique among live rooms; the
//! registry re-draws on collision.

use uuid::Uuid;

/// Number of characters in a generated room code.
pub const CODE_LEN: usize = 6;

/// Draws a fresh random room code.
#[must_use]
pub fn generate() -> String {
    let mut code = Uuid::new_v4().simple().to_string();
    code.truncate(CODE_LEN);
    code.make_ascii_uppercase();
    code
}

/// Returns `true` if `code` has the shape of a generated room code.
///
/// The relay does not require this of client-supplied codes (unknown codes
/// are simply not found); it is used by tests and tooling.
#[must_use]
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LEN
        && code
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
}
