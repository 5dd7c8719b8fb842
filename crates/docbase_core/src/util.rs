//! Small helpers shared across the engine.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of generated identifiers.
pub const RANDOM_NAME_LEN: usize = 10;

/// Returns a random 10-character alphanumeric token.
#[must_use]
pub fn random_name() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_NAME_LEN)
        .map(char::from)
        .collect()
}

/// Current UTC time as stored in `creation` / `modified`.
///
/// Microseconds are kept so two saves within one second still differ.
#[must_use]
pub fn now_timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string()
}

/// Lower-cases `text`, drops punctuation and joins words with `-`.
#[must_use]
pub fn slug(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut separated = false;
    for c in text.trim().chars() {
        if c.is_alphanumeric() || c == '_' {
            if separated && !slug.is_empty() {
                slug.push('-');
            }
            separated = false;
            slug.extend(c.to_lowercase());
        } else if c == '-' || c.is_whitespace() {
            separated = true;
        }
    }
    slug
}

/// Turns a label into a fieldname (`"Due Date"` -> `"due_date"`).
#[must_use]
pub fn fieldname_from_label(label: &str) -> String {
    slug(label).replace('-', "_")
}

/// Returns true for a plain SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`).
#[must_use]
pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
