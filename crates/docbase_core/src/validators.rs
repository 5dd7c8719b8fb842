//! Built-in field validators.
//!
//! Validators are plain functions registered by name in the
//! [`MetaRegistry`](crate::meta::MetaRegistry); a field opts in through
//! `FieldDefinition::validator`.

use crate::document::Document;
use docbase_storage::Value;
use regex::Regex;
use std::sync::OnceLock;

/// Accepts `something@domain` style addresses.
///
/// # Errors
///
/// Returns the user-facing message when the value does not look like an email.
pub fn email(value: &Value, _doc: &Document) -> Result<(), String> {
    static EMAIL: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    let re = EMAIL
        .get_or_init(|| Regex::new(r"^(.+)@(.+){2,}"))
        .as_ref()
        .map_err(ToString::to_string)?;
    let text = value.to_text();
    if re.is_match(&text) {
        Ok(())
    } else {
        Err(format!("Invalid Email: {text}"))
    }
}

/// Accepts values starting with an optional `+` followed by a digit.
///
/// # Errors
///
/// Returns the user-facing message when the value does not look like a phone number.
pub fn phone(value: &Value, _doc: &Document) -> Result<(), String> {
    static PHONE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    let re = PHONE
        .get_or_init(|| Regex::new(r"^[+]?\d"))
        .as_ref()
        .map_err(ToString::to_string)?;
    let text = value.to_text();
    if re.is_match(&text) {
        Ok(())
    } else {
        Err(format!("Invalid Phone: {text}"))
    }
}
