//! Record commands, answered by the resource handlers.

use crate::error::{CliError, CliResult};
use docbase_core::{handle, App, ListParams, ResourceRequest, ResourceResponse};
use serde_json::Value as JsonValue;

/// Lists records matching raw query parameters.
pub fn list<I>(app: &App, doctype: String, pairs: I) -> CliResult<()>
where
    I: IntoIterator<Item = (&'static str, String)>,
{
    let params = ListParams::from_pairs(pairs)?;
    print(respond(app, &ResourceRequest::List { doctype, params })?)
}

/// Prints one record with its children.
pub fn get(app: &App, doctype: String, name: String) -> CliResult<()> {
    print(respond(app, &ResourceRequest::Get { doctype, name })?)
}

/// Inserts a record.
pub fn create(app: &App, doctype: String, json: &str) -> CliResult<()> {
    let body = parse_object(json)?;
    print(respond(app, &ResourceRequest::Create { doctype, body })?)
}

/// Merges values into a record and saves it.
pub fn update(app: &App, doctype: String, name: String, json: &str) -> CliResult<()> {
    let body = parse_object(json)?;
    print(respond(app, &ResourceRequest::Update { doctype, name, body })?)
}

/// Deletes records; several names are deleted atomically.
pub fn delete(app: &App, doctype: String, mut names: Vec<String>) -> CliResult<()> {
    let request = if names.len() == 1 {
        ResourceRequest::Delete {
            doctype,
            name: names.remove(0),
        }
    } else {
        ResourceRequest::DeleteMany { doctype, names }
    };
    print(respond(app, &request)?)
}

fn parse_object(json: &str) -> CliResult<JsonValue> {
    let body: JsonValue = serde_json::from_str(json)?;
    if body.is_object() {
        Ok(body)
    } else {
        Err(CliError::Request {
            status: 400,
            kind: "ValueError".to_string(),
            message: "expected a JSON object".to_string(),
        })
    }
}

/// Turns an error response into a [`CliError::Request`].
fn respond(app: &App, request: &ResourceRequest) -> CliResult<JsonValue> {
    let ResourceResponse { status, body } = handle(app, request);
    if (200..300).contains(&status) {
        return Ok(body);
    }
    let text = |key: &str| {
        body.get(key)
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string()
    };
    Err(CliError::Request {
        status,
        kind: text("error"),
        message: text("message"),
    })
}

fn print(body: JsonValue) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
