//! Transport-agnostic resource handlers.
//!
//! Each [`ResourceRequest`] variant is one REST-style route over a doctype
//! (`GET /api/resource/{doctype}`, `PUT /api/resource/{doctype}/{name}`,
//! ...). [`handle`] runs it against an [`App`] and renders the outcome as a
//! [`ResourceResponse`]; errors become a status code plus
//! `{"error", "message", "fields"}`.

use crate::context::App;
use crate::database::{row_to_json, Filters, Order, Query};
use crate::error::{CoreError, CoreResult};
use crate::meta::standard;
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use tracing::debug;

/// Default page size of a list request.
pub const DEFAULT_LIMIT: usize = 20;

/// Default sort column of a list request.
pub const DEFAULT_ORDER_BY: &str = "creation";

/// Query parameters of a list request.
#[derive(Debug, Clone, PartialEq)]
pub struct ListParams {
    /// Projected columns; empty selects `name` plus the keyword fields.
    pub fields: Vec<String>,
    /// Structured filters.
    pub filters: Filters,
    /// Page size.
    pub limit: usize,
    /// Rows to skip.
    pub offset: usize,
    /// Grouping column.
    pub group_by: Option<String>,
    /// Sort column.
    pub order_by: String,
    /// Sort direction.
    pub order: Order,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            filters: Filters::new(),
            limit: DEFAULT_LIMIT,
            offset: 0,
            group_by: None,
            order_by: DEFAULT_ORDER_BY.to_string(),
            order: Order::Asc,
        }
    }
}

impl ListParams {
    /// Parses raw query-string pairs. Unknown keys are ignored.
    ///
    /// `fields` is a JSON array or a comma separated list, `filters` a JSON
    /// structured filter.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidFilter` for malformed `fields`, `filters`
    /// or `order`, and `CoreError::InvalidValue` for a non-numeric `limit`
    /// or `offset`.
    pub fn from_pairs<I, K, V>(pairs: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "fields" => params.fields = parse_fields(value)?,
                "filters" => {
                    let json: JsonValue = serde_json::from_str(value)
                        .map_err(|e| CoreError::invalid_filter(format!("filters: {e}")))?;
                    params.filters = Filters::from_json(&json)?;
                }
                "limit" => params.limit = parse_number("limit", value)?,
                "offset" => params.offset = parse_number("offset", value)?,
                "group_by" => params.group_by = Some(value.to_string()),
                "order_by" => params.order_by = value.to_string(),
                "order" => params.order = value.parse()?,
                _ => {}
            }
        }
        Ok(params)
    }

    /// The query these parameters describe.
    #[must_use]
    pub fn to_query(&self) -> Query {
        let mut query = Query::new()
            .fields(self.fields.iter().cloned())
            .filters(self.filters.clone())
            .order_by(self.order_by.as_str(), self.order)
            .limit(self.limit)
            .offset(self.offset);
        if let Some(group_by) = &self.group_by {
            query = query.group_by(group_by.as_str());
        }
        query
    }
}

fn parse_fields(value: &str) -> CoreResult<Vec<String>> {
    if value.starts_with('[') {
        serde_json::from_str(value).map_err(|e| CoreError::invalid_filter(format!("fields: {e}")))
    } else {
        Ok(value
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect())
    }
}

fn parse_number(key: &str, value: &str) -> CoreResult<usize> {
    value
        .parse()
        .map_err(|_| CoreError::invalid_value(format!("{key} must be a number, got \"{value}\"")))
}

/// One resource operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceRequest {
    /// `GET /api/resource/{doctype}`
    List {
        /// Entity kind.
        doctype: String,
        /// Query parameters.
        params: ListParams,
    },
    /// `GET /api/resource/{doctype}/{name}`
    Get {
        /// Entity kind.
        doctype: String,
        /// Record name.
        name: String,
    },
    /// `GET /api/resource/{doctype}/{name}/{fieldname}`
    GetValue {
        /// Entity kind.
        doctype: String,
        /// Record name.
        name: String,
        /// Field to read.
        fieldname: String,
    },
    /// `POST /api/resource/{doctype}`
    Create {
        /// Entity kind.
        doctype: String,
        /// Field values.
        body: JsonValue,
    },
    /// `PUT /api/resource/{doctype}/{name}`
    Update {
        /// Entity kind.
        doctype: String,
        /// Record name.
        name: String,
        /// Fields to merge.
        body: JsonValue,
    },
    /// `DELETE /api/resource/{doctype}/{name}`
    Delete {
        /// Entity kind.
        doctype: String,
        /// Record name.
        name: String,
    },
    /// `DELETE /api/resource/{doctype}` with a list of names.
    DeleteMany {
        /// Entity kind.
        doctype: String,
        /// Record names.
        names: Vec<String>,
    },
}

/// Status and JSON body of a handled request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceResponse {
    /// HTTP-equivalent status code.
    pub status: u16,
    /// Response body.
    pub body: JsonValue,
}

impl ResourceResponse {
    /// A 200 response.
    #[must_use]
    pub fn ok(body: JsonValue) -> Self {
        Self { status: 200, body }
    }

    /// The error response for `err`.
    #[must_use]
    pub fn error(err: &CoreError) -> Self {
        Self {
            status: err.status_code(),
            body: json!({
                "error": err.kind(),
                "message": err.to_string(),
                "fields": error_fields(err),
            }),
        }
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Runs a request. Writes run in one transaction.
pub fn handle(app: &App, request: &ResourceRequest) -> ResourceResponse {
    match dispatch(app, request) {
        Ok(body) => ResourceResponse::ok(body),
        Err(err) => {
            debug!(error = %err, status = err.status_code(), "resource request failed");
            ResourceResponse::error(&err)
        }
    }
}

fn dispatch(app: &App, request: &ResourceRequest) -> CoreResult<JsonValue> {
    let db = app.database();
    match request {
        ResourceRequest::List { doctype, params } => {
            let meta = app.get_meta(doctype)?;
            let mut params = params.clone();
            if params.order_by == DEFAULT_ORDER_BY && !meta.has_field(DEFAULT_ORDER_BY) {
                params.order_by = standard::NAME.to_string();
            }
            let rows = db.get_all(doctype, &params.to_query())?;
            Ok(JsonValue::Array(
                rows.iter().map(|row| JsonValue::Object(row_to_json(row))).collect(),
            ))
        }
        ResourceRequest::Get { doctype, name } => {
            let doc = app.get_doc(doctype, name)?;
            let json = doc.lock().to_json();
            Ok(json)
        }
        ResourceRequest::GetValue {
            doctype,
            name,
            fieldname,
        } => {
            let value = db.get_value(doctype, name, fieldname)?;
            Ok(json!({ "value": value.to_json() }))
        }
        ResourceRequest::Create { doctype, body } => {
            let doc = app.transaction(|| app.insert_doc(doctype, body))?;
            Ok(doc.to_json())
        }
        ResourceRequest::Update {
            doctype,
            name,
            body,
        } => {
            let shared = app.get_doc(doctype, name)?;
            let mut doc = shared.lock();
            let result = app.transaction(|| {
                doc.update_values(body)?;
                doc.update(app)
            });
            if let Err(err) = result {
                drop(doc);
                app.remove_from_cache(doctype, name);
                return Err(err);
            }
            Ok(doc.to_json())
        }
        ResourceRequest::Delete { doctype, name } => {
            app.transaction(|| app.delete_doc(doctype, name))?;
            Ok(json!({}))
        }
        ResourceRequest::DeleteMany { doctype, names } => {
            app.transaction(|| {
                for name in names {
                    app.delete_doc(doctype, name)?;
                }
                Ok(())
            })?;
            Ok(json!({ "deleted": names.len() }))
        }
    }
}

fn error_fields(err: &CoreError) -> JsonValue {
    let mut fields = Map::new();
    match err {
        CoreError::Mandatory { fields: missing, .. } => {
            for fieldname in missing {
                fields.insert(fieldname.clone(), json!(["Is mandatory"]));
            }
        }
        CoreError::InvalidField { fieldname, .. } => {
            fields.insert(fieldname.clone(), json!([err.to_string()]));
        }
        CoreError::Report(report) => {
            for (fieldname, messages) in report.iter() {
                fields.insert(fieldname.to_string(), json!(messages));
            }
        }
        _ => {}
    }
    JsonValue::Object(fields)
}
