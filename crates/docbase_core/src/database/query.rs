//! Select query builder.

use super::filter::Filters;
use crate::error::{CoreError, CoreResult};
use crate::util::is_identifier;
use docbase_storage::Value;
use indexmap::IndexMap;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl Order {
    /// SQL keyword.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for Order {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(CoreError::invalid_filter(format!("invalid sort order \"{s}\""))),
        }
    }
}

/// Parameters of a list query against one doctype.
///
/// ```rust
/// use docbase_core::database::{Order, Query};
///
/// let query = Query::new()
///     .fields(["name", "status"])
///     .filter("status", "Open")
///     .order_by("modified", Order::Desc)
///     .limit(20);
/// assert_eq!(query.limit, Some(20));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Projected columns; empty selects `name` plus the keyword fields.
    pub fields: Vec<String>,
    /// Conditions; the doctype's fixed filters are added on execution.
    pub filters: Filters,
    /// Sort column.
    pub order_by: Option<String>,
    /// Sort direction.
    pub order: Order,
    /// Grouping column.
    pub group_by: Option<String>,
    /// Maximum number of rows.
    pub limit: Option<usize>,
    /// Rows to skip.
    pub offset: Option<usize>,
}

impl Query {
    /// A query selecting the default fields of every row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the projected columns (`*` selects all).
    #[must_use]
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the filters.
    #[must_use]
    pub fn filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    /// Adds an equality filter.
    #[must_use]
    pub fn filter(mut self, fieldname: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters = self.filters.eq(fieldname, value);
        self
    }

    /// Sets the sort column and direction.
    #[must_use]
    pub fn order_by(mut self, fieldname: impl Into<String>, order: Order) -> Self {
        self.order_by = Some(fieldname.into());
        self.order = order;
        self
    }

    /// Sets the grouping column.
    #[must_use]
    pub fn group_by(mut self, fieldname: impl Into<String>) -> Self {
        self.group_by = Some(fieldname.into());
        self
    }

    /// Sets the row limit.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the number of rows to skip.
    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Builds the statement against `table`.
    pub(crate) fn to_sql(
        &self,
        table: &str,
        default_fields: &[String],
        fixed: &IndexMap<String, Value>,
    ) -> CoreResult<(String, Vec<Value>)> {
        let fields = if self.fields.is_empty() {
            default_fields
        } else {
            self.fields.as_slice()
        };
        for field in fields {
            check_projection(field)?;
        }
        let mut filters = self.filters.clone();
        filters.apply_fixed(fixed);
        let condition = filters.to_sql()?;

        let mut sql = format!(
            "SELECT {} FROM {table}{}",
            fields.join(", "),
            condition.where_clause()
        );
        if let Some(group_by) = &self.group_by {
            check_identifier(group_by)?;
            sql.push_str(&format!(" GROUP BY {group_by}"));
        }
        if let Some(order_by) = &self.order_by {
            check_identifier(order_by)?;
            sql.push_str(&format!(" ORDER BY {order_by} {}", self.order));
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        Ok((sql, condition.params))
    }
}

fn check_identifier(fieldname: &str) -> CoreResult<()> {
    if is_identifier(fieldname) {
        Ok(())
    } else {
        Err(CoreError::invalid_filter(format!("invalid field name \"{fieldname}\"")))
    }
}

/// A projected column: `*`, an identifier or a simple aggregate such as
/// `count(*) as total`.
fn check_projection(field: &str) -> CoreResult<()> {
    static AGGREGATE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    let aggregate = AGGREGATE
        .get_or_init(|| {
            Regex::new(
                r"(?i)^(count|sum|min|max|avg)\((\*|[A-Za-z_][A-Za-z0-9_]*)\)( as [A-Za-z_][A-Za-z0-9_]*)?$",
            )
        })
        .as_ref()
        .map_err(|err| CoreError::invalid_filter(err.to_string()))?;
    if field == "*" || is_identifier(field) || aggregate.is_match(field) {
        Ok(())
    } else {
        Err(CoreError::invalid_filter(format!("invalid field name \"{field}\"")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Vec<String> {
        vec!["name".to_string(), "subject".to_string()]
    }

    #[test]
    fn default_projection_and_fixed_filters() {
        let mut fixed = IndexMap::new();
        fixed.insert("party_type".to_string(), Value::from("Customer"));
        let (sql, params) = Query::new().to_sql("Party", &defaults(), &fixed).unwrap();
        assert_eq!(sql, "SELECT name, subject FROM Party WHERE party_type = ?");
        assert_eq!(params, vec![Value::from("Customer")]);
    }

    #[test]
    fn full_statement() {
        let (sql, params) = Query::new()
            .fields(["status", "count(*) as total"])
            .filter("owner", "jane")
            .group_by("status")
            .order_by("status", Order::Desc)
            .limit(10)
            .offset(20)
            .to_sql("ToDo", &defaults(), &IndexMap::new())
            .unwrap();
        assert_eq!(
            sql,
            "SELECT status, count(*) as total FROM ToDo WHERE owner = ? GROUP BY status ORDER BY status DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(params, vec![Value::from("jane")]);

        let (sql, _) = Query::new()
            .offset(5)
            .to_sql("ToDo", &defaults(), &IndexMap::new())
            .unwrap();
        assert!(sql.ends_with("LIMIT -1 OFFSET 5"));
    }

    #[test]
    fn identifiers_are_checked() {
        let none = IndexMap::new();
        assert!(Query::new().fields(["name; --"]).to_sql("ToDo", &defaults(), &none).is_err());
        assert!(Query::new()
            .order_by("1=1", Order::Asc)
            .to_sql("ToDo", &defaults(), &none)
            .is_err());
        assert!(Query::new().group_by("a b").to_sql("ToDo", &defaults(), &none).is_err());
        assert!(Query::new().fields(["*"]).to_sql("ToDo", &defaults(), &none).is_ok());
    }

    #[test]
    fn order_parsing() {
        assert_eq!("DESC".parse::<Order>().unwrap(), Order::Desc);
        assert_eq!(" asc ".parse::<Order>().unwrap(), Order::Asc);
        assert!("sideways".parse::<Order>().is_err());
    }
}
