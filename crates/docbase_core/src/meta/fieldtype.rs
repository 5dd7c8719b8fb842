//! Field types and their storage column mapping.

use docbase_storage::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// The kind of a field.
///
/// Scalar kinds map to one storage column type through the [`TypeMap`];
/// `Table` and `Form` are structural and hold child records instead.
/// Unknown names parse to `Custom` so applications can register their own
/// scalar kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub enum FieldType {
    #[default]
    Data,
    Text,
    SmallText,
    LongText,
    Code,
    TextEditor,
    Int,
    Float,
    Currency,
    Percent,
    Check,
    Date,
    Datetime,
    Time,
    Select,
    Link,
    DynamicLink,
    Password,
    ReadOnly,
    Tags,
    AutoComplete,
    Attach,
    AttachImage,
    Color,
    /// Ordered list of child records.
    Table,
    /// A single embedded child record.
    Form,
    /// Application-registered scalar kind.
    Custom(String),
}

impl FieldType {
    /// Every built-in kind, in display order.
    pub const BUILTIN: [FieldType; 26] = [
        Self::Data,
        Self::Text,
        Self::SmallText,
        Self::LongText,
        Self::Code,
        Self::TextEditor,
        Self::Int,
        Self::Float,
        Self::Currency,
        Self::Percent,
        Self::Check,
        Self::Date,
        Self::Datetime,
        Self::Time,
        Self::Select,
        Self::Link,
        Self::DynamicLink,
        Self::Password,
        Self::ReadOnly,
        Self::Tags,
        Self::AutoComplete,
        Self::Attach,
        Self::AttachImage,
        Self::Color,
        Self::Table,
        Self::Form,
    ];

    /// Display name, as stored in `DocField.fieldtype`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Data => "Data",
            Self::Text => "Text",
            Self::SmallText => "Small Text",
            Self::LongText => "Long Text",
            Self::Code => "Code",
            Self::TextEditor => "Text Editor",
            Self::Int => "Int",
            Self::Float => "Float",
            Self::Currency => "Currency",
            Self::Percent => "Percent",
            Self::Check => "Check",
            Self::Date => "Date",
            Self::Datetime => "Datetime",
            Self::Time => "Time",
            Self::Select => "Select",
            Self::Link => "Link",
            Self::DynamicLink => "Dynamic Link",
            Self::Password => "Password",
            Self::ReadOnly => "Read Only",
            Self::Tags => "Tags",
            Self::AutoComplete => "AutoComplete",
            Self::Attach => "Attach",
            Self::AttachImage => "Attach Image",
            Self::Color => "Color",
            Self::Table => "Table",
            Self::Form => "Form",
            Self::Custom(name) => name,
        }
    }

    /// Table or Form.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Table | Self::Form)
    }

    /// Float, Currency or Percent.
    #[must_use]
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float | Self::Currency | Self::Percent)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(Self::BUILTIN
            .iter()
            .find(|ft| ft.as_str() == s)
            .cloned()
            .unwrap_or_else(|| Self::Custom(s.to_string())))
    }
}

impl From<&str> for FieldType {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(ft) => ft,
            Err(never) => match never {},
        }
    }
}

impl Serialize for FieldType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

/// Storage column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// `TEXT`
    Text,
    /// `INTEGER`
    Integer,
    /// `REAL`
    Real,
}

impl ColumnType {
    /// SQL spelling.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
        }
    }

    /// Coerces a value to this column's storage class.
    ///
    /// Empty text becomes `Null` for numeric columns; lists are joined with
    /// `,` for text columns.
    ///
    /// # Errors
    ///
    /// Returns the offending text when it is not numeric.
    pub fn cast(self, value: Value) -> Result<Value, String> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (Self::Text, Value::Text(s)) => Ok(Value::Text(s)),
            (Self::Text, Value::List(items)) => Ok(Value::Text(
                items.iter().map(Value::to_text).collect::<Vec<_>>().join(","),
            )),
            (Self::Text, other) => Ok(Value::Text(other.to_text())),
            (Self::Integer, Value::Int(i)) => Ok(Value::Int(i)),
            (Self::Real, Value::Float(f)) => Ok(Value::Float(f)),
            (_, Value::Text(s)) if s.trim().is_empty() => Ok(Value::Null),
            (Self::Integer, other) => other
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| other.to_text()),
            (Self::Real, other) => other
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| other.to_text()),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Registry-owned mapping from field type to column type.
#[derive(Debug, Clone)]
pub struct TypeMap {
    columns: HashMap<FieldType, ColumnType>,
}

impl Default for TypeMap {
    fn default() -> Self {
        let mut columns = HashMap::new();
        for ft in FieldType::BUILTIN {
            let column = match ft {
                FieldType::Currency | FieldType::Float | FieldType::Percent => ColumnType::Real,
                FieldType::Check | FieldType::Int => ColumnType::Integer,
                FieldType::Table | FieldType::Form => continue,
                _ => ColumnType::Text,
            };
            columns.insert(ft, column);
        }
        Self { columns }
    }
}

impl TypeMap {
    /// Column type of a field type; `None` for structural kinds.
    #[must_use]
    pub fn column_type(&self, fieldtype: &FieldType) -> Option<ColumnType> {
        self.columns.get(fieldtype).copied()
    }

    /// Whether the field type is usable in a definition.
    #[must_use]
    pub fn is_known(&self, fieldtype: &FieldType) -> bool {
        fieldtype.is_structural() || self.columns.contains_key(fieldtype)
    }

    /// Adds or replaces a scalar field type.
    pub fn register(&mut self, fieldtype: FieldType, column: ColumnType) {
        self.columns.insert(fieldtype, column);
    }

    /// All known field types with their column type, sorted by name.
    #[must_use]
    pub fn entries(&self) -> Vec<(FieldType, Option<ColumnType>)> {
        let mut entries: Vec<_> = self
            .columns
            .iter()
            .map(|(ft, col)| (ft.clone(), Some(*col)))
            .chain([(FieldType::Table, None), (FieldType::Form, None)])
            .collect();
        entries.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        entries
    }
}
