//! Property-based test generators using proptest.
//!
//! Strategies produce data that satisfies the sample schema in
//! [`crate::fixtures`], so generated records can be inserted as-is.

use docbase_core::Value;
use proptest::prelude::*;
use serde_json::{json, Value as JsonValue};

/// Items inserted by [`crate::TestApp::seed`].
pub const SEEDED_ITEMS: [&str; 2] = ["WIDGET", "GADGET"];

/// Customers inserted by [`crate::TestApp::seed`].
pub const SEEDED_CUSTOMERS: [&str; 2] = ["ACME", "GLOBEX"];

/// Strategy for generating valid field names.
pub fn fieldname_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,23}").expect("Invalid regex")
}

/// Strategy for generating record names.
pub fn doc_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][A-Z0-9-]{2,15}").expect("Invalid regex")
}

/// Strategy for generating free text, including quotes and `%`.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9 '%_\"-]{1,40}")
        .expect("Invalid regex")
        .prop_filter("Text must not be blank", |s| !s.trim().is_empty())
}

/// Strategy for scalar storage values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i64>().prop_map(Value::from),
        (-1.0e9..1.0e9f64).prop_map(Value::from),
        text_strategy().prop_map(Value::from),
    ]
}

/// Strategy for amounts with at most two decimals.
pub fn amount_strategy() -> impl Strategy<Value = f64> {
    (0u32..100_000).prop_map(|cents| f64::from(cents) / 100.0)
}

/// Strategy for one invoice line `(item, qty, rate)` over the seeded items.
pub fn invoice_line_strategy() -> impl Strategy<Value = (&'static str, f64, f64)> {
    (
        prop::sample::select(SEEDED_ITEMS.to_vec()),
        (1u32..50).prop_map(f64::from),
        amount_strategy(),
    )
}

/// Strategy for the JSON body of a new `Customer`.
pub fn customer_json_strategy() -> impl Strategy<Value = JsonValue> {
    (doc_name_strategy(), text_strategy())
        .prop_map(|(name, customer_name)| json!({"name": name, "customer_name": customer_name}))
}

/// Operations applied to `Customer` records.
#[derive(Debug, Clone)]
pub enum RecordOperation {
    /// Insert a customer
    Insert {
        /// Record name
        name: String,
        /// Customer name
        customer_name: String,
    },
    /// Change the customer name of an existing record
    Update {
        /// Record name
        name: String,
        /// New customer name
        customer_name: String,
    },
    /// Delete a record
    Delete {
        /// Record name
        name: String,
    },
}

impl RecordOperation {
    /// Name of the record the operation targets.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Insert { name, .. } | Self::Update { name, .. } | Self::Delete { name } => name,
        }
    }
}

/// Strategy for record operations over a small name pool, so that updates
/// and deletes regularly hit existing records.
pub fn record_operation_strategy() -> impl Strategy<Value = RecordOperation> {
    let name = prop::sample::select(vec!["C-1", "C-2", "C-3", "C-4"]).prop_map(str::to_string);
    prop_oneof![
        3 => (name.clone(), text_strategy())
            .prop_map(|(name, customer_name)| RecordOperation::Insert { name, customer_name }),
        2 => (name.clone(), text_strategy())
            .prop_map(|(name, customer_name)| RecordOperation::Update { name, customer_name }),
        1 => name.prop_map(|name| RecordOperation::Delete { name }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<RecordOperation>> {
    prop::collection::vec(record_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn fieldname_is_valid(name in fieldname_strategy()) {
            prop_assert_eq!(docbase_core::slug(&name), name);
        }

        #[test]
        fn amounts_have_two_decimals(amount in amount_strategy()) {
            prop_assert!(amount >= 0.0);
            prop_assert_eq!((amount * 100.0).round() / 100.0, amount);
        }

        #[test]
        fn lines_use_seeded_items((item, qty, _rate) in invoice_line_strategy()) {
            prop_assert!(SEEDED_ITEMS.contains(&item));
            prop_assert!(qty >= 1.0);
        }
    }
}
