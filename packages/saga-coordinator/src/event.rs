//! Inbound events
//!
//! Lifecycle events (`TransactionEvent`) and per-statement events
//! (`SqlExecutionEvent`) as delivered by the SQL execution layer. Operation and
//! event types are closed enums so every handler match is exhaustive.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Identity of one logical transaction, stable for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identity
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TransactionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Transaction lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionOperation {
    Begin,
    Commit,
    Rollback,
}

impl TransactionOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionOperation::Begin => "BEGIN",
            TransactionOperation::Commit => "COMMIT",
            TransactionOperation::Rollback => "ROLLBACK",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionOperation::Commit | TransactionOperation::Rollback
        )
    }
}

impl fmt::Display for TransactionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle event. `plan_output` is filled in only by a successful COMMIT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub transaction_id: TransactionId,
    pub operation: TransactionOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_output: Option<String>,
}

impl TransactionEvent {
    pub fn new(transaction_id: impl Into<TransactionId>, operation: TransactionOperation) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            operation,
            plan_output: None,
        }
    }

    pub fn begin(transaction_id: impl Into<TransactionId>) -> Self {
        Self::new(transaction_id, TransactionOperation::Begin)
    }

    pub fn commit(transaction_id: impl Into<TransactionId>) -> Self {
        Self::new(transaction_id, TransactionOperation::Commit)
    }

    pub fn rollback(transaction_id: impl Into<TransactionId>) -> Self {
        Self::new(transaction_id, TransactionOperation::Rollback)
    }
}

/// Per-statement execution signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SqlExecutionEventType {
    BeforeExecute,
    ExecuteSuccess,
    ExecuteFailure,
}

impl SqlExecutionEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlExecutionEventType::BeforeExecute => "BEFORE_EXECUTE",
            SqlExecutionEventType::ExecuteSuccess => "EXECUTE_SUCCESS",
            SqlExecutionEventType::ExecuteFailure => "EXECUTE_FAILURE",
        }
    }
}

impl fmt::Display for SqlExecutionEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parameter value bound to a statement.
///
/// Non-finite floats have no JSON representation and fail serialization
/// instead of silently turning into `null`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SqlValue::Null => serializer.serialize_unit(),
            SqlValue::Bool(b) => serializer.serialize_bool(*b),
            SqlValue::Int(i) => serializer.serialize_i64(*i),
            SqlValue::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            SqlValue::Float(f) => Err(serde::ser::Error::custom(format!(
                "non-finite float parameter {} cannot be encoded",
                f
            ))),
            SqlValue::Text(s) => serializer.serialize_str(s),
            SqlValue::Bytes(bytes) => serializer.collect_seq(bytes),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

/// A statement with its bound parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlUnit {
    pub sql: String,
    #[serde(default)]
    pub parameters: Vec<SqlValue>,
}

impl SqlUnit {
    pub fn new(sql: impl Into<String>, parameters: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            parameters,
        }
    }

    /// Compensation not yet computed upstream
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty() && self.parameters.is_empty()
    }
}

/// Statement execution event routed to the transaction's graph builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlExecutionEvent {
    pub transaction_id: TransactionId,
    pub event_type: SqlExecutionEventType,
    pub request_id: String,
    pub data_source: String,
    pub statement: SqlUnit,
    #[serde(default)]
    pub compensation: SqlUnit,
}

impl SqlExecutionEvent {
    /// BEFORE_EXECUTE marks a statement boundary; it carries no statement data.
    pub fn before_execute(transaction_id: impl Into<TransactionId>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            event_type: SqlExecutionEventType::BeforeExecute,
            request_id: String::new(),
            data_source: String::new(),
            statement: SqlUnit::empty(),
            compensation: SqlUnit::empty(),
        }
    }

    pub fn success(
        transaction_id: impl Into<TransactionId>,
        request_id: impl Into<String>,
        data_source: impl Into<String>,
        statement: SqlUnit,
        compensation: SqlUnit,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            event_type: SqlExecutionEventType::ExecuteSuccess,
            request_id: request_id.into(),
            data_source: data_source.into(),
            statement,
            compensation,
        }
    }

    pub fn failure(
        transaction_id: impl Into<TransactionId>,
        request_id: impl Into<String>,
        data_source: impl Into<String>,
        statement: SqlUnit,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            event_type: SqlExecutionEventType::ExecuteFailure,
            request_id: request_id.into(),
            data_source: data_source.into(),
            statement,
            compensation: SqlUnit::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = TransactionId::generate();
        let b = TransactionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_operation_terminal() {
        assert!(!TransactionOperation::Begin.is_terminal());
        assert!(TransactionOperation::Commit.is_terminal());
        assert!(TransactionOperation::Rollback.is_terminal());
    }

    #[test]
    fn test_event_type_wire_names() {
        let json = serde_json::to_string(&SqlExecutionEventType::BeforeExecute).unwrap();
        assert_eq!(json, "\"BEFORE_EXECUTE\"");

        let op: TransactionOperation = serde_json::from_str("\"ROLLBACK\"").unwrap();
        assert_eq!(op, TransactionOperation::Rollback);
    }

    #[test]
    fn test_sql_value_encoding() {
        let values = vec![
            SqlValue::Null,
            SqlValue::from(true),
            SqlValue::from(7i64),
            SqlValue::from(1.5),
            SqlValue::from("abc"),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[null,true,7,1.5,"abc"]"#);

        let parsed: Vec<SqlValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, values);
    }

    #[test]
    fn test_non_finite_float_rejected() {
        assert!(serde_json::to_string(&SqlValue::Float(f64::NAN)).is_err());
        assert!(serde_json::to_string(&SqlValue::Float(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_transaction_event_skips_empty_plan() {
        let event = TransactionEvent::begin("tx1");
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"transaction_id":"tx1","operation":"BEGIN"}"#);
    }
}
