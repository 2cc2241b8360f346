//! OVSDB wire model (RFC 7047) for the operations the driver issues.
//!
//! Values are kept as [`serde_json::Value`] in their on-wire encoding:
//! atoms are plain JSON scalars, references are `["uuid", "<id>"]` or
//! `["named-uuid", "<name>"]`, and sets are `["set", [...]]`.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Column name to value map of a single row.
pub type Row = serde_json::Map<String, Value>;

/// A reference to a row committed in the database.
pub fn uuid(id: &str) -> Value {
    json!(["uuid", id])
}

/// A reference to a row inserted earlier in the same transaction.
pub fn named_uuid(name: &str) -> Value {
    json!(["named-uuid", name])
}

/// A set of atoms.
pub fn set(items: Vec<Value>) -> Value {
    json!(["set", items])
}

/// Extracts the id from a `["uuid", id]` reference.
pub fn as_uuid(value: &Value) -> Option<&str> {
    tagged(value, "uuid")
}

/// Extracts the name from a `["named-uuid", name]` reference.
pub fn as_named_uuid(value: &Value) -> Option<&str> {
    tagged(value, "named-uuid")
}

fn tagged<'a>(value: &'a Value, tag: &str) -> Option<&'a str> {
    match value.as_array()?.as_slice() {
        [Value::String(t), Value::String(id)] if t == tag => Some(id.as_str()),
        _ => None,
    }
}

/// Returns the elements of a set-typed column value.
///
/// A lone atom is a one-element set and a missing value is the empty set.
pub fn set_elements(value: Option<&Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => match v.as_array().map(|a| a.as_slice()) {
            Some([Value::String(tag), Value::Array(items)]) if tag == "set" => items.clone(),
            _ => vec![v.clone()],
        },
    }
}

/// Comparison function of a `where` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Eq,
    Ne,
    Includes,
    Excludes,
}

impl Function {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Function::Eq => "==",
            Function::Ne => "!=",
            Function::Includes => "includes",
            Function::Excludes => "excludes",
        }
    }
}

/// A single `[column, function, value]` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub function: Function,
    pub value: Value,
}

impl Condition {
    /// Matches rows whose `column` equals `value`.
    pub fn equals(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            function: Function::Eq,
            value: value.into(),
        }
    }

    pub fn to_json(&self) -> Value {
        json!([self.column, self.function.as_str(), self.value])
    }
}

/// Mutator applied to a set or map column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutator {
    Insert,
    Delete,
}

impl Mutator {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Mutator::Insert => "insert",
            Mutator::Delete => "delete",
        }
    }
}

/// A single `[column, mutator, value]` mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub column: String,
    pub mutator: Mutator,
    pub value: Value,
}

impl Mutation {
    pub fn new(column: impl Into<String>, mutator: Mutator, value: Value) -> Self {
        Self {
            column: column.into(),
            mutator,
            value,
        }
    }

    pub fn to_json(&self) -> Value {
        json!([self.column, self.mutator.as_str(), self.value])
    }
}

/// One database operation inside a `transact` request.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Insert a row, optionally naming it for later operations in the
    /// same transaction.
    Insert {
        table: String,
        row: Row,
        uuid_name: Option<String>,
    },
    /// Apply mutations to every row matching `conditions`.
    Mutate {
        table: String,
        conditions: Vec<Condition>,
        mutations: Vec<Mutation>,
    },
    /// Delete every row matching `conditions`.
    Delete {
        table: String,
        conditions: Vec<Condition>,
    },
    /// Read every row matching `conditions`.
    Select {
        table: String,
        conditions: Vec<Condition>,
    },
}

impl Operation {
    /// Creates an insert operation.
    pub fn insert(table: impl Into<String>, row: Row, uuid_name: Option<&str>) -> Self {
        Operation::Insert {
            table: table.into(),
            row,
            uuid_name: uuid_name.map(str::to_string),
        }
    }

    /// Creates a mutate operation.
    pub fn mutate(
        table: impl Into<String>,
        conditions: Vec<Condition>,
        mutations: Vec<Mutation>,
    ) -> Self {
        Operation::Mutate {
            table: table.into(),
            conditions,
            mutations,
        }
    }

    /// Creates a delete operation.
    pub fn delete(table: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Operation::Delete {
            table: table.into(),
            conditions,
        }
    }

    /// Creates a select operation.
    pub fn select(table: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Operation::Select {
            table: table.into(),
            conditions,
        }
    }

    /// Returns the operation name as used on the wire.
    pub const fn op_name(&self) -> &'static str {
        match self {
            Operation::Insert { .. } => "insert",
            Operation::Mutate { .. } => "mutate",
            Operation::Delete { .. } => "delete",
            Operation::Select { .. } => "select",
        }
    }

    /// Returns the target table.
    pub fn table(&self) -> &str {
        match self {
            Operation::Insert { table, .. }
            | Operation::Mutate { table, .. }
            | Operation::Delete { table, .. }
            | Operation::Select { table, .. } => table,
        }
    }

    pub fn to_json(&self) -> Value {
        let where_json = |conditions: &[Condition]| -> Value {
            Value::Array(conditions.iter().map(Condition::to_json).collect())
        };
        match self {
            Operation::Insert {
                table,
                row,
                uuid_name,
            } => {
                let mut op = json!({ "op": "insert", "table": table, "row": row });
                if let Some(name) = uuid_name {
                    op["uuid-name"] = json!(name);
                }
                op
            }
            Operation::Mutate {
                table,
                conditions,
                mutations,
            } => json!({
                "op": "mutate",
                "table": table,
                "where": where_json(conditions),
                "mutations": mutations.iter().map(Mutation::to_json).collect::<Vec<_>>(),
            }),
            Operation::Delete { table, conditions } => json!({
                "op": "delete",
                "table": table,
                "where": where_json(conditions),
            }),
            Operation::Select { table, conditions } => json!({
                "op": "select",
                "table": table,
                "where": where_json(conditions),
            }),
        }
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Reply to one operation of a transaction.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OperationResult {
    /// Reference to the inserted row (insert only).
    #[serde(default)]
    pub uuid: Option<Value>,
    /// Number of rows matched (mutate/delete).
    #[serde(default)]
    pub count: Option<u64>,
    /// Matching rows (select only).
    #[serde(default)]
    pub rows: Option<Vec<Row>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

impl OperationResult {
    /// Returns the id of the row created by an insert.
    pub fn inserted_uuid(&self) -> Option<&str> {
        self.uuid.as_ref().and_then(as_uuid)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Old and new contents of one row in a change notification.
///
/// An absent or empty `new` means the row was deleted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Row>,
}

impl RowUpdate {
    /// Returns the new row contents, or `None` for a deletion.
    pub fn new_row(&self) -> Option<&Row> {
        self.new.as_ref().filter(|row| !row.is_empty())
    }
}

/// Row updates keyed by table name, then row uuid.
pub type TableUpdates = HashMap<String, HashMap<String, RowUpdate>>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_insert_encoding() {
        let mut row = Row::new();
        row.insert("name".into(), json!("p1"));
        let op = Operation::insert("Interface", row, Some("intf"));
        assert_eq!(
            op.to_json(),
            json!({"op": "insert", "table": "Interface", "row": {"name": "p1"}, "uuid-name": "intf"})
        );
    }

    #[test]
    fn test_mutate_encoding() {
        let op = Operation::mutate(
            "Bridge",
            vec![Condition::equals("name", "ovs-br0")],
            vec![Mutation::new(
                "ports",
                Mutator::Insert,
                set(vec![named_uuid("port")]),
            )],
        );
        assert_eq!(
            op.to_json(),
            json!({
                "op": "mutate",
                "table": "Bridge",
                "where": [["name", "==", "ovs-br0"]],
                "mutations": [["ports", "insert", ["set", [["named-uuid", "port"]]]]],
            })
        );
    }

    #[test]
    fn test_select_encoding() {
        let op = Operation::select("Port", vec![Condition::equals("name", "vport1")]);
        assert_eq!(op.op_name(), "select");
        assert_eq!(
            op.to_json(),
            json!({"op": "select", "table": "Port", "where": [["name", "==", "vport1"]]})
        );
    }

    #[test]
    fn test_reference_helpers() {
        assert_eq!(as_uuid(&uuid("abc")), Some("abc"));
        assert_eq!(as_named_uuid(&named_uuid("port")), Some("port"));
        assert_eq!(as_uuid(&named_uuid("port")), None);
        assert_eq!(as_uuid(&json!("abc")), None);
    }

    #[test]
    fn test_set_elements() {
        assert!(set_elements(None).is_empty());
        assert_eq!(set_elements(Some(&uuid("a"))), vec![uuid("a")]);
        assert_eq!(
            set_elements(Some(&set(vec![uuid("a"), uuid("b")]))),
            vec![uuid("a"), uuid("b")]
        );
    }

    #[test]
    fn test_operation_result_decoding() {
        let replies: Vec<Option<OperationResult>> = serde_json::from_value(json!([
            {"uuid": ["uuid", "1234"]},
            {"count": 1},
            {"error": "constraint violation", "details": "bad"},
            null,
            {"rows": [{"name": "p1"}]}
        ]))
        .unwrap();
        assert_eq!(replies[0].as_ref().unwrap().inserted_uuid(), Some("1234"));
        assert_eq!(replies[1].as_ref().unwrap().count, Some(1));
        assert!(replies[2].as_ref().unwrap().is_error());
        assert!(replies[3].is_none());
        assert_eq!(replies[4].as_ref().unwrap().rows.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_row_update_deletion() {
        let update: RowUpdate = serde_json::from_value(json!({"old": {"name": "p1"}})).unwrap();
        assert!(update.new_row().is_none());

        let update: RowUpdate = serde_json::from_value(json!({"new": {}})).unwrap();
        assert!(update.new_row().is_none());
    }
}
