//! Tabular report data
//!
//! Report documents are JSON. [`flatten`] turns them into a [`Table`] of rows
//! and named columns: nested objects become dotted column names, arrays are
//! kept as cell values, and keys missing from a record read as `null`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Column name used when the records are scalars rather than objects
pub const VALUE_COLUMN: &str = "value";

const SEPARATOR: char = '.';

/// Rows of JSON values under named columns
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Build a table from flat records
    ///
    /// Columns appear in first-seen order; a record lacking a column gets
    /// `null` in that cell.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Map<String, Value>>,
    {
        let mut columns: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut rows: Vec<Vec<Value>> = Vec::new();

        for record in records {
            let mut row = vec![Value::Null; columns.len()];
            for (key, value) in record {
                let col = *index.entry(key.clone()).or_insert_with(|| {
                    columns.push(key);
                    columns.len() - 1
                });
                if col >= row.len() {
                    row.resize(col + 1, Value::Null);
                }
                row[col] = value;
            }
            rows.push(row);
        }

        // Rows built before later columns appeared are short
        let width = columns.len();
        for row in &mut rows {
            row.resize(width, Value::Null);
        }

        Self { columns, rows }
    }

    /// Column names in order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// All rows; each has one cell per column
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// A table with no rows or no columns holds no data
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.columns.is_empty()
    }

    /// Position of a column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of one column, top to bottom
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    /// A single cell
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Rows as column-name → value maps
    pub fn records(&self) -> impl Iterator<Item = Map<String, Value>> + '_ {
        self.rows.iter().map(|row| {
            self.columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect()
        })
    }
}

/// Flatten a parsed report document into a table
///
/// With `record_path`, the array found at that dotted path is tabulated
/// instead of the whole document. Returns `None` when there is nothing to
/// tabulate: `null`, an empty array or object, a missing record path, or
/// records that yield no columns.
pub fn flatten(document: &Value, record_path: Option<&str>) -> Option<Table> {
    let target = match record_path {
        Some(path) => select(document, path)?,
        None => document,
    };

    let records: Vec<Map<String, Value>> = match target {
        Value::Null => return None,
        Value::Array(items) => items.iter().map(to_record).collect(),
        Value::Object(map) if map.is_empty() => return None,
        other => vec![to_record(other)],
    };

    let table = Table::from_records(records);
    if table.is_empty() { None } else { Some(table) }
}

fn select<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split(SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .try_fold(document, |node, segment| node.get(segment))
}

fn to_record(item: &Value) -> Map<String, Value> {
    let mut record = Map::new();
    match item {
        Value::Object(map) => flatten_into(&mut record, None, map),
        scalar => {
            record.insert(VALUE_COLUMN.to_string(), scalar.clone());
        }
    }
    record
}

fn flatten_into(out: &mut Map<String, Value>, prefix: Option<&str>, map: &Map<String, Value>) {
    for (key, value) in map {
        let column = match prefix {
            Some(p) => format!("{p}{SEPARATOR}{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(nested) if !nested.is_empty() => {
                flatten_into(out, Some(&column), nested);
            }
            _ => {
                out.insert(column, value.clone());
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn array_of_objects_gives_one_row_each() {
        let doc = json!([
            {"asin": "B001", "sales": {"units": 3, "revenue": {"amount": 9.5, "currency": "USD"}}},
            {"asin": "B002", "sales": {"units": 1, "revenue": {"amount": 2.0, "currency": "USD"}}},
        ]);
        let table = flatten(&doc, None).unwrap();
        assert_eq!(
            table.columns(),
            &[
                "asin",
                "sales.units",
                "sales.revenue.amount",
                "sales.revenue.currency"
            ]
        );
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.get(1, "sales.units"), Some(&json!(1)));
        let asins: Vec<_> = table.column("asin").unwrap().collect();
        assert_eq!(asins, vec![&json!("B001"), &json!("B002")]);
    }

    #[test]
    fn missing_keys_are_null_and_columns_first_seen() {
        let doc = json!([{"a": 1}, {"b": 2}, {"a": 3, "c": 4}]);
        let table = flatten(&doc, None).unwrap();
        assert_eq!(table.columns(), &["a", "b", "c"]);
        assert_eq!(table.rows()[0], vec![json!(1), Value::Null, Value::Null]);
        assert_eq!(table.rows()[1], vec![Value::Null, json!(2), Value::Null]);
        assert_eq!(table.rows()[2], vec![json!(3), Value::Null, json!(4)]);
    }

    #[test]
    fn columns_keep_document_key_order() {
        let doc: Value =
            serde_json::from_str(r#"[{"zeta": 1, "alpha": 2, "mid": {"y": 3, "b": 4}}]"#).unwrap();
        let table = flatten(&doc, None).unwrap();
        assert_eq!(table.columns(), &["zeta", "alpha", "mid.y", "mid.b"]);
        assert_eq!(table.get(0, "alpha"), Some(&json!(2)));
    }

    #[test]
    fn single_object_is_one_row_with_arrays_kept() {
        let doc = json!({
            "reportSpecification": {"reportType": "GET_VENDOR_SALES_REPORT"},
            "salesByAsin": [{"asin": "B001"}]
        });
        let table = flatten(&doc, None).unwrap();
        assert_eq!(table.num_rows(), 1);
        assert_eq!(
            table.get(0, "reportSpecification.reportType"),
            Some(&json!("GET_VENDOR_SALES_REPORT"))
        );
        assert_eq!(table.get(0, "salesByAsin"), Some(&json!([{"asin": "B001"}])));
    }

    #[test]
    fn record_path_selects_nested_array() {
        let doc = json!({
            "reportSpecification": {"reportType": "GET_VENDOR_SALES_REPORT"},
            "sales": {"byAsin": [{"asin": "B001"}, {"asin": "B002"}, {"asin": "B003"}]}
        });
        let table = flatten(&doc, Some("sales.byAsin")).unwrap();
        assert_eq!(table.num_rows(), 3);
        assert_eq!(table.columns(), &["asin"]);
    }

    #[test]
    fn missing_record_path_is_absent() {
        let doc = json!({"salesByAsin": [{"asin": "B001"}]});
        assert!(flatten(&doc, Some("promotions")).is_none());
    }

    #[test]
    fn empty_documents_are_absent() {
        assert!(flatten(&Value::Null, None).is_none());
        assert!(flatten(&json!([]), None).is_none());
        assert!(flatten(&json!({}), None).is_none());
        assert!(flatten(&json!([{}, {}]), None).is_none());
    }

    #[test]
    fn scalar_items_use_value_column() {
        let table = flatten(&json!(["a", "b"]), None).unwrap();
        assert_eq!(table.columns(), &[VALUE_COLUMN]);
        assert_eq!(table.num_rows(), 2);
    }

    #[test]
    fn records_round_trip_through_maps() {
        let doc = json!([{"a": 1, "b": {"c": true}}]);
        let table = flatten(&doc, None).unwrap();
        let records: Vec<_> = table.records().collect();
        assert_eq!(records[0]["b.c"], json!(true));
        assert_eq!(records[0]["a"], json!(1));
    }
}
