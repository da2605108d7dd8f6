//! Table, filter and selection types for record operations

use std::cmp::Ordering;
use std::fmt;

use regex::Regex;
use serde_json::Value;

/// Tables of the remote record store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Profiles,
    Resources,
    Reviews,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::Resources => "resources",
            Table::Reviews => "reviews",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single condition on a column
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Column equals the value
    Eq(String, Value),
    /// Case-insensitive pattern match where `%` matches any run of characters
    ILike(String, String),
    /// Column equals one of the values
    In(String, Vec<Value>),
}

/// Conjunction of predicates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.predicates
            .push(Predicate::Eq(column.to_string(), value.into()));
        self
    }

    pub fn ilike(mut self, column: &str, pattern: impl Into<String>) -> Self {
        self.predicates
            .push(Predicate::ILike(column.to_string(), pattern.into()));
        self
    }

    /// Case-insensitive substring match
    pub fn contains(self, column: &str, needle: &str) -> Self {
        self.ilike(column, format!("%{}%", needle))
    }

    pub fn is_in<I, V>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.predicates.push(Predicate::In(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Evaluate the filter against a JSON row
    pub fn matches(&self, row: &Value) -> bool {
        self.predicates.iter().all(|predicate| match predicate {
            Predicate::Eq(column, value) => row.get(column).unwrap_or(&Value::Null) == value,
            Predicate::ILike(column, pattern) => match row.get(column) {
                Some(Value::String(text)) => like_regex(pattern).is_match(text),
                _ => false,
            },
            Predicate::In(column, values) => row
                .get(column)
                .map(|value| values.contains(value))
                .unwrap_or(false),
        })
    }

    /// Encode the filter as REST query parameters
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        self.predicates
            .iter()
            .map(|predicate| match predicate {
                Predicate::Eq(column, Value::Null) => (column.clone(), "is.null".to_string()),
                Predicate::Eq(column, value) => {
                    (column.clone(), format!("eq.{}", plain_value(value)))
                }
                Predicate::ILike(column, pattern) => {
                    (column.clone(), format!("ilike.{}", pattern))
                }
                Predicate::In(column, values) => {
                    let list = values
                        .iter()
                        .map(|value| format!("\"{}\"", plain_value(value).replace('"', "\\\"")))
                        .collect::<Vec<_>>()
                        .join(",");
                    (column.clone(), format!("in.({})", list))
                }
            })
            .collect()
    }
}

fn plain_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn like_regex(pattern: &str) -> Regex {
    let body = pattern
        .split('%')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    // escaped input always compiles
    Regex::new(&format!("(?is)^{}$", body)).expect("escaped pattern is a valid regex")
}

/// Count mode for selections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    Exact,
}

/// Ordering on one column
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A select request
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: Table,
    /// Comma separated projection, `*` for every column
    pub columns: String,
    pub filter: Filter,
    pub order: Vec<Order>,
    pub count: Option<CountMode>,
    /// Only count, do not return rows
    pub head: bool,
}

impl Select {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            columns: "*".to_string(),
            filter: Filter::new(),
            order: Vec::new(),
            count: None,
            head: false,
        }
    }

    pub fn columns(mut self, columns: &str) -> Self {
        self.columns = columns.to_string();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn newest_first(self) -> Self {
        self.order_by("created_at", false)
    }

    /// Count matching rows without fetching them
    pub fn count_only(mut self) -> Self {
        self.count = Some(CountMode::Exact);
        self.head = true;
        self
    }

    /// Encode the ordering as a REST `order` parameter
    pub fn order_param(&self) -> Option<String> {
        if self.order.is_empty() {
            return None;
        }
        Some(
            self.order
                .iter()
                .map(|order| {
                    let direction = if order.ascending { "asc" } else { "desc" };
                    format!("{}.{}", order.column, direction)
                })
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    /// Compare two rows by this selection's ordering
    pub fn compare(&self, left: &Value, right: &Value) -> Ordering {
        for order in &self.order {
            let a = left.get(&order.column).unwrap_or(&Value::Null);
            let b = right.get(&order.column).unwrap_or(&Value::Null);
            let ordering = compare_values(a, b);
            let ordering = if order.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Keep only the projected columns of a row
    pub fn project(&self, row: &Value) -> Value {
        if self.columns.trim() == "*" {
            return row.clone();
        }
        let mut projected = serde_json::Map::new();
        for column in self.columns.split(',').map(str::trim) {
            if let Some(value) = row.get(column) {
                projected.insert(column.to_string(), value.clone());
            }
        }
        Value::Object(projected)
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// Rows returned by a select, plus the exact count when requested
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub rows: Vec<Value>,
    pub count: Option<u64>,
}
