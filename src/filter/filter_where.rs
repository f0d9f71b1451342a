use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::error::FilterError;
use super::types::{FilterOp, Predicate};

pub struct FilterWhere {
    param_values: Vec<Value>,
    param_index: usize,
}

impl FilterWhere {
    pub fn new(starting_param_index: usize) -> Self {
        Self {
            param_values: vec![],
            param_index: starting_param_index,
        }
    }

    /// Render a predicate as a parameterised SQL condition. Placeholders start at
    /// `$starting_param_index + 1`.
    pub fn generate(predicate: &Predicate, starting_param_index: usize) -> Result<(String, Vec<Value>), FilterError> {
        let mut filter_where = Self::new(starting_param_index);
        let sql = filter_where.build(predicate)?;
        Ok((sql, filter_where.param_values))
    }

    fn build(&mut self, predicate: &Predicate) -> Result<String, FilterError> {
        match predicate {
            Predicate::Compare { column, op, value } => {
                validate_column(column)?;
                let quoted_column = format!("\"{}\"", column);
                match (op, value) {
                    (FilterOp::Eq, Value::Null) => Ok(format!("{} IS NULL", quoted_column)),
                    (FilterOp::Ne, Value::Null) => Ok(format!("{} IS NOT NULL", quoted_column)),
                    (_, Value::Array(_)) | (_, Value::Object(_)) => Err(FilterError::InvalidOperatorData(format!(
                        "comparison on '{}' requires a scalar value",
                        column
                    ))),
                    _ => Ok(format!("{} {} {}", quoted_column, op.to_sql(), self.param(value.clone()))),
                }
            }
            Predicate::And(parts) | Predicate::Or(parts) => {
                if parts.is_empty() {
                    // Empty AND is vacuously true, empty OR matches nothing
                    return Ok(if matches!(predicate, Predicate::And(_)) { "1=1" } else { "1=0" }.to_string());
                }
                let joiner = if matches!(predicate, Predicate::And(_)) { " AND " } else { " OR " };
                let mut sql_parts = Vec::with_capacity(parts.len());
                for part in parts {
                    sql_parts.push(format!("({})", self.build(part)?));
                }
                Ok(sql_parts.join(joiner))
            }
        }
    }

    fn param(&mut self, value: Value) -> String {
        self.param_values.push(value);
        self.param_index += 1;
        format!("${}", self.param_index)
    }

    /// Evaluate a predicate against a JSON record, with SQL-like null handling:
    /// an ordered comparison involving null is false.
    pub fn matches(predicate: &Predicate, record: &Map<String, Value>) -> bool {
        match predicate {
            Predicate::Compare { column, op, value } => {
                let actual = record.get(column).unwrap_or(&Value::Null);
                match (op, value) {
                    (FilterOp::Eq, Value::Null) => actual.is_null(),
                    (FilterOp::Ne, Value::Null) => !actual.is_null(),
                    _ => match compare_values(actual, value) {
                        Some(ordering) => match op {
                            FilterOp::Eq => ordering == Ordering::Equal,
                            FilterOp::Ne => ordering != Ordering::Equal,
                            FilterOp::Gt => ordering == Ordering::Greater,
                            FilterOp::Gte => ordering != Ordering::Less,
                            FilterOp::Lt => ordering == Ordering::Less,
                            FilterOp::Lte => ordering != Ordering::Greater,
                        },
                        None => false,
                    },
                }
            }
            Predicate::And(parts) => parts.iter().all(|p| Self::matches(p, record)),
            Predicate::Or(parts) => parts.iter().any(|p| Self::matches(p, record)),
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

pub(crate) fn validate_column(column: &str) -> Result<(), FilterError> {
    let mut chars = column.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(FilterError::InvalidColumn(format!("Invalid column name format: {}", column)));
    }
    Ok(())
}
