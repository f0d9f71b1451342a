//! Declarative table definitions for the persisted entities.
//!
//! Nothing here runs queries; `crudctl migrate` feeds the rendered DDL to the
//! database and `crudctl schema` prints it.

use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

use crate::filter::filter_where::validate_column;

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("Table '{0}' declares no primary key")]
    MissingPrimaryKey(String),

    #[error("Table '{table}' declares {count} primary keys; exactly one is required")]
    MultiplePrimaryKeys { table: String, count: usize },

    #[error("Table '{table}' declares column '{column}' more than once")]
    DuplicateColumn { table: String, column: String },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Column '{column}' cannot use default {strategy}")]
    InvalidDefault { column: String, strategy: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    BigInt,
    Integer,
    Uuid,
    Text,
    Varchar(u16),
    Boolean,
    TimestampTz,
}

impl ColumnType {
    fn to_sql(self) -> String {
        match self {
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::Uuid => "UUID".to_string(),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Varchar(len) => format!("VARCHAR({})", len),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::TimestampTz => "TIMESTAMPTZ".to_string(),
        }
    }
}

/// How the database fills a column when the insert omits it.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultStrategy {
    /// `gen_random_uuid()`, UUID columns only
    Random,
    /// identity sequence, integer columns only
    AutoIncrement,
    /// `now()`, timestamp columns only
    Now,
    Literal(Value),
}

impl DefaultStrategy {
    fn name(&self) -> &'static str {
        match self {
            DefaultStrategy::Random => "random",
            DefaultStrategy::AutoIncrement => "auto-increment",
            DefaultStrategy::Now => "now",
            DefaultStrategy::Literal(_) => "literal",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub primary_key: bool,
    pub not_null: bool,
    pub unique: bool,
    pub default: Option<DefaultStrategy>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            not_null: false,
            unique: false,
            default: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, strategy: DefaultStrategy) -> Self {
        self.default = Some(strategy);
        self
    }

    fn validate(&self) -> Result<(), SchemaError> {
        validate_column(&self.name).map_err(|_| SchemaError::InvalidIdentifier(self.name.clone()))?;
        let compatible = match &self.default {
            None | Some(DefaultStrategy::Literal(_)) => true,
            Some(DefaultStrategy::Random) => self.column_type == ColumnType::Uuid,
            Some(DefaultStrategy::AutoIncrement) => {
                matches!(self.column_type, ColumnType::BigInt | ColumnType::Integer)
            }
            Some(DefaultStrategy::Now) => self.column_type == ColumnType::TimestampTz,
        };
        if !compatible {
            return Err(SchemaError::InvalidDefault {
                column: self.name.clone(),
                strategy: self.default.as_ref().map(DefaultStrategy::name).unwrap_or("none"),
            });
        }
        Ok(())
    }

    fn to_sql(&self) -> String {
        let mut sql = format!("\"{}\" {}", self.name, self.column_type.to_sql());
        match &self.default {
            Some(DefaultStrategy::AutoIncrement) => sql += " GENERATED BY DEFAULT AS IDENTITY",
            Some(DefaultStrategy::Random) => sql += " DEFAULT gen_random_uuid()",
            Some(DefaultStrategy::Now) => sql += " DEFAULT now()",
            Some(DefaultStrategy::Literal(value)) => match value {
                Value::String(s) => sql += &format!(" DEFAULT '{}'", s.replace('\'', "''")),
                Value::Number(n) => sql += &format!(" DEFAULT {}", n),
                Value::Bool(b) => sql += &format!(" DEFAULT {}", b),
                _ => {}
            },
            None => {}
        }
        if self.primary_key {
            sql += " PRIMARY KEY";
        } else {
            if self.not_null {
                sql += " NOT NULL";
            }
            if self.unique {
                sql += " UNIQUE";
            }
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Publish row changes on the `<name>_changes` notification channel
    pub realtime: bool,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), columns: vec![], realtime: false }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn realtime(mut self) -> Self {
        self.realtime = true;
        self
    }

    pub fn notify_channel(&self) -> String {
        format!("{}_changes", self.name)
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        validate_column(&self.name).map_err(|_| SchemaError::InvalidIdentifier(self.name.clone()))?;

        let mut seen = HashSet::new();
        for column in &self.columns {
            column.validate()?;
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    table: self.name.clone(),
                    column: column.name.clone(),
                });
            }
        }

        match self.columns.iter().filter(|c| c.primary_key).count() {
            0 => Err(SchemaError::MissingPrimaryKey(self.name.clone())),
            1 => Ok(()),
            count => Err(SchemaError::MultiplePrimaryKeys { table: self.name.clone(), count }),
        }
    }

    pub fn create_sql(&self) -> Result<String, SchemaError> {
        self.validate()?;
        let columns: Vec<String> = self.columns.iter().map(|c| format!("    {}", c.to_sql())).collect();
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\n{}\n)",
            self.name,
            columns.join(",\n")
        ))
    }

    /// Trigger function and trigger publishing `{event, id}` as JSON.
    ///
    /// Only the key travels since `pg_notify` payloads are capped at 8000
    /// bytes; listeners re-read inserted and updated rows by key.
    pub fn realtime_sql(&self) -> Vec<String> {
        if !self.realtime {
            return vec![];
        }
        let key = match self.columns.iter().find(|c| c.primary_key) {
            Some(column) => column.name.as_str(),
            None => return vec![],
        };
        let function = format!("{}_notify_change", self.name);
        vec![
            format!(
                "CREATE OR REPLACE FUNCTION \"{function}\"() RETURNS trigger AS $$\n\
                 BEGIN\n\
                 \x20   PERFORM pg_notify('{channel}', json_build_object(\n\
                 \x20       'event', TG_OP,\n\
                 \x20       'id', CASE WHEN TG_OP = 'DELETE' THEN OLD.\"{key}\" ELSE NEW.\"{key}\" END\n\
                 \x20   )::text);\n\
                 \x20   RETURN NULL;\n\
                 END;\n\
                 $$ LANGUAGE plpgsql",
                function = function,
                channel = self.notify_channel(),
                key = key,
            ),
            format!("DROP TRIGGER IF EXISTS \"{}\" ON \"{}\"", function, self.name),
            format!(
                "CREATE TRIGGER \"{function}\" AFTER INSERT OR UPDATE OR DELETE ON \"{table}\" \
                 FOR EACH ROW EXECUTE FUNCTION \"{function}\"()",
                function = function,
                table = self.name,
            ),
        ]
    }

    /// Every statement needed to bring this table up, in order.
    pub fn migration_statements(&self) -> Result<Vec<String>, SchemaError> {
        let mut statements = vec![self.create_sql()?];
        statements.extend(self.realtime_sql());
        Ok(statements)
    }
}

pub fn users() -> TableSchema {
    TableSchema::new("users")
        .column(ColumnDef::new("id", ColumnType::BigInt).primary_key().default(DefaultStrategy::AutoIncrement))
        .column(ColumnDef::new("name", ColumnType::Varchar(255)).not_null())
        .column(ColumnDef::new("email", ColumnType::Varchar(255)).not_null().unique())
        .column(ColumnDef::new("age", ColumnType::Integer).not_null())
        .column(
            ColumnDef::new("married", ColumnType::Boolean)
                .not_null()
                .default(DefaultStrategy::Literal(Value::Bool(false))),
        )
        .column(ColumnDef::new("nationality", ColumnType::Varchar(255)).not_null())
}

pub fn tasks(table_name: &str) -> TableSchema {
    TableSchema::new(table_name)
        .column(ColumnDef::new("id", ColumnType::BigInt).primary_key().default(DefaultStrategy::AutoIncrement))
        .column(ColumnDef::new("title", ColumnType::Text).not_null())
        .column(ColumnDef::new("description", ColumnType::Text).not_null())
        .column(ColumnDef::new("email", ColumnType::Text).not_null())
        .column(ColumnDef::new("image_url", ColumnType::Text))
        .column(ColumnDef::new("created_at", ColumnType::TimestampTz).not_null().default(DefaultStrategy::Now))
        .realtime()
}

pub fn all(tasks_table: &str) -> Vec<TableSchema> {
    vec![users(), tasks(tasks_table)]
}
