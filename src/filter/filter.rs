use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::FilterWhere;
use super::types::{FilterData, FilterOrderInfo, Predicate, SqlResult};

/// SELECT builder over a single table.
pub struct Filter {
    table_name: String,
    where_data: Option<Predicate>,
    order_data: Vec<FilterOrderInfo>,
    limit: Option<i64>,
}

impl Filter {
    pub fn new(table_name: impl Into<String>) -> Result<Self, FilterError> {
        let table_name = table_name.into();
        Self::validate_table_name(&table_name)?;
        Ok(Self {
            table_name,
            where_data: None,
            order_data: vec![],
            limit: None,
        })
    }

    pub fn assign(&mut self, data: FilterData) -> Result<&mut Self, FilterError> {
        if let Some(where_clause) = data.where_clause { self.where_clause(where_clause); }
        if !data.order.is_empty() { self.order(data.order); }
        if let Some(limit) = data.limit { self.limit(limit)?; }
        Ok(self)
    }

    pub fn where_clause(&mut self, predicate: Predicate) -> &mut Self {
        self.where_data = Some(predicate);
        self
    }

    pub fn order(&mut self, order: Vec<FilterOrderInfo>) -> &mut Self {
        self.order_data = order;
        self
    }

    pub fn limit(&mut self, limit: i64) -> Result<&mut Self, FilterError> {
        if limit < 0 { return Err(FilterError::InvalidLimit("Limit must be non-negative".to_string())); }
        self.limit = Some(limit);
        Ok(self)
    }

    pub fn to_sql(&self) -> Result<SqlResult, FilterError> {
        let (where_clause, params) = match &self.where_data {
            Some(predicate) => FilterWhere::generate(predicate, 0)?,
            None => (String::new(), vec![]),
        };
        let order_clause = FilterOrder::generate(&self.order_data)?;
        let limit_clause = self.limit.map(|l| format!("LIMIT {}", l)).unwrap_or_default();

        let query = [
            "SELECT *".to_string(),
            format!("FROM \"{}\"", self.table_name),
            if where_clause.is_empty() { String::new() } else { format!("WHERE {}", where_clause) },
            order_clause,
            limit_clause,
        ].into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ");

        Ok(SqlResult { query, params })
    }

    fn validate_table_name(name: &str) -> Result<(), FilterError> {
        let mut chars = name.chars();
        let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(FilterError::InvalidTableName(format!("Invalid table name format: {}", name)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_full_select() {
        let mut filter = Filter::new("users").unwrap();
        filter
            .assign(FilterData {
                where_clause: Some(Predicate::or(vec![
                    Predicate::eq("married", true),
                    Predicate::gte("age", 18),
                ])),
                order: vec![FilterOrderInfo::asc("id")],
                limit: Some(10),
            })
            .unwrap();

        let sql = filter.to_sql().unwrap();
        assert_eq!(
            sql.query,
            "SELECT * FROM \"users\" WHERE (\"married\" = $1) OR (\"age\" >= $2) ORDER BY \"id\" ASC LIMIT 10"
        );
        assert_eq!(sql.params, vec![json!(true), json!(18)]);
    }

    #[test]
    fn bare_select_has_no_where() {
        let sql = Filter::new("tasks").unwrap().to_sql().unwrap();
        assert_eq!(sql.query, "SELECT * FROM \"tasks\"");
    }

    #[test]
    fn rejects_bad_table_name() {
        assert!(Filter::new("users\"; DROP").is_err());
        assert!(Filter::new("").is_err());
    }
}
