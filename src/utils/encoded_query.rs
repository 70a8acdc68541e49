/// Escapes a literal value for use inside a ServiceNow encoded query, where a
/// bare `^` separates conditions.
pub fn escape_value(value: &str) -> String {
    value.replace('^', "^^")
}

/// Accumulates encoded-query conditions joined with `^`. Ordering clauses are
/// always emitted after the filters.
#[derive(Debug, Clone, Default)]
pub struct EncodedQuery {
    conditions: Vec<String>,
    ordering: Vec<String>,
}

impl EncodedQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(mut self, clause: Option<&str>) -> Self {
        if let Some(clause) = clause.map(str::trim).filter(|c| !c.is_empty()) {
            self.conditions.push(clause.to_string());
        }
        self
    }

    pub fn eq(mut self, field: &str, value: &str) -> Self {
        self.conditions.push(format!("{}={}", field, escape_value(value)));
        self
    }

    pub fn like(mut self, field: &str, value: &str) -> Self {
        self.conditions.push(format!("{}LIKE{}", field, escape_value(value)));
        self
    }

    pub fn gte(mut self, field: &str, value: &str) -> Self {
        self.conditions.push(format!("{}>={}", field, escape_value(value)));
        self
    }

    pub fn one_of(mut self, field: &str, values: &[&str]) -> Self {
        let joined = values
            .iter()
            .map(|v| escape_value(v))
            .collect::<Vec<_>>()
            .join(",");
        self.conditions.push(format!("{}IN{}", field, joined));
        self
    }

    pub fn order_by(mut self, field: &str, descending: bool) -> Self {
        let keyword = if descending { "ORDERBYDESC" } else { "ORDERBY" };
        self.ordering.push(format!("{}{}", keyword, field));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.ordering.is_empty()
    }

    pub fn build(&self) -> String {
        self.conditions
            .iter()
            .chain(self.ordering.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join("^")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_caret_in_values() {
        assert_eq!(escape_value("a^b"), "a^^b");
        let query = EncodedQuery::new().like("message", "x^y").build();
        assert_eq!(query, "messageLIKEx^^y");
    }

    #[test]
    fn ordering_follows_filters() {
        let query = EncodedQuery::new()
            .order_by("sys_created_on", true)
            .raw(Some("active=true"))
            .eq("level", "2")
            .build();
        assert_eq!(query, "active=true^level=2^ORDERBYDESCsys_created_on");
    }

    #[test]
    fn blank_raw_clause_is_ignored() {
        let query = EncodedQuery::new().raw(Some("  ")).raw(None);
        assert!(query.is_empty());
        assert_eq!(query.build(), "");
    }
}
