//! `sysparm_*` query builder for the table API

/// List query against one table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableQuery {
    filters: Vec<String>,
    order_by: Vec<(String, bool)>,
    fields: Vec<String>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl TableQuery {
    /// Empty query (all records, server default page size)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an encoded-query clause, ANDed with previous clauses (`^`)
    pub fn filter(mut self, clause: impl Into<String>) -> Self {
        let clause = clause.into();
        if !clause.trim().is_empty() {
            self.filters.push(clause);
        }
        self
    }

    /// Sort ascending by `field`
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by.push((field.into(), false));
        self
    }

    /// Sort descending by `field`
    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by.push((field.into(), true));
        self
    }

    /// Restrict returned columns (`sysparm_fields`)
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Page size (`sysparm_limit`)
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Page offset (`sysparm_offset`)
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Encoded query: filters then `ORDERBY`/`ORDERBYDESC` clauses joined by `^`
    pub fn encoded_query(&self) -> Option<String> {
        let clauses: Vec<String> = self
            .filters
            .iter()
            .cloned()
            .chain(self.order_by.iter().map(|(field, desc)| {
                if *desc {
                    format!("ORDERBYDESC{}", field)
                } else {
                    format!("ORDERBY{}", field)
                }
            }))
            .collect();

        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join("^"))
        }
    }

    /// Query-string parameters in a stable order
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();

        if let Some(query) = self.encoded_query() {
            params.push(("sysparm_query", query));
        }
        if !self.fields.is_empty() {
            params.push(("sysparm_fields", self.fields.join(",")));
        }
        if let Some(limit) = self.limit {
            params.push(("sysparm_limit", limit.to_string()));
        }
        if let Some(offset) = self.offset {
            params.push(("sysparm_offset", offset.to_string()));
        }

        params
    }
}

/// Escape a user value for use inside an encoded query.
///
/// `^` separates clauses, so a value containing it could inject extra
/// conditions; ServiceNow expects it doubled.
pub fn escape_value(value: &str) -> String {
    value.replace('^', "^^")
}
