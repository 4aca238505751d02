//! Table queries and filter predicates.

use serde_json::Value;

/// Row predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Neq(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    /// Case-insensitive pattern, `%` matches any sequence.
    ILike(String, String),
    In(String, Vec<Value>),
    /// Array column sharing at least one element with the list.
    Overlaps(String, Vec<Value>),
    IsNull(String),
    NotNull(String),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    pub fn neq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Neq(column.into(), value.into())
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte(column.into(), value.into())
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte(column.into(), value.into())
    }

    /// Column contains `needle`, ignoring case.
    pub fn contains(column: impl Into<String>, needle: &str) -> Self {
        Self::ILike(column.into(), format!("%{}%", needle.trim()))
    }

    pub fn is_in<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    /// Encode as a `(key, value)` query parameter understood by PostgREST.
    pub fn to_param(&self) -> (String, String) {
        match self {
            Self::Eq(column, value) => (column.clone(), format!("eq.{}", literal(value))),
            Self::Neq(column, value) => (column.clone(), format!("neq.{}", literal(value))),
            Self::Gt(column, value) => (column.clone(), format!("gt.{}", literal(value))),
            Self::Gte(column, value) => (column.clone(), format!("gte.{}", literal(value))),
            Self::Lt(column, value) => (column.clone(), format!("lt.{}", literal(value))),
            Self::Lte(column, value) => (column.clone(), format!("lte.{}", literal(value))),
            Self::ILike(column, pattern) => (column.clone(), format!("ilike.{pattern}")),
            Self::In(column, values) => (column.clone(), format!("in.({})", list(values))),
            Self::Overlaps(column, values) => {
                (column.clone(), format!("ov.{{{}}}", list(values)))
            },
            Self::IsNull(column) => (column.clone(), "is.null".to_owned()),
            Self::NotNull(column) => (column.clone(), "not.is.null".to_owned()),
            Self::Or(filters) => (
                "or".to_owned(),
                format!(
                    "({})",
                    filters.iter().map(Self::to_inline).collect::<Vec<_>>().join(",")
                ),
            ),
        }
    }

    /// Encoding used inside an `or=(...)` group.
    fn to_inline(&self) -> String {
        let (key, value) = match self {
            Self::Eq(column, value) => (column.clone(), format!("eq.{}", quoted(value))),
            Self::Neq(column, value) => (column.clone(), format!("neq.{}", quoted(value))),
            Self::Gt(column, value) => (column.clone(), format!("gt.{}", quoted(value))),
            Self::Gte(column, value) => (column.clone(), format!("gte.{}", quoted(value))),
            Self::Lt(column, value) => (column.clone(), format!("lt.{}", quoted(value))),
            Self::Lte(column, value) => (column.clone(), format!("lte.{}", quoted(value))),
            Self::ILike(column, pattern) => (
                column.clone(),
                format!("ilike.{}", quoted(&Value::String(pattern.clone()))),
            ),
            _ => self.to_param(),
        };

        if key == "or" {
            format!("or{value}")
        } else {
            format!("{key}.{value}")
        }
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Literal safe to place inside a PostgREST list or logical group.
fn quoted(value: &Value) -> String {
    match value {
        Value::String(s)
            if s.chars().any(|c| matches!(c, ',' | '(' | ')' | '{' | '}' | '"' | ' ')) =>
        {
            format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
        },
        other => literal(other),
    }
}

fn list(values: &[Value]) -> String {
    values.iter().map(quoted).collect::<Vec<_>>().join(",")
}

/// Sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Select query on one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl Query {
    /// Select every column of `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: "*".to_owned(),
            filters: Vec::new(),
            order: Vec::new(),
            offset: None,
            limit: None,
        }
    }

    /// Restrict returned columns, comma separated.
    pub fn columns(mut self, columns: &str) -> Self {
        self.columns = columns.to_owned();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_owned(),
            ascending,
        });
        self
    }

    pub fn range(mut self, offset: usize, limit: usize) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    /// Query string understood by PostgREST.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_owned(), self.columns.clone())];
        params.extend(self.filters.iter().map(Filter::to_param));

        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|o| {
                    format!(
                        "{}.{}.nullslast",
                        o.column,
                        if o.ascending { "asc" } else { "desc" }
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".to_owned(), order));
        }
        if let Some(offset) = self.offset {
            params.push(("offset".to_owned(), offset.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_owned(), limit.to_string()));
        }

        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn param(key: &str, value: &str) -> (String, String) {
        (key.to_owned(), value.to_owned())
    }

    #[test]
    fn test_simple_filters() {
        assert_eq!(Filter::eq("tier", "ULTRA").to_param(), param("tier", "eq.ULTRA"));
        assert_eq!(Filter::neq("is_club", true).to_param(), param("is_club", "neq.true"));
        assert_eq!(Filter::gte("age", 21).to_param(), param("age", "gte.21"));
        assert_eq!(
            Filter::contains("location", " Zürich ").to_param(),
            param("location", "ilike.%Zürich%")
        );
        assert_eq!(
            Filter::IsNull("deleted_at".into()).to_param(),
            param("deleted_at", "is.null")
        );
    }

    #[test]
    fn test_lists_are_quoted() {
        assert_eq!(
            Filter::is_in("id", ["a", "b c"]).to_param(),
            param("id", "in.(a,\"b c\")")
        );
        assert_eq!(
            Filter::Overlaps("languages".into(), vec![json!("de"), json!("fr")]).to_param(),
            param("languages", "ov.{de,fr}")
        );
    }

    #[test]
    fn test_or_group() {
        let filter = Filter::Or(vec![
            Filter::contains("service_name", "dinner, date"),
            Filter::eq("rating", 5),
            Filter::Or(vec![Filter::IsNull("price".into()), Filter::lte("age", 30)]),
        ]);

        assert_eq!(
            filter.to_param(),
            param(
                "or",
                "(service_name.ilike.\"%dinner, date%\",rating.eq.5,or(price.is.null,age.lte.30))"
            )
        );
    }

    #[test]
    fn test_query_params() {
        let query = Query::table("profiles")
            .columns("id,name")
            .filter(Filter::eq("verified", true))
            .order("rating", false)
            .order("loves", false)
            .range(20, 10);

        assert_eq!(
            query.to_params(),
            vec![
                param("select", "id,name"),
                param("verified", "eq.true"),
                param("order", "rating.desc.nullslast,loves.desc.nullslast"),
                param("offset", "20"),
                param("limit", "10"),
            ]
        );
    }
}
