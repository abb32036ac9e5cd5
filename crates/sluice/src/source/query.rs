//! Query roles and placeholder templating.
//!
//! A source's `queries` mapping holds SQL text per role (`extract`, `iterate`,
//! ...) and, optionally, a `<role>_params` mapping of scalar values that are
//! substituted into that role's `{name}` placeholders.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SluiceError};

/// Suffix marking a placeholder mapping for a role.
pub const PARAMS_SUFFIX: &str = "_params";

/// A scalar placeholder value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

/// One entry of the `queries` mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryEntry {
    Sql(String),
    Params(BTreeMap<String, ParamValue>),
}

/// The `queries` mapping of a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuerySet {
    entries: BTreeMap<String, QueryEntry>,
}

impl QuerySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the SQL text of a role.
    pub fn with_sql(mut self, role: impl Into<String>, sql: impl Into<String>) -> Self {
        self.entries.insert(role.into(), QueryEntry::Sql(sql.into()));
        self
    }

    /// Add (or replace) the placeholder mapping of a role.
    pub fn with_params<I, K, V>(mut self, role: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let params = params
            .into_iter()
            .map(|(k, v)| (k.into(), ParamValue::Text(v.into())))
            .collect();
        self.entries
            .insert(format!("{role}{PARAMS_SUFFIX}"), QueryEntry::Params(params));
        self
    }

    /// True if `role` has SQL text.
    pub fn contains(&self, role: &str) -> bool {
        matches!(self.entries.get(role), Some(QueryEntry::Sql(_)))
    }

    /// Roles that carry SQL text, sorted.
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|(k, v)| match v {
            QueryEntry::Sql(_) => Some(k.as_str()),
            QueryEntry::Params(_) => None,
        })
    }

    /// Raw SQL text of a role, placeholders untouched.
    pub fn sql(&self, role: &str) -> Result<&str> {
        match self.entries.get(role) {
            Some(QueryEntry::Sql(sql)) => Ok(sql),
            _ => Err(SluiceError::QueryNotFound(role.to_string())),
        }
    }

    /// The `<role>_params` mapping rendered as text, if configured.
    pub fn params(&self, role: &str) -> Option<BTreeMap<String, String>> {
        match self.entries.get(&format!("{role}{PARAMS_SUFFIX}")) {
            Some(QueryEntry::Params(map)) => Some(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_string()))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Resolve a role to executable SQL.
    ///
    /// With a sibling `<role>_params` mapping every placeholder is substituted;
    /// without one the text is returned as written.
    pub fn get_query(&self, role: &str) -> Result<String> {
        let sql = self.sql(role)?;
        match self.params(role) {
            Some(params) => render(role, sql, &params),
            None => Ok(sql.to_string()),
        }
    }
}

/// Substitute `{name}` placeholders from `params`.
///
/// `{{` and `}}` are literal braces. Anything after `:` or `!` inside a
/// placeholder is ignored. A name absent from `params` is a
/// [`SluiceError::MissingPlaceholder`] naming `role`.
pub fn render(role: &str, template: &str, params: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                out.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let rest = &template[start + 1..];
                let end = rest.find('}').ok_or_else(|| {
                    SluiceError::Config(format!(
                        "unterminated placeholder in query '{}' at byte {}",
                        role, start
                    ))
                })?;
                let field = &rest[..end];
                let name = field
                    .split([':', '!'])
                    .next()
                    .unwrap_or("")
                    .trim();
                let value = params.get(name).ok_or_else(|| SluiceError::MissingPlaceholder {
                    placeholder: name.to_string(),
                    query: role.to_string(),
                })?;
                out.push_str(value);
                // Skip the placeholder body and its closing brace.
                while let Some((i, _)) = chars.peek() {
                    if *i > start + end + 1 {
                        break;
                    }
                    chars.next();
                }
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_named_placeholders() {
        let sql = render(
            "extract",
            "SELECT * FROM t WHERE batch_id={id} AND day='{day}'",
            &params(&[("id", "7"), ("day", "2024-01-01")]),
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE batch_id=7 AND day='2024-01-01'");
    }

    #[test]
    fn test_render_escapes_and_format_spec() {
        let sql = render(
            "extract",
            "SELECT '{{json}}', {n:>5}, {n!r}",
            &params(&[("n", "3")]),
        )
        .unwrap();
        assert_eq!(sql, "SELECT '{json}', 3, 3");
    }

    #[test]
    fn test_render_multibyte_text() {
        let sql = render("q", "SELECT 'ü{a}é'", &params(&[("a", "ß")])).unwrap();
        assert_eq!(sql, "SELECT 'üßé'");
    }

    #[test]
    fn test_render_missing_placeholder() {
        let err = render("extract", "SELECT {id}, {day}", &params(&[("id", "1")])).unwrap_err();
        match err {
            SluiceError::MissingPlaceholder { placeholder, query } => {
                assert_eq!(placeholder, "day");
                assert_eq!(query, "extract");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_render_unterminated() {
        assert!(render("q", "SELECT {id", &params(&[("id", "1")])).is_err());
    }

    #[test]
    fn test_get_query_substitutes_params() {
        let yaml = r#"
extract: SELECT * FROM sales WHERE region = '{region}' AND year = {year}
extract_params:
  region: EMEA
  year: 2024
"#;
        let queries: QuerySet = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            queries.get_query("extract").unwrap(),
            "SELECT * FROM sales WHERE region = 'EMEA' AND year = 2024"
        );
        assert_eq!(queries.roles().collect::<Vec<_>>(), vec!["extract"]);
    }

    #[test]
    fn test_get_query_without_params_is_verbatim() {
        let queries = QuerySet::new().with_sql("extract", "SELECT {raw}");
        assert_eq!(queries.get_query("extract").unwrap(), "SELECT {raw}");
    }

    #[test]
    fn test_get_query_not_found() {
        let queries = QuerySet::new().with_sql("extract", "SELECT 1");
        assert!(matches!(
            queries.get_query("iterate"),
            Err(SluiceError::QueryNotFound(role)) if role == "iterate"
        ));
        // A params mapping is not itself a query.
        let queries = queries.with_params("load", [("a", "b")]);
        assert!(!queries.contains("load_params"));
    }
}
