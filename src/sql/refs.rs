//! Table reference inference from SQL text

use regex::Regex;
use sqlparser::ast::{Query, TableFactor, Visit, Visitor};
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeSet, HashSet};
use std::ops::ControlFlow;
use std::sync::OnceLock;

/// A SQL statement that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to parse SQL: {message}")]
pub struct SqlParseError {
    pub message: String,
    pub line: Option<usize>,
}

/// Collects table names; CTE aliases hide a name only inside the query that
/// defines them.
#[derive(Default)]
struct TableRefCollector {
    scopes: Vec<HashSet<String>>,
    tables: BTreeSet<String>,
}

impl TableRefCollector {
    fn is_cte(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.scopes.iter().any(|scope| scope.contains(&name))
    }
}

impl Visitor for TableRefCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        let scope = query
            .with
            .iter()
            .flat_map(|with| &with.cte_tables)
            .map(|cte| cte.alias.name.value.to_lowercase())
            .collect();
        self.scopes.push(scope);
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.scopes.pop();
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        // Table functions (`read_csv(...)`) carry args and are never refs
        if let TableFactor::Table {
            name, args: None, ..
        } = factor
        {
            if let [ident] = name.0.as_slice() {
                if !looks_like_path(&ident.value) && !self.is_cte(&ident.value) {
                    self.tables.insert(ident.value.clone());
                }
            }
        }
        ControlFlow::Continue(())
    }
}

fn looks_like_path(name: &str) -> bool {
    name.contains(['/', '\\']) || name.contains("://") || name.rsplit_once('.').is_some()
}

/// Returns the single-part table names a DuckDB query reads from, excluding
/// CTE aliases, table functions and file paths. Names are sorted and unique.
///
/// ```rust
/// use rill_graph::sql::infer_table_refs;
///
/// let refs = infer_table_refs(
///     "WITH recent AS (SELECT * FROM orders) SELECT * FROM recent JOIN customers USING (id)",
/// ).unwrap();
/// assert_eq!(refs, vec!["customers", "orders"]);
/// ```
pub fn infer_table_refs(sql: &str) -> Result<Vec<String>, SqlParseError> {
    let statements = Parser::parse_sql(&DuckDbDialect {}, sql).map_err(|e| {
        let message = e.to_string();
        SqlParseError {
            line: extract_line(&message),
            message,
        }
    })?;

    let mut collector = TableRefCollector::default();
    for statement in &statements {
        let _ = statement.visit(&mut collector);
    }

    Ok(collector.tables.into_iter().collect())
}

fn extract_line(message: &str) -> Option<usize> {
    static LINE_RE: OnceLock<Option<Regex>> = OnceLock::new();
    LINE_RE
        .get_or_init(|| Regex::new(r"Line: (\d+)").ok())
        .as_ref()?
        .captures(message)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}
