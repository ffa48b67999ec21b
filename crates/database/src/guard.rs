//! Statement filter applied before anything reaches the database.

use std::ops::ControlFlow;

use sqlparser::ast::{Query, SetExpr, Statement, Visit, Visitor};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use qd_domain::config::GuardMode;
use qd_domain::error::{Error, Result};

use crate::placeholders;

/// Substrings rejected by [`GuardMode::Keyword`], matched case-insensitively.
///
/// This is a lexical filter over the raw text: it rejects harmless
/// identifiers such as `updated_at` and misses statements that reach the
/// same effect through other verbs.
pub const BLOCKED_KEYWORDS: [&str; 5] = ["drop", "truncate", "delete", "update", "insert"];

#[derive(Debug, Clone, Copy)]
pub struct QueryGuard {
    mode: GuardMode,
}

impl QueryGuard {
    pub fn new(mode: GuardMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> GuardMode {
        self.mode
    }

    /// Accept or reject `statement`. Never touches the database.
    pub fn validate(&self, statement: &str) -> Result<()> {
        if statement.trim().is_empty() {
            return Err(Error::Validation("statement is empty".into()));
        }
        match self.mode {
            GuardMode::Off => Ok(()),
            GuardMode::Keyword => check_keywords(statement),
            GuardMode::ReadOnly => check_read_only(statement),
        }
    }
}

fn check_keywords(statement: &str) -> Result<()> {
    let lowered = statement.to_lowercase();
    match BLOCKED_KEYWORDS.iter().find(|kw| lowered.contains(*kw)) {
        Some(kw) => Err(Error::Validation(format!(
            "statement contains disallowed keyword '{kw}'"
        ))),
        None => Ok(()),
    }
}

/// Parse the statement and accept only a single read.
///
/// Function calls with side effects still pass; `read_only_transactions`
/// covers those at the database.
fn check_read_only(statement: &str) -> Result<()> {
    // `:name` is not PostgreSQL syntax, so parse the `$n` form.
    let sql = placeholders::rewrite_named(statement).sql;
    let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, &sql)
        .map_err(|e| Error::Validation(format!("SQL parse error: {e}")))?;
    if statements.len() != 1 {
        return Err(Error::Validation(format!(
            "expected exactly one statement, found {}",
            statements.len()
        )));
    }

    let parsed = statements.remove(0);
    let query = match &parsed {
        Statement::Query(_) => &parsed,
        Statement::Explain { statement, .. } if matches!(**statement, Statement::Query(_)) => {
            statement.as_ref()
        }
        Statement::ShowVariable { .. } => return Ok(()),
        other => {
            return Err(Error::Validation(format!(
                "only read statements are allowed, got '{}'",
                leading_keyword(other)
            )))
        }
    };

    match query.visit(&mut WriteFinder) {
        ControlFlow::Break(reason) => Err(Error::Validation(format!(
            "read-only statement {reason}"
        ))),
        ControlFlow::Continue(()) => Ok(()),
    }
}

fn leading_keyword(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

/// Walks every query in the tree, CTEs and subqueries included.
struct WriteFinder;

impl Visitor for WriteFinder {
    type Break = &'static str;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if !query.locks.is_empty() {
            return ControlFlow::Break("takes row locks");
        }
        find_write(&query.body)
    }
}

fn find_write(body: &SetExpr) -> ControlFlow<&'static str> {
    match body {
        SetExpr::Insert(_) | SetExpr::Update(_) => ControlFlow::Break("modifies data"),
        SetExpr::Select(select) if select.into.is_some() => {
            ControlFlow::Break("creates a table with SELECT INTO")
        }
        SetExpr::SetOperation { left, right, .. } => match find_write(left) {
            ControlFlow::Continue(()) => find_write(right),
            found => found,
        },
        _ => ControlFlow::Continue(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyword() -> QueryGuard {
        QueryGuard::new(GuardMode::Keyword)
    }

    fn read_only() -> QueryGuard {
        QueryGuard::new(GuardMode::ReadOnly)
    }

    #[test]
    fn keyword_rejects_every_case_variant() {
        for stmt in [
            "DROP TABLE deliveries",
            "drop table deliveries",
            "DeLeTe FROM customers",
            "UPDATE drivers SET status = 'busy'",
            "insert into customers values (1)",
            "TRUNCATE deliveries",
        ] {
            let err = keyword().validate(stmt).unwrap_err();
            assert_eq!(err.kind(), "ValidationError", "{stmt}");
        }
    }

    #[test]
    fn keyword_is_a_substring_match() {
        // Known over-rejection: the column name contains "update".
        assert!(keyword()
            .validate("SELECT updated_at FROM deliveries")
            .is_err());
        assert!(keyword()
            .validate("SELECT * FROM deliveries WHERE status = 'pending'")
            .is_ok());
    }

    #[test]
    fn off_accepts_anything_non_empty() {
        let guard = QueryGuard::new(GuardMode::Off);
        assert!(guard.validate("DELETE FROM deliveries").is_ok());
        assert!(guard.validate("   ").is_err());
    }

    #[test]
    fn read_only_accepts_reads() {
        for stmt in [
            "SELECT updated_at FROM deliveries",
            "  with d AS (SELECT * FROM deliveries) SELECT count(*) FROM d;",
            "SELECT * FROM customers WHERE name = 'Robert''); DROP TABLE x; --'",
            "EXPLAIN SELECT 1",
            "-- leading comment\nSELECT 1",
            "SELECT id, copy FROM documents",
            "SELECT lock, call FROM drivers",
            "SELECT * FROM deliveries WHERE status = :status AND created_at > :since::date",
            "SELECT name FROM drivers UNION SELECT name FROM customers",
            "VALUES (1), (2)",
            "SHOW search_path",
        ] {
            assert!(read_only().validate(stmt).is_ok(), "{stmt}");
        }
    }

    #[test]
    fn read_only_names_the_rejected_verb() {
        let err = read_only()
            .validate("UPDATE drivers SET status = 'offline'")
            .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        assert!(err.to_string().contains("'UPDATE'"), "{err}");
    }

    #[test]
    fn read_only_rejects_writes_and_stacking() {
        for stmt in [
            "DELETE FROM deliveries",
            "SELECT 1; DROP TABLE deliveries",
            "WITH gone AS (DELETE FROM deliveries RETURNING *) SELECT * FROM gone",
            "SELECT * INTO backup FROM deliveries",
            "/* SELECT */ UPDATE drivers SET status = 'offline'",
            "WITH moved AS (UPDATE drivers SET status = 'busy' RETURNING *) SELECT * FROM moved",
            "SELECT * FROM deliveries FOR UPDATE",
            "EXPLAIN DELETE FROM deliveries",
            "COPY deliveries TO '/tmp/out.csv'",
            "-- only a comment",
            "SELECT * FROM (",
        ] {
            assert!(read_only().validate(stmt).is_err(), "{stmt}");
        }
    }
}
