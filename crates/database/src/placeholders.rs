//! `:name` → `$n` rewriting and name-keyed binding.

use std::collections::BTreeMap;

use qd_domain::error::{Error, Result};
use qd_domain::query::Scalar;

use crate::lexer::{self, SpanKind};

/// A statement rewritten to positional markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    pub sql: String,
    /// `names[i]` is bound to `$i+1`, in first-occurrence order.
    pub names: Vec<String>,
}

/// Replace every `:identifier` in code spans with `$n`.
///
/// Each distinct identifier gets the next marker on first sight; repeated
/// occurrences reuse it. `::type` casts and anything inside literals,
/// quoted identifiers, or comments are left alone.
pub fn rewrite_named(statement: &str) -> Rewritten {
    let mut sql = String::with_capacity(statement.len());
    let mut names: Vec<String> = Vec::new();

    for span in lexer::spans(statement) {
        if span.kind != SpanKind::Code {
            sql.push_str(span.text);
            continue;
        }

        let text = span.text;
        let bytes = text.as_bytes();
        let mut copied = 0;
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] != b':' {
                i += 1;
                continue;
            }
            if bytes.get(i + 1) == Some(&b':') {
                i += 2;
                continue;
            }
            let starts_ident = bytes
                .get(i + 1)
                .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_');
            if !starts_ident {
                i += 1;
                continue;
            }

            let name_start = i + 1;
            let mut name_end = name_start;
            while name_end < bytes.len()
                && (bytes[name_end].is_ascii_alphanumeric() || bytes[name_end] == b'_')
            {
                name_end += 1;
            }
            let name = &text[name_start..name_end];

            let marker = match names.iter().position(|n| n == name) {
                Some(pos) => pos + 1,
                None => {
                    names.push(name.to_string());
                    names.len()
                }
            };

            sql.push_str(&text[copied..i]);
            sql.push('$');
            sql.push_str(&marker.to_string());
            copied = name_end;
            i = name_end;
        }
        sql.push_str(&text[copied..]);
    }

    Rewritten { sql, names }
}

/// Look up each placeholder name in `params`, in marker order.
///
/// A name with no value is a validation error. Values with no matching
/// placeholder are ignored with a warning.
pub fn bind_named<'a>(
    names: &[String],
    params: &'a BTreeMap<String, Scalar>,
) -> Result<Vec<&'a Scalar>> {
    let mut missing = Vec::new();
    let mut values = Vec::with_capacity(names.len());
    for name in names {
        match params.get(name) {
            Some(v) => values.push(v),
            None => missing.push(name.as_str()),
        }
    }
    if !missing.is_empty() {
        return Err(Error::Validation(format!(
            "no value supplied for placeholder(s): {}",
            missing
                .iter()
                .map(|n| format!(":{n}"))
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    let unused: Vec<&str> = params
        .keys()
        .filter(|k| !names.iter().any(|n| n == *k))
        .map(String::as_str)
        .collect();
    if !unused.is_empty() {
        tracing::warn!(unused = ?unused, "ignoring parameters with no matching placeholder");
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_markers_in_first_occurrence_order() {
        let r = rewrite_named(
            "SELECT * FROM deliveries WHERE status = :status AND driver_id = :driver OR status = :status",
        );
        assert_eq!(
            r.sql,
            "SELECT * FROM deliveries WHERE status = $1 AND driver_id = $2 OR status = $1"
        );
        assert_eq!(r.names, vec!["status", "driver"]);
    }

    #[test]
    fn distinct_markers_equal_distinct_names() {
        let r = rewrite_named(":a :b :a :c :b :a");
        assert_eq!(r.sql, "$1 $2 $1 $3 $2 $1");
        assert_eq!(r.names.len(), 3);
    }

    #[test]
    fn skips_casts_literals_and_comments() {
        let r = rewrite_named(
            "SELECT created_at::date, ':not_me' AS x /* :nor_me */ FROM deliveries WHERE customer_id = :customerId::uuid -- :skip",
        );
        assert_eq!(
            r.sql,
            "SELECT created_at::date, ':not_me' AS x /* :nor_me */ FROM deliveries WHERE customer_id = $1::uuid -- :skip"
        );
        assert_eq!(r.names, vec!["customerId"]);
    }

    #[test]
    fn leaves_positional_markers_and_slices_alone() {
        let r = rewrite_named("SELECT arr[1:2] FROM t WHERE id = $1");
        assert_eq!(r.sql, "SELECT arr[1:2] FROM t WHERE id = $1");
        assert!(r.names.is_empty());
    }

    #[test]
    fn binds_by_name_regardless_of_map_order() {
        let r = rewrite_named("WHERE z = :zeta AND a = :alpha");
        let mut params = BTreeMap::new();
        params.insert("alpha".to_string(), Scalar::Int(1));
        params.insert("zeta".to_string(), Scalar::Text("z".into()));
        params.insert("extra".to_string(), Scalar::Null);

        let values = bind_named(&r.names, &params).unwrap();
        assert_eq!(values, vec![&Scalar::Text("z".into()), &Scalar::Int(1)]);
    }

    #[test]
    fn missing_value_is_validation_error() {
        let r = rewrite_named("WHERE a = :alpha AND b = :beta");
        let mut params = BTreeMap::new();
        params.insert("alpha".to_string(), Scalar::Int(1));
        let err = bind_named(&r.names, &params).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        assert!(err.to_string().contains(":beta"));
    }
}
