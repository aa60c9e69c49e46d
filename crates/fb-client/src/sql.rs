//! SQL text rewriting.
//!
//! The server only understands positional `?` placeholders. Statements may
//! use `@name` placeholders instead; they are replaced here before the text
//! is prepared, and the names are kept in order so values can be mapped to
//! slots by name.

use std::borrow::Cow;

/// SQL text with named placeholders replaced by `?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenSql<'a> {
    /// Text to send to the server.
    pub sql: Cow<'a, str>,
    /// Placeholder names in slot order, each with its `@` prefix. A name
    /// appears once per occurrence.
    pub names: Vec<String>,
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Replace every `@identifier` outside single-quoted literals with `?`.
///
/// Text without `@` is returned borrowed without scanning.
#[must_use]
pub fn rewrite_named_parameters(sql: &str) -> RewrittenSql<'_> {
    if !sql.contains('@') {
        return RewrittenSql {
            sql: Cow::Borrowed(sql),
            names: Vec::new(),
        };
    }

    let mut out = String::with_capacity(sql.len());
    let mut names = Vec::new();
    let mut in_literal = false;
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if in_literal {
            out.push(c);
            // A doubled quote closes and reopens the literal.
            if c == '\'' {
                in_literal = false;
            }
            continue;
        }

        match c {
            '\'' => {
                in_literal = true;
                out.push(c);
            }
            '@' => {
                let start = i + c.len_utf8();
                let mut end = start;
                while let Some(&(j, next)) = chars.peek() {
                    if !is_identifier_char(next) {
                        break;
                    }
                    end = j + next.len_utf8();
                    chars.next();
                }
                if end == start {
                    out.push('@');
                } else {
                    names.push(format!("@{}", &sql[start..end]));
                    out.push('?');
                }
            }
            _ => out.push(c),
        }
    }

    RewrittenSql {
        sql: Cow::Owned(out),
        names,
    }
}

/// Build the statement text that calls a stored procedure.
///
/// `params` are the names of the input parameters in declaration order.
/// Procedures that return a result set are called with `select * from`,
/// others with `execute procedure`. Text that is already a call is
/// returned unchanged.
#[must_use]
pub fn procedure_call_text(procedure: &str, params: &[&str], returns_set: bool) -> String {
    let procedure = procedure.trim();
    let lower = procedure.to_ascii_lowercase();
    if lower.starts_with("execute procedure ") || lower.starts_with("select ") {
        return procedure.to_owned();
    }

    let mut sql = if returns_set {
        format!("select * from {procedure}")
    } else {
        format!("execute procedure {procedure}")
    };

    if !params.is_empty() {
        let all_named = params.iter().all(|p| !p.is_empty());
        let list: Vec<String> = params
            .iter()
            .map(|p| match (all_named, p.starts_with('@')) {
                (false, _) => "?".to_owned(),
                (true, true) => (*p).to_owned(),
                (true, false) => format!("@{p}"),
            })
            .collect();
        sql.push('(');
        sql.push_str(&list.join(", "));
        sql.push(')');
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_is_not_rewritten() {
        let rewritten =
            rewrite_named_parameters("SELECT * FROM t WHERE a=@x AND b='lit@not_a_param'");
        assert_eq!(
            rewritten.sql,
            "SELECT * FROM t WHERE a=? AND b='lit@not_a_param'"
        );
        assert_eq!(rewritten.names, vec!["@x"]);
    }

    #[test]
    fn test_repeated_names_keep_order() {
        let rewritten = rewrite_named_parameters("UPDATE t SET a=@a, b=@b WHERE a<>@a");
        assert_eq!(rewritten.sql, "UPDATE t SET a=?, b=? WHERE a<>?");
        assert_eq!(rewritten.names, vec!["@a", "@b", "@a"]);
    }

    #[test]
    fn test_no_at_sign_is_borrowed() {
        let rewritten = rewrite_named_parameters("SELECT 1 FROM rdb$database");
        assert!(matches!(rewritten.sql, Cow::Borrowed(_)));
        assert!(rewritten.names.is_empty());
    }

    #[test]
    fn test_bare_at_sign_kept() {
        let rewritten = rewrite_named_parameters("SELECT '@' || @ FROM t WHERE x = @x_1$");
        assert_eq!(rewritten.sql, "SELECT '@' || @ FROM t WHERE x = ?");
        assert_eq!(rewritten.names, vec!["@x_1$"]);
    }

    #[test]
    fn test_doubled_quote_inside_literal() {
        let rewritten = rewrite_named_parameters("SELECT 'it''s @here' FROM t WHERE a=@a");
        assert_eq!(rewritten.sql, "SELECT 'it''s @here' FROM t WHERE a=?");
        assert_eq!(rewritten.names, vec!["@a"]);
    }

    #[test]
    fn test_procedure_call_text() {
        assert_eq!(
            procedure_call_text("add_order", &["@customer", "qty"], false),
            "execute procedure add_order(@customer, @qty)"
        );
        assert_eq!(
            procedure_call_text("list_orders", &[], true),
            "select * from list_orders"
        );
        assert_eq!(
            procedure_call_text("mixed", &["a", ""], false),
            "execute procedure mixed(?, ?)"
        );
        assert_eq!(
            procedure_call_text("EXECUTE PROCEDURE p(1)", &["a"], false),
            "EXECUTE PROCEDURE p(1)"
        );
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn text_without_at_is_unchanged(sql in "[a-zA-Z0-9 ,=*'?()]{0,60}") {
                let rewritten = rewrite_named_parameters(&sql);
                prop_assert_eq!(&*rewritten.sql, sql.as_str());
                prop_assert!(rewritten.names.is_empty());
            }

            #[test]
            fn every_name_becomes_one_placeholder(sql in "[a-z0-9 ,=@]{0,60}") {
                let rewritten = rewrite_named_parameters(&sql);
                let before = sql.matches('?').count();
                let after = rewritten.sql.matches('?').count();
                prop_assert_eq!(after - before, rewritten.names.len());

                let mut chars = rewritten.sql.chars().peekable();
                while let Some(c) = chars.next() {
                    if c == '@' {
                        let next = chars.peek().copied();
                        prop_assert!(!next.is_some_and(is_identifier_char));
                    }
                }
            }

            #[test]
            fn rewrite_is_idempotent(sql in "[a-z0-9 ,=@']{0,60}") {
                let once = rewrite_named_parameters(&sql).sql.into_owned();
                let twice = rewrite_named_parameters(&once);
                prop_assert_eq!(&*twice.sql, once.as_str());
                prop_assert!(twice.names.is_empty());
            }
        }
    }
}
