//! Built-in demo grammars for the binary.
//!
//! Real workloads construct their own grammars through [`rqg_grammar`];
//! these exist so `rqg --grammar smoke` works out of the box.

use rqg_grammar::dsl::*;
use rqg_grammar::{ColumnFilter, Grammar, GrammarBuilder, TableFilter};

/// Look up a built-in grammar by name.
pub fn builtin(name: &str) -> Option<Grammar> {
    match name {
        "smoke" => Some(smoke()),
        "ddl_churn" => Some(ddl_churn()),
        _ => None,
    }
}

/// Names of the built-in grammars.
pub fn builtin_names() -> &'static [&'static str] {
    &["smoke", "ddl_churn"]
}

/// Schema-aware DML mix; falls back to default identifiers when no schema
/// is loaded.
fn smoke() -> Grammar {
    GrammarBuilder::new("smoke")
        .rule(
            "query",
            weighted(vec![
                (5, rule_ref("select")),
                (3, rule_ref("insert")),
                (2, rule_ref("update")),
                (1, rule_ref("delete")),
            ]),
        )
        .rule(
            "select",
            t(
                "SELECT {cols} FROM {tab} WHERE {col} {op} {val}{order};",
                vec![
                    ("cols", repeat(field(ColumnFilter::Any), 1, 3, ", ")),
                    ("tab", table(TableFilter::Any)),
                    ("col", field(ColumnFilter::Numeric)),
                    ("order", maybe(lit(" ORDER BY 1"), 0.3)),
                ],
            ),
        )
        .rule(
            "insert",
            t(
                "INSERT INTO {tab} ({col}) VALUES ({vals});",
                vec![
                    ("tab", table(TableFilter::Any)),
                    ("col", field(ColumnFilter::Numeric)),
                    ("vals", repeat(number(0, 9999), 1, 1, ", ")),
                ],
            ),
        )
        .rule(
            "update",
            t(
                "UPDATE {tab} SET {col} = {val} WHERE {col2} {op} {val};",
                vec![
                    ("tab", table(TableFilter::Any)),
                    ("col", field(ColumnFilter::Numeric)),
                    ("col2", field(ColumnFilter::Any)),
                ],
            ),
        )
        .rule(
            "delete",
            t(
                "DELETE FROM {tab} WHERE {col} {op} {val};",
                vec![
                    ("tab", table(TableFilter::Any)),
                    ("col", field(ColumnFilter::Numeric)),
                ],
            ),
        )
        .rule("op", choice(vec![lit("="), lit("<"), lit(">"), lit("<>")]))
        .rule("val", number(0, 99_999))
        .freeze()
        .expect("smoke grammar is well-formed")
}

/// Interleaves CREATE/DROP with inserts to exercise the DDL barrier.
fn ddl_churn() -> Grammar {
    GrammarBuilder::new("ddl_churn")
        .rule(
            "query",
            weighted(vec![
                (1, t("CREATE TABLE IF NOT EXISTS scratch_{n} (id int PRIMARY KEY, v int);",
                    vec![("n", number(0, 7))])),
                (1, t("DROP TABLE IF EXISTS scratch_{n};", vec![("n", number(0, 7))])),
                (8, t("INSERT INTO scratch_{n} VALUES ({id}, {v}) ON CONFLICT DO NOTHING;",
                    vec![
                        ("n", number(0, 7)),
                        ("id", number(0, 999_999)),
                        ("v", number(0, 9999)),
                    ])),
            ]),
        )
        .freeze()
        .expect("ddl_churn grammar is well-formed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rqg_grammar::{Context, ExpandConfig};
    use rqg_schema::SchemaView;
    use std::sync::Arc;

    #[test]
    fn test_builtins_freeze_and_expand() {
        for name in builtin_names() {
            let grammar = builtin(name).unwrap();
            let schema = Arc::new(SchemaView::empty());
            for index in 0..50u64 {
                let mut ctx =
                    Context::for_query(7, 0, index, Arc::clone(&schema), ExpandConfig::default());
                let query = grammar.generate(&mut ctx).unwrap();
                assert!(query.ends_with(';'), "{name}: {query}");
            }
        }
    }

    #[test]
    fn test_unknown_builtin() {
        assert!(builtin("nope").is_none());
    }
}
