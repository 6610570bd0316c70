//! Reduced DDL parser for building a schema snapshot from a script.
//!
//! Handles `CREATE TABLE` (column definitions with `PRIMARY KEY`, `UNIQUE`,
//! `NOT NULL`, `DEFAULT`, `REFERENCES` and `CHECK`, plus the table-level
//! forms) and `CREATE INDEX`. Every other statement is tolerated and
//! skipped with a warning.

use crate::view::{Column, ConstraintKind, Index, SchemaView, Table, TableConstraint};
use crate::SchemaError;

/// Parse a DDL script into a schema snapshot.
pub fn parse_ddl(sql: &str) -> Result<SchemaView, SchemaError> {
    let mut tables: Vec<Table> = Vec::new();
    for statement in split_statements(sql) {
        let tokens = tokenize(&statement);
        if tokens.is_empty() {
            continue;
        }
        if keyword_at(&tokens, 0, "CREATE") && keyword_at(&tokens, 1, "TABLE") {
            tables.push(parse_create_table(&tokens)?);
        } else if keyword_at(&tokens, 0, "CREATE")
            && (keyword_at(&tokens, 1, "INDEX")
                || (keyword_at(&tokens, 1, "UNIQUE") && keyword_at(&tokens, 2, "INDEX")))
        {
            if let Some((table_name, index)) = parse_create_index(&tokens)? {
                match tables.iter_mut().find(|table| table.name == table_name) {
                    Some(table) => table.indexes.push(index),
                    None => tracing::warn!(
                        table = %table_name,
                        index = %index.name,
                        "index references a table this script does not create; skipping"
                    ),
                }
            }
        } else {
            tracing::warn!(
                statement = %tokens[0],
                "ignoring unsupported DDL statement"
            );
        }
    }
    Ok(SchemaView::from_tables(tables))
}

/// Split a script on `;`, honoring string literals, quoted identifiers and
/// both comment styles.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                current.push(c);
                for inner in chars.by_ref() {
                    current.push(inner);
                    if inner == c {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
            }
            ';' => {
                if !current.trim().is_empty() {
                    statements.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        statements.push(current);
    }
    statements
}

/// Split a statement into words, punctuation and literals. Quoted
/// identifiers lose their quotes; string literals keep theirs.
fn tokenize(statement: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = statement.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' | ')' | ',' => tokens.push(c.to_string()),
            '"' => {
                let mut ident = String::new();
                for inner in chars.by_ref() {
                    if inner == '"' {
                        break;
                    }
                    ident.push(inner);
                }
                tokens.push(ident);
            }
            '\'' => {
                let mut literal = String::from('\'');
                for inner in chars.by_ref() {
                    literal.push(inner);
                    if inner == '\'' {
                        break;
                    }
                }
                tokens.push(literal);
            }
            _ => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || matches!(next, '(' | ')' | ',' | '"' | '\'') {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(word);
            }
        }
    }
    tokens
}

fn keyword_at(tokens: &[String], index: usize, keyword: &str) -> bool {
    tokens
        .get(index)
        .is_some_and(|token| token.eq_ignore_ascii_case(keyword))
}

fn is_keyword(token: &str, keyword: &str) -> bool {
    token.eq_ignore_ascii_case(keyword)
}

/// Column/constraint keywords that end a type name.
fn ends_type(token: &str) -> bool {
    ["PRIMARY", "UNIQUE", "NOT", "NULL", "DEFAULT", "REFERENCES", "CHECK", "CONSTRAINT"]
        .iter()
        .any(|k| token.eq_ignore_ascii_case(k))
}

fn parse_create_table(tokens: &[String]) -> Result<Table, SchemaError> {
    // CREATE TABLE [IF NOT EXISTS] name ( ... )
    let mut pos = 2;
    if keyword_at(tokens, pos, "IF") {
        pos += 3;
    }
    let name = tokens
        .get(pos)
        .ok_or_else(|| SchemaError::Parse("CREATE TABLE without a table name".into()))?
        .clone();
    pos += 1;
    if !keyword_at(tokens, pos, "(") {
        return Err(SchemaError::Parse(format!(
            "CREATE TABLE {name}: expected column list"
        )));
    }
    let body = body_tokens(&tokens[pos..])?;
    let mut table = Table::new(name.clone(), Vec::new());
    for item in split_on_commas(body) {
        if item.is_empty() {
            continue;
        }
        if is_table_constraint(item) {
            apply_table_constraint(&mut table, item);
        } else {
            table.columns.push(parse_column_def(&name, item)?);
        }
    }
    Ok(table)
}

/// The tokens inside the outermost parenthesis pair.
fn body_tokens(tokens: &[String]) -> Result<&[String], SchemaError> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        match token.as_str() {
            "(" => depth += 1,
            ")" => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&tokens[1..i]);
                }
            }
            _ => {}
        }
    }
    Err(SchemaError::Parse("unbalanced parentheses".into()))
}

/// Split the table body on top-level commas.
fn split_on_commas(tokens: &[String]) -> Vec<&[String]> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        match token.as_str() {
            "(" => depth += 1,
            ")" => depth = depth.saturating_sub(1),
            "," if depth == 0 => {
                items.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&tokens[start..]);
    items
}

fn is_table_constraint(item: &[String]) -> bool {
    let first = &item[0];
    is_keyword(first, "CONSTRAINT")
        || is_keyword(first, "PRIMARY")
        || is_keyword(first, "FOREIGN")
        || is_keyword(first, "CHECK")
        || (is_keyword(first, "UNIQUE") && item.get(1).is_some_and(|t| t == "("))
}

fn apply_table_constraint(table: &mut Table, item: &[String]) {
    let mut pos = 0;
    let mut name = None;
    if is_keyword(&item[0], "CONSTRAINT") {
        name = item.get(1).cloned();
        pos = 2;
    }
    let (kind, columns) = if keyword_at(item, pos, "PRIMARY") {
        (ConstraintKind::PrimaryKey, paren_names(&item[pos..]))
    } else if keyword_at(item, pos, "UNIQUE") {
        (ConstraintKind::Unique, paren_names(&item[pos..]))
    } else if keyword_at(item, pos, "FOREIGN") {
        (ConstraintKind::ForeignKey, paren_names(&item[pos..]))
    } else if keyword_at(item, pos, "CHECK") {
        (ConstraintKind::Check, Vec::new())
    } else {
        tracing::warn!(table = %table.name, "ignoring unrecognized table constraint");
        return;
    };
    match kind {
        ConstraintKind::PrimaryKey => {
            for column_name in &columns {
                if let Some(column) = table
                    .columns
                    .iter_mut()
                    .find(|column| &column.name == column_name)
                {
                    column.primary_key = true;
                    column.nullable = false;
                }
            }
        }
        ConstraintKind::Unique => {
            if let [only] = columns.as_slice() {
                if let Some(column) =
                    table.columns.iter_mut().find(|column| &column.name == only)
                {
                    column.unique = true;
                }
            }
        }
        _ => {}
    }
    table.constraints.push(TableConstraint {
        name,
        kind,
        columns,
        expression: Some(item.join(" ")),
    });
}

/// Names inside the first parenthesis pair of `tokens`.
fn paren_names(tokens: &[String]) -> Vec<String> {
    let Some(open) = tokens.iter().position(|t| t == "(") else {
        return Vec::new();
    };
    match body_tokens(&tokens[open..]) {
        Ok(inner) => split_on_commas(inner)
            .into_iter()
            .filter_map(|item| item.first().cloned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn parse_column_def(table: &str, item: &[String]) -> Result<Column, SchemaError> {
    let name = item[0].clone();
    let mut pos = 1;
    let mut type_parts: Vec<String> = Vec::new();
    let mut depth = 0usize;
    while pos < item.len() {
        let token = &item[pos];
        if depth == 0 && ends_type(token) {
            break;
        }
        match token.as_str() {
            "(" => depth += 1,
            ")" => depth = depth.saturating_sub(1),
            _ => {}
        }
        type_parts.push(token.clone());
        pos += 1;
    }
    if type_parts.is_empty() {
        return Err(SchemaError::Parse(format!(
            "column '{name}' in table '{table}' has no type"
        )));
    }
    let mut column = Column::new(name, type_parts.join(" "));
    while pos < item.len() {
        if keyword_at(item, pos, "NOT") && keyword_at(item, pos + 1, "NULL") {
            column.nullable = false;
            pos += 2;
        } else if keyword_at(item, pos, "NULL") {
            column.nullable = true;
            pos += 1;
        } else if keyword_at(item, pos, "PRIMARY") {
            column.primary_key = true;
            column.nullable = false;
            pos += 2; // PRIMARY KEY
        } else if keyword_at(item, pos, "UNIQUE") {
            column.unique = true;
            pos += 1;
        } else if keyword_at(item, pos, "DEFAULT") {
            let (expr, next) = expression_until_keyword(item, pos + 1);
            column.default = Some(expr);
            pos = next;
        } else if keyword_at(item, pos, "REFERENCES") || keyword_at(item, pos, "CHECK") {
            // Recorded on the column's table; skip the clause.
            let (_, next) = expression_until_keyword(item, pos + 1);
            pos = next;
        } else if keyword_at(item, pos, "CONSTRAINT") {
            pos += 2; // CONSTRAINT <name>, the kind follows
        } else {
            pos += 1;
        }
    }
    Ok(column)
}

/// Collect tokens from `start` until the next type-ending keyword at paren
/// depth zero; returns the joined expression and the next position.
fn expression_until_keyword(item: &[String], start: usize) -> (String, usize) {
    let mut depth = 0usize;
    let mut pos = start;
    let mut parts: Vec<&str> = Vec::new();
    while pos < item.len() {
        let token = &item[pos];
        if depth == 0 && pos > start && ends_type(token) {
            break;
        }
        match token.as_str() {
            "(" => depth += 1,
            ")" => depth = depth.saturating_sub(1),
            _ => {}
        }
        parts.push(token);
        pos += 1;
    }
    (parts.join(" "), pos)
}

fn parse_create_index(tokens: &[String]) -> Result<Option<(String, Index)>, SchemaError> {
    // CREATE [UNIQUE] INDEX [IF NOT EXISTS] name ON table [USING m] ( cols )
    let unique = keyword_at(tokens, 1, "UNIQUE");
    let mut pos = if unique { 3 } else { 2 };
    if keyword_at(tokens, pos, "IF") {
        pos += 3;
    }
    let name = tokens
        .get(pos)
        .ok_or_else(|| SchemaError::Parse("CREATE INDEX without a name".into()))?
        .clone();
    pos += 1;
    if !keyword_at(tokens, pos, "ON") {
        return Err(SchemaError::Parse(format!(
            "CREATE INDEX {name}: expected ON <table>"
        )));
    }
    pos += 1;
    let table = tokens
        .get(pos)
        .ok_or_else(|| SchemaError::Parse(format!("CREATE INDEX {name}: missing table")))?
        .clone();
    let columns = paren_names(&tokens[pos..]);
    Ok(Some((
        table,
        Index {
            name,
            columns,
            unique,
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeTag;

    const SCRIPT: &str = r#"
        -- users live here
        CREATE TABLE users (
            id bigserial PRIMARY KEY,
            email varchar(255) NOT NULL UNIQUE,
            balance numeric(10, 2) DEFAULT 0.00,
            created_at timestamp with time zone DEFAULT now(),
            org_id integer REFERENCES orgs(id),
            CHECK (balance >= 0)
        );

        CREATE TABLE orders (
            id bigint NOT NULL,
            user_id bigint NOT NULL,
            note text,
            PRIMARY KEY (id),
            CONSTRAINT orders_user_unique UNIQUE (user_id)
        );

        CREATE INDEX idx_orders_user ON orders (user_id);
        CREATE UNIQUE INDEX idx_users_email ON users (email);

        /* not in the reduced dialect */
        CREATE VIEW v AS SELECT 1;
        SET search_path TO public;
    "#;

    #[test]
    fn test_parses_tables_and_columns() {
        let view = parse_ddl(SCRIPT).unwrap();
        assert_eq!(view.len(), 2);

        let users = view.table("users").unwrap();
        assert_eq!(users.columns.len(), 5);
        let id = users.column("id").unwrap();
        assert!(id.primary_key);
        assert!(!id.nullable);
        assert_eq!(id.type_tag, TypeTag::Integer);

        let email = users.column("email").unwrap();
        assert!(!email.nullable);
        assert!(email.unique);
        assert_eq!(email.type_tag, TypeTag::Text);

        let balance = users.column("balance").unwrap();
        assert_eq!(balance.default.as_deref(), Some("0.00"));
        assert_eq!(balance.type_tag, TypeTag::Numeric);

        let created = users.column("created_at").unwrap();
        assert_eq!(created.type_tag, TypeTag::Temporal);
        assert_eq!(created.default.as_deref(), Some("now ( )"));
    }

    #[test]
    fn test_table_level_constraints() {
        let view = parse_ddl(SCRIPT).unwrap();
        let orders = view.table("orders").unwrap();
        let id = orders.column("id").unwrap();
        assert!(id.primary_key);
        let user_id = orders.column("user_id").unwrap();
        assert!(user_id.unique);
        assert!(orders
            .constraints
            .iter()
            .any(|c| c.kind == ConstraintKind::PrimaryKey && c.columns == vec!["id"]));
        assert!(orders
            .constraints
            .iter()
            .any(|c| c.kind == ConstraintKind::Unique
                && c.name.as_deref() == Some("orders_user_unique")));
    }

    #[test]
    fn test_indexes_attach_to_tables() {
        let view = parse_ddl(SCRIPT).unwrap();
        let orders = view.table("orders").unwrap();
        assert_eq!(orders.indexes.len(), 1);
        assert_eq!(orders.indexes[0].columns, vec!["user_id"]);
        assert!(!orders.indexes[0].unique);

        let users = view.table("users").unwrap();
        assert_eq!(users.indexes.len(), 1);
        assert!(users.indexes[0].unique);
    }

    #[test]
    fn test_unsupported_statements_are_skipped() {
        // CREATE VIEW and SET are outside the reduced dialect but must not
        // abort the parse.
        let view = parse_ddl("SET x = 1; CREATE TABLE t (id int);").unwrap();
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_quoted_identifiers() {
        let view = parse_ddl(r#"CREATE TABLE "Mixed Case" ("Id" int PRIMARY KEY);"#).unwrap();
        let table = view.table("Mixed Case").unwrap();
        assert!(table.column("Id").unwrap().primary_key);
    }

    #[test]
    fn test_semicolon_inside_literal() {
        let view =
            parse_ddl("CREATE TABLE t (s text DEFAULT 'a;b', n int NOT NULL);").unwrap();
        let table = view.table("t").unwrap();
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.column("s").unwrap().default.as_deref(), Some("'a;b'"));
    }

    #[test]
    fn test_unbalanced_parens_is_parse_error() {
        assert!(parse_ddl("CREATE TABLE t (id int;").is_err());
    }
}
