//! Dialect-aware SQL generation for template operations.
//!
//! Identifiers are quoted per backend and values become positional
//! placeholders (`?` for MySQL and SQLite, `$n` for PostgreSQL). `Null`
//! values in generated statements are written as the `NULL` literal.

use crate::db::{Statement, StatementKind};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, Value};
use std::collections::HashMap;

/// SQL flavour of a logical database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    db_type: DatabaseType,
}

impl Dialect {
    pub fn new(db_type: DatabaseType) -> Self {
        Self { db_type }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// Quote an identifier, doubling any embedded quote character.
    pub fn quote(&self, ident: &str) -> String {
        match self.db_type {
            DatabaseType::MySQL => format!("`{}`", ident.replace('`', "``")),
            DatabaseType::PostgreSQL | DatabaseType::SQLite => {
                format!("\"{}\"", ident.replace('"', "\"\""))
            }
        }
    }

    /// Placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self.db_type {
            DatabaseType::PostgreSQL => format!("${}", index),
            DatabaseType::MySQL | DatabaseType::SQLite => "?".to_string(),
        }
    }
}

impl From<DatabaseType> for Dialect {
    fn from(db_type: DatabaseType) -> Self {
        Self::new(db_type)
    }
}

/// Accumulates SQL text and its parameters.
struct SqlWriter {
    dialect: Dialect,
    sql: String,
    params: Vec<Value>,
}

impl SqlWriter {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::with_capacity(128),
            params: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) -> &mut Self {
        self.sql.push_str(text);
        self
    }

    fn ident(&mut self, name: &str) -> &mut Self {
        let quoted = self.dialect.quote(name);
        self.push(&quoted)
    }

    fn bind(&mut self, value: Value) -> &mut Self {
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.push(&placeholder)
    }

    fn value(&mut self, value: Value) -> &mut Self {
        if value.is_null() {
            self.push("NULL")
        } else {
            self.bind(value)
        }
    }

    fn idents(&mut self, names: &[&str]) -> &mut Self {
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.ident(name);
        }
        self
    }

    fn values(&mut self, values: Vec<Value>) -> &mut Self {
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.value(value);
        }
        self
    }

    /// `column = v` for one value, `column IN (...)` for several.
    fn key_filter(&mut self, column: &str, mut keys: Vec<Value>) -> &mut Self {
        self.push(" WHERE ").ident(column);
        if keys.len() == 1 {
            let key = keys.remove(0);
            self.push(" = ").value(key)
        } else {
            self.push(" IN (").values(keys).push(")")
        }
    }

    fn finish(self, kind: StatementKind) -> Statement {
        Statement::new(kind, self.sql).with_params(self.params)
    }
}

/// `INSERT` of one row. With no columns the backend's default-values form
/// is used. `returning` appends a `RETURNING` clause on PostgreSQL and
/// SQLite; MySQL has none and reports AUTO_INCREMENT keys on its own.
pub fn insert(
    dialect: Dialect,
    table: &str,
    columns: Vec<(&str, Value)>,
    returning: Option<&str>,
) -> Statement {
    let mut w = SqlWriter::new(dialect);
    w.push("INSERT INTO ").ident(table);

    if columns.is_empty() {
        match dialect.db_type() {
            DatabaseType::MySQL => w.push(" () VALUES ()"),
            DatabaseType::PostgreSQL | DatabaseType::SQLite => w.push(" DEFAULT VALUES"),
        };
    } else {
        let (names, values): (Vec<&str>, Vec<Value>) = columns.into_iter().unzip();
        w.push(" (")
            .idents(&names)
            .push(") VALUES (")
            .values(values)
            .push(")");
    }

    match (dialect.db_type(), returning) {
        (DatabaseType::PostgreSQL | DatabaseType::SQLite, Some(key)) => {
            w.push(" RETURNING ").ident(key);
        }
        _ => {}
    }
    w.finish(StatementKind::Insert)
}

/// Multi-row `INSERT`; every row supplies a value for every column.
pub fn batch_insert(
    dialect: Dialect,
    table: &str,
    columns: &[&str],
    rows: Vec<Vec<Value>>,
) -> Statement {
    let mut w = SqlWriter::new(dialect);
    w.push("INSERT INTO ")
        .ident(table)
        .push(" (")
        .idents(columns)
        .push(") VALUES ");
    for (i, row) in rows.into_iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.push("(").values(row).push(")");
    }
    w.finish(StatementKind::Update)
}

/// `SELECT columns FROM table WHERE filter` over one or more keys.
pub fn select_by(
    dialect: Dialect,
    table: &str,
    columns: &[&str],
    filter_column: &str,
    keys: Vec<Value>,
) -> Statement {
    let mut w = SqlWriter::new(dialect);
    w.push("SELECT ")
        .idents(columns)
        .push(" FROM ")
        .ident(table)
        .key_filter(filter_column, keys);
    w.finish(StatementKind::Query)
}

/// `UPDATE` of one row by key. With nothing to set, the key is assigned to
/// itself so the statement still reports whether the row exists.
pub fn update(
    dialect: Dialect,
    table: &str,
    sets: Vec<(&str, Value)>,
    key_column: &str,
    key: Value,
) -> Statement {
    let mut w = SqlWriter::new(dialect);
    w.push("UPDATE ").ident(table).push(" SET ");
    if sets.is_empty() {
        w.ident(key_column).push(" = ").ident(key_column);
    }
    for (i, (column, value)) in sets.into_iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.ident(column).push(" = ").value(value);
    }
    w.key_filter(key_column, vec![key]);
    w.finish(StatementKind::Update)
}

/// One `UPDATE` patching several rows through `CASE key WHEN ... END`.
///
/// A row only contributes the columns it lists; other rows keep their
/// current value through the `ELSE` branch.
pub fn batch_patch(
    dialect: Dialect,
    table: &str,
    key_column: &str,
    rows: Vec<(Value, Vec<(&str, Value)>)>,
) -> Statement {
    let mut columns: Vec<&str> = Vec::new();
    for (_, sets) in &rows {
        for (column, _) in sets {
            if !columns.contains(column) {
                columns.push(*column);
            }
        }
    }

    let mut w = SqlWriter::new(dialect);
    w.push("UPDATE ").ident(table).push(" SET ");
    if columns.is_empty() {
        w.ident(key_column).push(" = ").ident(key_column);
    }
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.ident(column).push(" = CASE ").ident(key_column);
        for (key, sets) in &rows {
            if let Some((_, value)) = sets.iter().find(|(c, _)| c == column) {
                w.push(" WHEN ")
                    .value(key.clone())
                    .push(" THEN ")
                    .value(value.clone());
            }
        }
        w.push(" ELSE ").ident(column).push(" END");
    }

    let keys = rows.into_iter().map(|(key, _)| key).collect();
    w.key_filter(key_column, keys);
    w.finish(StatementKind::Update)
}

/// `DELETE` over one or more keys.
pub fn delete_by(dialect: Dialect, table: &str, key_column: &str, keys: Vec<Value>) -> Statement {
    let mut w = SqlWriter::new(dialect);
    w.push("DELETE FROM ").ident(table).key_filter(key_column, keys);
    w.finish(StatementKind::Update)
}

/// Render a custom SQL template.
///
/// `?` takes the next scalar; `@name` expands the named list into one
/// placeholder per element. Markers inside quoted literals or identifiers
/// are left alone, as is an `@name` with no list bound to it.
pub fn render_template(
    dialect: Dialect,
    template: &str,
    scalars: &[Value],
    lists: &HashMap<String, Vec<Value>>,
) -> DbResult<(String, Vec<Value>)> {
    let mut w = SqlWriter::new(dialect);
    let mut scalars = scalars.iter();
    let mut quote: Option<char> = None;
    let mut chars = template.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            w.sql.push(c);
            continue;
        }

        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                w.sql.push(c);
            }
            '?' => {
                let value = scalars.next().ok_or_else(|| {
                    DbError::invalid_input(format!("not enough parameters for query: {}", template))
                })?;
                w.bind(value.clone());
            }
            '@' if chars
                .peek()
                .is_some_and(|(_, n)| n.is_ascii_alphabetic() || *n == '_') =>
            {
                let mut name = String::new();
                while let Some((_, n)) = chars.peek() {
                    if n.is_ascii_alphanumeric() || *n == '_' {
                        name.push(*n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match lists.get(&name) {
                    Some(values) if values.is_empty() => {
                        return Err(DbError::invalid_input(format!(
                            "collection parameter '@{}' is empty",
                            name
                        )));
                    }
                    Some(values) => {
                        for (i, value) in values.iter().enumerate() {
                            if i > 0 {
                                w.push(", ");
                            }
                            w.bind(value.clone());
                        }
                    }
                    None => {
                        w.sql.push('@');
                        w.sql.push_str(&name);
                    }
                }
            }
            c => w.sql.push(c),
        }
    }

    if scalars.next().is_some() {
        return Err(DbError::invalid_input(format!(
            "too many parameters for query: {}",
            template
        )));
    }
    Ok((w.sql, w.params))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MYSQL: Dialect = Dialect {
        db_type: DatabaseType::MySQL,
    };
    const PG: Dialect = Dialect {
        db_type: DatabaseType::PostgreSQL,
    };
    const SQLITE: Dialect = Dialect {
        db_type: DatabaseType::SQLite,
    };

    #[test]
    fn test_quote_per_dialect() {
        assert_eq!(MYSQL.quote("user"), "`user`");
        assert_eq!(PG.quote("user"), "\"user\"");
        assert_eq!(SQLITE.quote("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_insert_skips_placeholder_for_null() {
        let stmt = insert(
            SQLITE,
            "simple_user",
            vec![("name", Value::from("a")), ("birthday", Value::Null)],
            None,
        );
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"simple_user\" (\"name\", \"birthday\") VALUES (?, NULL)"
        );
        assert_eq!(stmt.params, vec![Value::from("a")]);
        assert_eq!(stmt.kind, StatementKind::Insert);
    }

    #[test]
    fn test_insert_with_no_columns() {
        assert_eq!(
            insert(MYSQL, "t", vec![], None).sql,
            "INSERT INTO `t` () VALUES ()"
        );
        assert_eq!(
            insert(PG, "t", vec![], Some("id")).sql,
            "INSERT INTO \"t\" DEFAULT VALUES RETURNING \"id\""
        );
        assert_eq!(
            insert(SQLITE, "t", vec![], Some("id")).sql,
            "INSERT INTO \"t\" DEFAULT VALUES RETURNING \"id\""
        );
        assert_eq!(
            insert(MYSQL, "t", vec![("a", Value::Int(1))], Some("id")).sql,
            "INSERT INTO `t` (`a`) VALUES (?)"
        );
    }

    #[test]
    fn test_postgres_placeholders_are_numbered() {
        let stmt = batch_insert(
            PG,
            "t",
            &["a", "b"],
            vec![vec![1.into(), 2.into()], vec![3.into(), 4.into()]],
        );
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"t\" (\"a\", \"b\") VALUES ($1, $2), ($3, $4)"
        );
        assert_eq!(stmt.params.len(), 4);
    }

    #[test]
    fn test_select_by_one_or_many_keys() {
        let one = select_by(MYSQL, "t", &["id", "name"], "id", vec![1.into()]);
        assert_eq!(one.sql, "SELECT `id`, `name` FROM `t` WHERE `id` = ?");

        let many = select_by(PG, "t", &["id"], "id", vec![1.into(), 2.into()]);
        assert_eq!(many.sql, "SELECT \"id\" FROM \"t\" WHERE \"id\" IN ($1, $2)");
    }

    #[test]
    fn test_update_without_sets_touches_key() {
        let stmt = update(SQLITE, "t", vec![], "id", 5.into());
        assert_eq!(stmt.sql, "UPDATE \"t\" SET \"id\" = \"id\" WHERE \"id\" = ?");
        assert_eq!(stmt.params, vec![Value::Int(5)]);
    }

    #[test]
    fn test_batch_patch_case_expression() {
        let stmt = batch_patch(
            SQLITE,
            "t",
            "id",
            vec![
                (1.into(), vec![("name", "a".into()), ("age", 3.into())]),
                (2.into(), vec![("name", "b".into())]),
            ],
        );
        assert_eq!(
            stmt.sql,
            "UPDATE \"t\" SET \
             \"name\" = CASE \"id\" WHEN ? THEN ? WHEN ? THEN ? ELSE \"name\" END, \
             \"age\" = CASE \"id\" WHEN ? THEN ? ELSE \"age\" END \
             WHERE \"id\" IN (?, ?)"
        );
        assert_eq!(
            stmt.params,
            vec![
                Value::Int(1),
                Value::from("a"),
                Value::Int(2),
                Value::from("b"),
                Value::Int(1),
                Value::Int(3),
                Value::Int(1),
                Value::Int(2),
            ]
        );
    }

    #[test]
    fn test_delete_by_keys() {
        let stmt = delete_by(MYSQL, "t", "id", vec![200.into(), 9999.into()]);
        assert_eq!(stmt.sql, "DELETE FROM `t` WHERE `id` IN (?, ?)");
    }

    #[test]
    fn test_render_template_expands_lists() {
        let mut lists = HashMap::new();
        lists.insert("names".to_string(), vec!["a".into(), "b".into()]);
        let (sql, params) = render_template(
            PG,
            "SELECT * FROM t WHERE age > ? AND name IN (@names) AND note <> '?@names'",
            &[Value::Int(18)],
            &lists,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM t WHERE age > $1 AND name IN ($2, $3) AND note <> '?@names'"
        );
        assert_eq!(params, vec![Value::Int(18), "a".into(), "b".into()]);
    }

    #[test]
    fn test_render_template_leaves_unbound_names() {
        let (sql, params) =
            render_template(MYSQL, "SELECT @rownum := 1", &[], &HashMap::new()).unwrap();
        assert_eq!(sql, "SELECT @rownum := 1");
        assert!(params.is_empty());
    }

    #[test]
    fn test_render_template_rejects_empty_list() {
        let mut lists = HashMap::new();
        lists.insert("ids".to_string(), Vec::new());
        let err = render_template(SQLITE, "SELECT * FROM t WHERE id IN (@ids)", &[], &lists)
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[test]
    fn test_render_template_parameter_count_mismatch() {
        let lists = HashMap::new();
        assert!(render_template(SQLITE, "SELECT ?", &[], &lists).is_err());
        assert!(render_template(SQLITE, "SELECT 1", &[Value::Int(1)], &lists).is_err());
    }
}
