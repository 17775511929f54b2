//! SQLite databases: one CSV document per user table.

use crate::document::Document;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

use super::IngestionError;

pub(crate) fn load_tables(path: &Path, source: &str) -> Result<Vec<Document>, IngestionError> {
    let sqlite_error = |error: rusqlite::Error| IngestionError::Sqlite {
        path: path.to_path_buf(),
        source: error,
    };
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(sqlite_error)?;

    let tables: Vec<String> = {
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .map_err(sqlite_error)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(sqlite_error)?;
        rows.collect::<Result<_, _>>().map_err(sqlite_error)?
    };

    let mut documents = Vec::with_capacity(tables.len());
    for table in tables {
        let (csv, rows) = table_as_csv(&conn, &table).map_err(sqlite_error)?;
        let mut document = Document::new(csv, source);
        document.metadata.table = Some(table);
        document.metadata.rows = Some(rows);
        documents.push(document);
    }
    Ok(documents)
}

fn table_as_csv(conn: &Connection, table: &str) -> Result<(String, usize), rusqlite::Error> {
    let sql = format!("SELECT * FROM \"{}\"", table.replace('"', "\"\""));
    let mut stmt = conn.prepare(&sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|name| name.to_string()).collect();

    let mut out = String::new();
    push_record(&mut out, columns.iter().map(String::as_str));

    let mut rows = stmt.query([])?;
    let mut count = 0;
    while let Some(row) = rows.next()? {
        let mut fields = Vec::with_capacity(columns.len());
        for index in 0..columns.len() {
            fields.push(render_value(row.get_ref(index)?));
        }
        push_record(&mut out, fields.iter().map(String::as_str));
        count += 1;
    }
    Ok((out, count))
}

fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(number) => number.to_string(),
        ValueRef::Real(number) => number.to_string(),
        ValueRef::Text(text) => String::from_utf8_lossy(text).into_owned(),
        ValueRef::Blob(bytes) => format!("<blob {} bytes>", bytes.len()),
    }
}

fn push_record<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    for (index, field) in fields.enumerate() {
        if index > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}
