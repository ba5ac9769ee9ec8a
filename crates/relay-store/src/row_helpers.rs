use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Read an INTEGER column stored as 0/1 into a bool.
pub fn get_flag(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<bool, StoreError> {
    match get::<i64>(row, idx, table, column)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StoreError::CorruptRow {
            table,
            column,
            detail: format!("expected 0 or 1, got {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn with_row<T>(sql: &str, f: impl FnOnce(&rusqlite::Row<'_>) -> T) -> T {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare(sql).unwrap();
        let mut rows = stmt.query([]).unwrap();
        let row = rows.next().unwrap().unwrap();
        f(row)
    }

    #[test]
    fn get_reads_value() {
        let v: String = with_row("SELECT 'hello'", |row| get(row, 0, "t", "c")).unwrap();
        assert_eq!(v, "hello");
    }

    #[test]
    fn get_wrong_type_is_corrupt_row() {
        let result: Result<i64, _> = with_row("SELECT 'nope'", |row| get(row, 0, "messages", "edited"));
        assert!(matches!(result, Err(StoreError::CorruptRow { table: "messages", column: "edited", .. })));
    }

    #[test]
    fn flag_parses_zero_and_one() {
        assert!(!with_row("SELECT 0", |row| get_flag(row, 0, "t", "c")).unwrap());
        assert!(with_row("SELECT 1", |row| get_flag(row, 0, "t", "c")).unwrap());
    }

    #[test]
    fn flag_rejects_other_values() {
        let result = with_row("SELECT 7", |row| get_flag(row, 0, "messages", "edited"));
        assert!(matches!(result, Err(StoreError::CorruptRow { column: "edited", .. })));
    }
}
