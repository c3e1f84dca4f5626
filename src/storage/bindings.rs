//! Binding rows: the pairing of a local record with its Jira identity

use super::fields::{from_sql, to_sql, FieldValues};
use super::Session;
use crate::integrations::ms_to_datetime;
use crate::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use std::collections::HashMap;

/// SQLite caps the number of host parameters per statement
const BULK_CHUNK: usize = 500;

/// Where the bindings of one model live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingTable {
    pub table: &'static str,
    /// Column referencing the local record; `None` for standalone bindings
    pub local_column: Option<&'static str>,
}

/// Identity part of a binding row
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub id: i64,
    pub backend_id: String,
    pub local_id: Option<i64>,
    pub external_id: Option<String>,
    pub external_updated_at: Option<DateTime<Utc>>,
}

impl Binding {
    pub fn is_linked(&self) -> bool {
        self.external_id.is_some()
    }
}

impl BindingTable {
    fn select_columns(&self) -> String {
        format!(
            "id, backend_id, {}, external_id, external_updated_at",
            self.local_column.unwrap_or("NULL")
        )
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Binding> {
        Ok(Binding {
            id: row.get(0)?,
            backend_id: row.get(1)?,
            local_id: row.get(2)?,
            external_id: row.get(3)?,
            external_updated_at: row.get::<_, Option<i64>>(4)?.map(ms_to_datetime),
        })
    }
}

impl Session {
    pub fn binding(&self, table: &BindingTable, id: i64) -> Result<Option<Binding>> {
        let sql = format!("SELECT {} FROM {} WHERE id = ?1", table.select_columns(), table.table);
        self.with_conn(|conn| {
            Ok(conn
                .query_row(&sql, params![id], BindingTable::from_row)
                .optional()?)
        })
    }

    pub fn binding_by_external(
        &self,
        table: &BindingTable,
        backend_id: &str,
        external_id: &str,
    ) -> Result<Option<Binding>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE backend_id = ?1 AND external_id = ?2",
            table.select_columns(),
            table.table
        );
        self.with_conn(|conn| {
            Ok(conn
                .query_row(&sql, params![backend_id, external_id], BindingTable::from_row)
                .optional()?)
        })
    }

    /// First binding whose model specific `column` equals `value`
    pub fn binding_by_column(
        &self,
        table: &BindingTable,
        backend_id: &str,
        column: &'static str,
        value: &str,
    ) -> Result<Option<Binding>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE backend_id = ?1 AND {} = ?2 ORDER BY id LIMIT 1",
            table.select_columns(),
            table.table,
            column
        );
        self.with_conn(|conn| {
            Ok(conn
                .query_row(&sql, params![backend_id, value], BindingTable::from_row)
                .optional()?)
        })
    }

    /// Every binding of a local record on one backend, oldest first
    pub fn bindings_by_local(
        &self,
        table: &BindingTable,
        backend_id: &str,
        local_id: i64,
    ) -> Result<Vec<Binding>> {
        let Some(local_column) = table.local_column else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT {} FROM {} WHERE backend_id = ?1 AND {} = ?2 ORDER BY id",
            table.select_columns(),
            table.table,
            local_column
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![backend_id, local_id], BindingTable::from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Insert a binding row; `fields` carries the external identity and any
    /// model specific columns
    pub fn insert_binding(
        &self,
        table: &BindingTable,
        backend_id: &str,
        local_id: Option<i64>,
        fields: &FieldValues,
    ) -> Result<i64> {
        let mut columns = vec!["backend_id"];
        let mut values = vec![rusqlite::types::Value::Text(backend_id.to_string())];
        if let (Some(column), Some(id)) = (table.local_column, local_id) {
            columns.push(column);
            values.push(rusqlite::types::Value::Integer(id));
        }
        for (column, value) in fields.iter() {
            columns.push(column);
            values.push(to_sql(value));
        }

        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.table,
            columns.join(", "),
            placeholders.join(", ")
        );

        self.with_conn(|conn| {
            conn.execute(&sql, params_from_iter(values.iter()))?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn update_binding(&self, table: &BindingTable, id: i64, fields: &FieldValues) -> Result<()> {
        self.update_row(table.table, id, fields)
    }

    /// Record the external identity and the remote update time of a binding
    pub fn set_binding_sync(
        &self,
        table: &BindingTable,
        id: i64,
        external_id: &str,
        external_updated_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET external_id = ?1, external_updated_at = ?2 WHERE id = ?3",
            table.table
        );
        self.with_conn(|conn| {
            conn.execute(
                &sql,
                params![external_id, external_updated_at.map(|d| d.timestamp_millis()), id],
            )?;
            Ok(())
        })
    }

    pub fn clear_external_id(&self, table: &BindingTable, id: i64) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET external_id = NULL, external_updated_at = NULL WHERE id = ?1",
            table.table
        );
        self.with_conn(|conn| {
            conn.execute(&sql, params![id])?;
            Ok(())
        })
    }

    pub fn delete_binding(&self, table: &BindingTable, id: i64) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", table.table);
        self.with_conn(|conn| {
            conn.execute(&sql, params![id])?;
            Ok(())
        })
    }

    /// Model specific columns of a binding row
    pub fn binding_fields(
        &self,
        table: &BindingTable,
        id: i64,
        columns: &[&'static str],
    ) -> Result<Option<FieldValues>> {
        self.read_row(table.table, id, columns)
    }

    /// Locally known `external_updated_at` for many external ids at once
    pub fn known_external_updates(
        &self,
        table: &BindingTable,
        backend_id: &str,
        external_ids: &[String],
    ) -> Result<HashMap<String, Option<DateTime<Utc>>>> {
        let mut known = HashMap::new();

        for chunk in external_ids.chunks(BULK_CHUNK) {
            let placeholders: Vec<String> = (2..chunk.len() + 2).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT external_id, external_updated_at FROM {} \
                 WHERE backend_id = ?1 AND external_id IN ({})",
                table.table,
                placeholders.join(", ")
            );
            let mut values: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(chunk.len() + 1);
            values.push(&backend_id);
            values.extend(chunk.iter().map(|id| id as &dyn rusqlite::ToSql));

            self.with_conn(|conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(values.as_slice(), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?))
                })?;
                for row in rows {
                    let (external_id, updated) = row?;
                    known.insert(external_id, updated.map(ms_to_datetime));
                }
                Ok(())
            })?;
        }

        Ok(known)
    }

    /// Issue type bindings synchronized on a project binding (empty means all)
    pub fn project_issue_types(&self, project_binding_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT issue_type_binding_id FROM project_binding_issue_types \
                 WHERE project_binding_id = ?1 ORDER BY issue_type_binding_id",
            )?;
            let rows = stmt.query_map(params![project_binding_id], |row| row.get(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
        })
    }

    pub fn set_project_issue_types(&self, project_binding_id: i64, issue_types: &[i64]) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM project_binding_issue_types WHERE project_binding_id = ?1",
                params![project_binding_id],
            )?;
            let mut stmt = conn.prepare(
                "INSERT INTO project_binding_issue_types (project_binding_id, issue_type_binding_id) \
                 VALUES (?1, ?2)",
            )?;
            for issue_type in issue_types {
                stmt.execute(params![project_binding_id, issue_type])?;
            }
            Ok(())
        })
    }

    /// Update arbitrary columns of one row
    pub(crate) fn update_row(&self, table: &str, id: i64, fields: &FieldValues) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let assignments: Vec<String> = fields
            .columns()
            .enumerate()
            .map(|(i, column)| format!("{} = ?{}", column, i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            table,
            assignments.join(", "),
            fields.len() + 1
        );
        let mut values: Vec<rusqlite::types::Value> = fields.iter().map(|(_, v)| to_sql(v)).collect();
        values.push(rusqlite::types::Value::Integer(id));

        self.with_conn(|conn| {
            conn.execute(&sql, params_from_iter(values.iter()))?;
            Ok(())
        })
    }

    /// Read the given columns of one row
    pub(crate) fn read_row(
        &self,
        table: &str,
        id: i64,
        columns: &[&'static str],
    ) -> Result<Option<FieldValues>> {
        let sql = format!("SELECT {} FROM {} WHERE id = ?1", columns.join(", "), table);
        self.with_conn(|conn| {
            Ok(conn
                .query_row(&sql, params![id], |row| {
                    let mut values = FieldValues::new();
                    for (i, column) in columns.iter().enumerate() {
                        values.set(*column, from_sql(row.get_ref(i)?));
                    }
                    Ok(values)
                })
                .optional()?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;
    use tempfile::TempDir;

    const TASKS: BindingTable = BindingTable {
        table: "task_bindings",
        local_column: Some("task_id"),
    };

    fn setup() -> (TempDir, Session) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("sync.db")).unwrap();
        let session = store.session().unwrap();
        session
            .with_conn(|c| {
                c.execute_batch(
                    "INSERT INTO tasks (id, name) VALUES (1, 'one'), (2, 'two'), (3, 'three');",
                )?;
                Ok(())
            })
            .unwrap();
        (dir, session)
    }

    #[test]
    fn test_insert_and_lookup() {
        let (_dir, session) = setup();
        let fields = FieldValues::new()
            .with("external_id", "10001")
            .with("jira_key", "TEST-1");
        let id = session.insert_binding(&TASKS, "acme", Some(1), &fields).unwrap();

        let by_ext = session.binding_by_external(&TASKS, "acme", "10001").unwrap().unwrap();
        assert_eq!(by_ext.id, id);
        assert_eq!(by_ext.local_id, Some(1));
        assert!(by_ext.external_updated_at.is_none());

        assert!(session.binding_by_external(&TASKS, "other", "10001").unwrap().is_none());
        assert_eq!(session.bindings_by_local(&TASKS, "acme", 1).unwrap().len(), 1);

        let extra = session.binding_fields(&TASKS, id, &["jira_key"]).unwrap().unwrap();
        assert_eq!(extra.get_str("jira_key"), Some("TEST-1"));

        let by_key = session
            .binding_by_column(&TASKS, "acme", "jira_key", "TEST-1")
            .unwrap()
            .unwrap();
        assert_eq!(by_key.id, id);
    }

    #[test]
    fn test_duplicate_external_id_is_a_unique_violation() {
        let (_dir, session) = setup();
        let fields = FieldValues::new().with("external_id", "10001");
        session.insert_binding(&TASKS, "acme", Some(1), &fields).unwrap();

        let err = session.insert_binding(&TASKS, "acme", Some(2), &fields).unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn test_known_external_updates() {
        let (_dir, session) = setup();
        let t = ms_to_datetime(1_554_727_896_595);
        let a = session
            .insert_binding(&TASKS, "acme", Some(1), &FieldValues::new().with("external_id", "1"))
            .unwrap();
        session.set_binding_sync(&TASKS, a, "1", Some(t)).unwrap();
        session
            .insert_binding(&TASKS, "acme", Some(2), &FieldValues::new().with("external_id", "2"))
            .unwrap();

        let ids: Vec<String> = (0..1200).map(|i| i.to_string()).collect();
        let known = session.known_external_updates(&TASKS, "acme", &ids).unwrap();

        assert_eq!(known.len(), 2);
        assert_eq!(known["1"], Some(t));
        assert_eq!(known["2"], None);
    }
}
