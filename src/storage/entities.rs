//! Business entity rows (projects, tasks, users, worklogs)

use super::fields::{to_sql, FieldValues};
use super::Session;
use crate::Result;
use rusqlite::{params, params_from_iter, OptionalExtension};

/// One business entity table and the columns the engine reads back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityTable {
    pub table: &'static str,
    pub columns: &'static [&'static str],
}

impl EntityTable {
    pub const PROJECTS: EntityTable = EntityTable {
        table: "projects",
        columns: &["name", "description", "manager_id", "active"],
    };

    pub const TASKS: EntityTable = EntityTable {
        table: "tasks",
        columns: &[
            "name",
            "description",
            "project_id",
            "parent_id",
            "epic_id",
            "user_id",
            "stage",
            "active",
        ],
    };

    pub const USERS: EntityTable = EntityTable {
        table: "users",
        columns: &["login", "name", "email", "active"],
    };

    pub const WORKLOGS: EntityTable = EntityTable {
        table: "worklogs",
        columns: &["name", "date", "unit_amount", "project_id", "task_id", "user_id"],
    };
}

impl Session {
    pub fn insert_record(&self, entity: &EntityTable, fields: &FieldValues) -> Result<i64> {
        let columns: Vec<&str> = fields.columns().collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            entity.table,
            columns.join(", "),
            placeholders.join(", ")
        );
        let values: Vec<rusqlite::types::Value> = fields.iter().map(|(_, v)| to_sql(v)).collect();

        self.with_conn(|conn| {
            conn.execute(&sql, params_from_iter(values.iter()))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Current values of the engine-managed columns of one record
    pub fn read_record(&self, entity: &EntityTable, id: i64) -> Result<Option<FieldValues>> {
        self.read_row(entity.table, id, entity.columns)
    }

    pub fn update_record(&self, entity: &EntityTable, id: i64, fields: &FieldValues) -> Result<()> {
        self.update_row(entity.table, id, fields)
    }

    pub fn delete_record(&self, entity: &EntityTable, id: i64) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", entity.table);
        self.with_conn(|conn| {
            conn.execute(&sql, params![id])?;
            Ok(())
        })
    }

    pub fn record_exists(&self, entity: &EntityTable, id: i64) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?1", entity.table);
        self.with_conn(|conn| {
            Ok(conn
                .query_row(&sql, params![id], |_| Ok(()))
                .optional()?
                .is_some())
        })
    }

    /// Active local user with this email (case-insensitive)
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id FROM users WHERE lower(email) = lower(?1) AND active = 1 \
                     ORDER BY id LIMIT 1",
                    params![email],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    pub fn find_user_by_login(&self, login: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id FROM users WHERE login = ?1 AND active = 1",
                    params![login],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }
}
