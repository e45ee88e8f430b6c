use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqliteConnection};
use sqlx::{SqlitePool, Transaction};
use uuid::Uuid;

use super::{GraphStore, GraphTx};
use crate::db::row_parsers::{
    assignment_from_row, ids_from_rows, permission_from_row, role_from_row, user_from_row,
};
use crate::errors::{AppError, AppResult};
use crate::models::{Assignment, EdgeMetadata, Hierarchy, Permission, Relation, Role, User};
use crate::utils::utc_now;

const USER_COLUMNS: &str = "id, name, created_at, updated_at";
const ROLE_COLUMNS: &str = "id, name, slug, description, created_at, updated_at";
const PERMISSION_COLUMNS: &str = "id, name, slug, description, parent_id, created_at, updated_at";

/// Join table and column names backing one relation.
struct EdgeTable {
    table: &'static str,
    subject: &'static str,
    object: &'static str,
}

fn edge_table(relation: Relation) -> EdgeTable {
    match relation {
        Relation::UserRole => EdgeTable { table: "user_roles", subject: "user_id", object: "role_id" },
        Relation::UserPermission => EdgeTable { table: "user_permissions", subject: "user_id", object: "permission_id" },
        Relation::RolePermission => EdgeTable { table: "role_permissions", subject: "role_id", object: "permission_id" },
        Relation::RoleParent => EdgeTable { table: "role_parents", subject: "child_role_id", object: "parent_role_id" },
    }
}

// Shared between the pool-backed store and the transaction handle.

async fn fetch_ids(conn: &mut SqliteConnection, sql: &str, id: Uuid) -> AppResult<HashSet<Uuid>> {
    let rows = sqlx::query(sql).bind(id.to_string()).fetch_all(&mut *conn).await?;
    Ok(ids_from_rows(&rows, "id")?.into_iter().collect())
}

async fn parents_of(conn: &mut SqliteConnection, hierarchy: Hierarchy, node_id: Uuid) -> AppResult<HashSet<Uuid>> {
    let sql = match hierarchy {
        Hierarchy::Role => "SELECT parent_role_id AS id FROM role_parents WHERE child_role_id = ?",
        Hierarchy::Permission => "SELECT parent_id AS id FROM permissions WHERE id = ? AND parent_id IS NOT NULL",
    };
    fetch_ids(conn, sql, node_id).await
}

async fn children_of(conn: &mut SqliteConnection, hierarchy: Hierarchy, node_id: Uuid) -> AppResult<HashSet<Uuid>> {
    let sql = match hierarchy {
        Hierarchy::Role => "SELECT child_role_id AS id FROM role_parents WHERE parent_role_id = ?",
        Hierarchy::Permission => "SELECT id FROM permissions WHERE parent_id = ?",
    };
    fetch_ids(conn, sql, node_id).await
}

async fn get_role(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Option<Role>> {
    let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?");
    sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .as_ref()
        .map(role_from_row)
        .transpose()
}

async fn get_permission(conn: &mut SqliteConnection, id: Uuid) -> AppResult<Option<Permission>> {
    let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = ?");
    sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .as_ref()
        .map(permission_from_row)
        .transpose()
}

async fn insert_edge(
    conn: &mut SqliteConnection,
    relation: Relation,
    subject_id: Uuid,
    object_id: Uuid,
    metadata: EdgeMetadata,
) -> AppResult<Assignment> {
    let t = edge_table(relation);
    let assignment = Assignment {
        id: Uuid::new_v4(),
        relation,
        subject_id,
        object_id,
        metadata,
        created_at: utc_now(),
    };

    let sql = format!(
        "INSERT INTO {} (id, {}, {}, assigned_by, notes, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        t.table, t.subject, t.object
    );
    sqlx::query(&sql)
        .bind(assignment.id.to_string())
        .bind(subject_id.to_string())
        .bind(object_id.to_string())
        .bind(assignment.metadata.assigned_by.map(|id| id.to_string()))
        .bind(&assignment.metadata.notes)
        .bind(assignment.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await?;

    Ok(assignment)
}

/// sqlx/SQLite-backed graph store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GraphStore for SqliteStore {
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    async fn find_user(&self, name: &str) -> AppResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE name = ?");
        sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    async fn get_role(&self, id: Uuid) -> AppResult<Option<Role>> {
        let mut conn = self.pool.acquire().await?;
        get_role(&mut conn, id).await
    }

    async fn find_role(&self, slug_or_name: &str) -> AppResult<Option<Role>> {
        let sql = format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE slug = ? OR name = ? \
             ORDER BY CASE WHEN slug = ? THEN 0 ELSE 1 END LIMIT 1"
        );
        sqlx::query(&sql)
            .bind(slug_or_name)
            .bind(slug_or_name)
            .bind(slug_or_name)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(role_from_row)
            .transpose()
    }

    async fn get_permission(&self, id: Uuid) -> AppResult<Option<Permission>> {
        let mut conn = self.pool.acquire().await?;
        get_permission(&mut conn, id).await
    }

    async fn find_permission(&self, slug_or_name: &str) -> AppResult<Option<Permission>> {
        let sql = format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE slug = ? OR name = ? \
             ORDER BY CASE WHEN slug = ? THEN 0 ELSE 1 END LIMIT 1"
        );
        sqlx::query(&sql)
            .bind(slug_or_name)
            .bind(slug_or_name)
            .bind(slug_or_name)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(permission_from_row)
            .transpose()
    }

    async fn list_roles(&self) -> AppResult<Vec<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY name");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(role_from_row).collect()
    }

    async fn list_permissions(&self) -> AppResult<Vec<Permission>> {
        let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY name");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(permission_from_row).collect()
    }

    async fn insert_user(&self, user: &User) -> AppResult<()> {
        sqlx::query("INSERT INTO users (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(user.id.to_string())
            .bind(&user.name)
            .bind(user.created_at.to_rfc3339())
            .bind(user.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_role(&self, role: &Role) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO roles (id, name, slug, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)"
        )
        .bind(role.id.to_string())
        .bind(&role.name)
        .bind(&role.slug)
        .bind(&role.description)
        .bind(role.created_at.to_rfc3339())
        .bind(role.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_permission(&self, permission: &Permission) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO permissions (id, name, slug, description, parent_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(permission.id.to_string())
        .bind(&permission.name)
        .bind(&permission.slug)
        .bind(&permission.description)
        .bind(permission.parent_id.map(|id| id.to_string()))
        .bind(permission.created_at.to_rfc3339())
        .bind(permission.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_role(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM roles WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_permission(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM permissions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn edge_exists(&self, relation: Relation, subject_id: Uuid, object_id: Uuid) -> AppResult<bool> {
        let t = edge_table(relation);
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ? AND {} = ?)",
            t.table, t.subject, t.object
        );
        let exists: bool = sqlx::query_scalar(&sql)
            .bind(subject_id.to_string())
            .bind(object_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn objects_for_subject(&self, relation: Relation, subject_id: Uuid) -> AppResult<HashSet<Uuid>> {
        let t = edge_table(relation);
        let sql = format!("SELECT {} AS id FROM {} WHERE {} = ?", t.object, t.table, t.subject);
        let mut conn = self.pool.acquire().await?;
        fetch_ids(&mut conn, &sql, subject_id).await
    }

    async fn parents_of(&self, hierarchy: Hierarchy, node_id: Uuid) -> AppResult<HashSet<Uuid>> {
        let mut conn = self.pool.acquire().await?;
        parents_of(&mut conn, hierarchy, node_id).await
    }

    async fn children_of(&self, hierarchy: Hierarchy, node_id: Uuid) -> AppResult<HashSet<Uuid>> {
        let mut conn = self.pool.acquire().await?;
        children_of(&mut conn, hierarchy, node_id).await
    }

    async fn insert_edge(
        &self,
        relation: Relation,
        subject_id: Uuid,
        object_id: Uuid,
        metadata: EdgeMetadata,
    ) -> AppResult<Assignment> {
        if relation.is_hierarchy() {
            return Err(AppError::bad_request(format!(
                "{relation} edges must be written inside a hierarchy transaction"
            )));
        }
        let mut conn = self.pool.acquire().await?;
        insert_edge(&mut conn, relation, subject_id, object_id, metadata).await
    }

    async fn remove_edge(&self, relation: Relation, subject_id: Uuid, object_id: Uuid) -> AppResult<Option<Assignment>> {
        let t = edge_table(relation);
        let sql = format!(
            "DELETE FROM {table} WHERE {s} = ? AND {o} = ? \
             RETURNING id, {s} AS subject_id, {o} AS object_id, assigned_by, notes, created_at",
            table = t.table,
            s = t.subject,
            o = t.object
        );
        sqlx::query(&sql)
            .bind(subject_id.to_string())
            .bind(object_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(|row| assignment_from_row(relation, row))
            .transpose()
    }

    async fn begin(&self, hierarchy: Hierarchy) -> AppResult<Box<dyn GraphTx>> {
        let mut tx = self.pool.begin().await?;

        // First statement is a write, so the transaction owns the write lock
        // before it reads any part of the graph.
        sqlx::query("UPDATE hierarchy_locks SET version = version + 1 WHERE hierarchy = ?")
            .bind(hierarchy.as_str())
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(SqliteTx { tx: Some(tx) }))
    }
}

/// Hierarchy write transaction. Rolled back by sqlx if dropped uncommitted.
struct SqliteTx {
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteTx {
    fn conn(&mut self) -> AppResult<&mut SqliteConnection> {
        self.tx
            .as_mut()
            .map(|tx| &mut **tx)
            .ok_or_else(|| AppError::internal("transaction already committed"))
    }
}

#[async_trait]
impl GraphTx for SqliteTx {
    async fn get_role(&mut self, id: Uuid) -> AppResult<Option<Role>> {
        get_role(self.conn()?, id).await
    }

    async fn get_permission(&mut self, id: Uuid) -> AppResult<Option<Permission>> {
        get_permission(self.conn()?, id).await
    }

    async fn parents_of(&mut self, hierarchy: Hierarchy, node_id: Uuid) -> AppResult<HashSet<Uuid>> {
        parents_of(self.conn()?, hierarchy, node_id).await
    }

    async fn children_of(&mut self, hierarchy: Hierarchy, node_id: Uuid) -> AppResult<HashSet<Uuid>> {
        children_of(self.conn()?, hierarchy, node_id).await
    }

    async fn insert_edge(
        &mut self,
        relation: Relation,
        subject_id: Uuid,
        object_id: Uuid,
        metadata: EdgeMetadata,
    ) -> AppResult<Assignment> {
        insert_edge(self.conn()?, relation, subject_id, object_id, metadata).await
    }

    async fn set_permission_parent(&mut self, permission_id: Uuid, parent_id: Option<Uuid>) -> AppResult<()> {
        let result = sqlx::query("UPDATE permissions SET parent_id = ?, updated_at = ? WHERE id = ?")
            .bind(parent_id.map(|id| id.to_string()))
            .bind(utc_now().to_rfc3339())
            .bind(permission_id.to_string())
            .execute(self.conn()?)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("permission {permission_id}")));
        }
        Ok(())
    }

    async fn commit(&mut self) -> AppResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| AppError::internal("transaction already committed"))?;
        tx.commit().await?;
        Ok(())
    }
}
