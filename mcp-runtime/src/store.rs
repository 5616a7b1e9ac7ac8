use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use lattice_core::error::Error;
use lattice_core::records::{IssueData, class, table};

/// Direct access to the platform's backing store. Used for every write and
/// for the reads the realtime API does not expose. This path is separate
/// from the socket and carries no coordination with it — the platform's own
/// server is a concurrent writer we do not control.
pub struct Store {
    pool: PgPool,
}

/// Common column shape shared by every co-written table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecordRow {
    #[sqlx(rename = "workspaceId")]
    pub workspace_id: String,
    #[sqlx(rename = "_id")]
    pub id: String,
    #[sqlx(rename = "_class")]
    pub class: String,
    pub space: String,
    #[sqlx(rename = "modifiedBy")]
    pub modified_by: String,
    #[sqlx(rename = "createdBy")]
    pub created_by: String,
    #[sqlx(rename = "modifiedOn")]
    pub modified_on: i64,
    #[sqlx(rename = "createdOn")]
    pub created_on: i64,
    #[sqlx(rename = "attachedTo")]
    pub attached_to: Option<String>,
    #[sqlx(rename = "integrityHash")]
    pub integrity_hash: Option<String>,
    pub data: Value,
}

impl RecordRow {
    /// The issue payload of a `task` row. Tolerates co-writer payloads with
    /// missing fields; unknown fields ride along in `extra`.
    pub fn issue_data(&self) -> Result<IssueData, Error> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            Error::Configuration(format!("task row {} has an unreadable payload: {e}", self.id))
        })
    }
}

/// Field set for one record insert. `object_*` applies to `tx` rows only.
#[derive(Debug)]
pub struct NewRecord<'a> {
    pub workspace_id: &'a str,
    pub id: &'a str,
    pub class: &'a str,
    pub space: &'a str,
    pub modified_by: &'a str,
    pub created_by: &'a str,
    pub timestamp: i64,
    pub attached_to: Option<&'a str>,
    pub integrity_hash: &'a str,
    pub data: Value,
}

const RECORD_COLUMNS: &str = r#""workspaceId", "_id", "_class", space, "modifiedBy", "createdBy",
       "modifiedOn", "createdOn", "attachedTo", "integrityHash", data"#;

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn insert(&self, table: &str, record: &NewRecord<'_>) -> Result<(), Error> {
        let sql = format!(
            r#"
            INSERT INTO {table}
                ("workspaceId", "_id", "_class", space, "modifiedBy", "createdBy",
                 "modifiedOn", "createdOn", "attachedTo", "integrityHash", data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#
        );
        sqlx::query(&sql)
            .bind(record.workspace_id)
            .bind(record.id)
            .bind(record.class)
            .bind(record.space)
            .bind(record.modified_by)
            .bind(record.created_by)
            .bind(record.timestamp)
            .bind(record.timestamp)
            .bind(record.attached_to)
            .bind(record.integrity_hash)
            .bind(&record.data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Transaction-log insert: the common shape plus the object reference
    /// columns the `tx` table carries.
    pub async fn insert_tx(
        &self,
        record: &NewRecord<'_>,
        object_id: &str,
        object_space: &str,
    ) -> Result<(), Error> {
        let sql = format!(
            r#"
            INSERT INTO {}
                ("workspaceId", "_id", "_class", space, "modifiedBy", "createdBy",
                 "modifiedOn", "createdOn", "attachedTo", "integrityHash", data,
                 "objectId", "objectSpace")
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
            table::TX
        );
        sqlx::query(&sql)
            .bind(record.workspace_id)
            .bind(record.id)
            .bind(record.class)
            .bind(record.space)
            .bind(record.modified_by)
            .bind(record.created_by)
            .bind(record.timestamp)
            .bind(record.timestamp)
            .bind(record.attached_to)
            .bind(record.integrity_hash)
            .bind(&record.data)
            .bind(object_id)
            .bind(object_space)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Primary-record lookup by the human-facing identifier. Ordered by
    /// numeric sequence descending so a duplicate identifier left behind by
    /// a soft-deleted row resolves to the live, highest-sequence record.
    pub async fn find_issue_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<RecordRow>, Error> {
        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM {} WHERE "_class" = $1 AND data->>'identifier' = $2
            ORDER BY COALESCE((data->>'number')::bigint, 0) DESC
            LIMIT 1
            "#,
            table::TASK
        );
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(class::ISSUE)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Identifiers of every issue in a project space; the input of the
    /// next-sequence computation.
    pub async fn sibling_identifiers(&self, space: &str) -> Result<Vec<String>, Error> {
        let sql = format!(
            r#"
            SELECT data->>'identifier'
            FROM {} WHERE space = $1 AND "_class" = $2 AND data->>'identifier' IS NOT NULL
            "#,
            table::TASK
        );
        let identifiers = sqlx::query_scalar::<_, String>(&sql)
            .bind(space)
            .bind(class::ISSUE)
            .fetch_all(&self.pool)
            .await?;
        Ok(identifiers)
    }

    /// Any record in a space, used to probe workspace scoping off a sibling.
    pub async fn sample_in_space(
        &self,
        table: &str,
        space: &str,
    ) -> Result<Option<RecordRow>, Error> {
        let sql = format!(
            r#"SELECT {RECORD_COLUMNS} FROM {table} WHERE space = $1 LIMIT 1"#
        );
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(space)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Last-resort workspace probe: any task row anywhere.
    pub async fn any_task(&self) -> Result<Option<RecordRow>, Error> {
        let sql = format!(r#"SELECT {RECORD_COLUMNS} FROM {} LIMIT 1"#, table::TASK);
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn update_record_data(
        &self,
        table: &str,
        id: &str,
        data: &Value,
        integrity_hash: &str,
        modified_by: &str,
        modified_on: i64,
    ) -> Result<(), Error> {
        let sql = format!(
            r#"
            UPDATE {table}
            SET data = $2, "integrityHash" = $3, "modifiedBy" = $4, "modifiedOn" = $5
            WHERE "_id" = $1
            "#
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(data)
            .bind(integrity_hash)
            .bind(modified_by)
            .bind(modified_on)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_record(&self, table: &str, id: &str) -> Result<(), Error> {
        let sql = format!(r#"DELETE FROM {table} WHERE "_id" = $1"#);
        sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    /// Activity rows attached to an object, restricted to the given classes,
    /// oldest first.
    pub async fn activity_for(
        &self,
        attached_to: &str,
        classes: &[&str],
    ) -> Result<Vec<RecordRow>, Error> {
        let classes: Vec<String> = classes.iter().map(|c| c.to_string()).collect();
        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM {} WHERE "attachedTo" = $1 AND "_class" = ANY($2)
            ORDER BY "createdOn" ASC
            "#,
            table::ACTIVITY
        );
        let rows = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(attached_to)
            .bind(&classes)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn activity_by_id(&self, id: &str) -> Result<Option<RecordRow>, Error> {
        let sql = format!(
            r#"SELECT {RECORD_COLUMNS} FROM {} WHERE "_id" = $1"#,
            table::ACTIVITY
        );
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn task_by_id(&self, id: &str) -> Result<Option<RecordRow>, Error> {
        let sql = format!(
            r#"SELECT {RECORD_COLUMNS} FROM {} WHERE "_id" = $1"#,
            table::TASK
        );
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn issues_in_space(&self, space: &str, limit: i64) -> Result<Vec<RecordRow>, Error> {
        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM {} WHERE space = $1 AND "_class" = $2
            ORDER BY COALESCE((data->>'number')::bigint, 0) DESC
            LIMIT $3
            "#,
            table::TASK
        );
        let rows = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(space)
            .bind(class::ISSUE)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Fallback default status when the project record does not carry one.
    pub async fn first_status_in_space(&self, space: &str) -> Result<Option<RecordRow>, Error> {
        let sql = format!(
            r#"SELECT {RECORD_COLUMNS} FROM {} WHERE space = $1 ORDER BY "createdOn" ASC LIMIT 1"#,
            table::STATUS
        );
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(space)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn find_tag_element(
        &self,
        workspace_id: &str,
        title: &str,
    ) -> Result<Option<RecordRow>, Error> {
        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM {} WHERE "workspaceId" = $1 AND "_class" = $2 AND data->>'title' = $3
            LIMIT 1
            "#,
            table::TAGS
        );
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(workspace_id)
            .bind(class::TAG_ELEMENT)
            .bind(title)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row_with_data(data: Value) -> RecordRow {
        RecordRow {
            workspace_id: "ws".into(),
            id: "rec".into(),
            class: class::ISSUE.into(),
            space: "space".into(),
            modified_by: "who".into(),
            created_by: "who".into(),
            modified_on: 0,
            created_on: 0,
            attached_to: None,
            integrity_hash: None,
            data,
        }
    }

    #[test]
    fn issue_data_tolerates_sparse_co_writer_payloads() {
        let row = row_with_data(json!({"title": "t", "identifier": "P-1", "number": 1}));
        let data = row.issue_data().expect("sparse payload should parse");
        assert_eq!(data.title, "t");
        assert_eq!(data.comments, 0);
    }

    #[test]
    fn issue_data_rejects_non_object_payloads() {
        let row = row_with_data(json!("scalar"));
        let err = row.issue_data().expect_err("scalar payload must not parse");
        assert_eq!(err.code(), "configuration_error");
    }
}
