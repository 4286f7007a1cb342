//! Storage layer: SQLite schemas and helpers.
//!
//! Holds DB pool setup, the migration runner, the project registry and the
//! append-only file routing audit log.

use sqlx::sqlite::SqlitePoolOptions;
pub use sqlx::SqlitePool;
use tracing::debug;

pub mod models;

use models::{FileRouting, NewFileRouting, Project};

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let mut url = database_url.to_string();
    if !database_url.starts_with("sqlite:") {
        let path = std::path::PathBuf::from(database_url);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let norm = path.to_string_lossy().replace('\\', "/");
        if path.is_absolute() {
            url = format!("sqlite:///{}?mode=rwc", norm.trim_start_matches('/'));
        } else {
            url = format!("sqlite://{}?mode=rwc", norm);
        }
    }
    let mut opts = SqlitePoolOptions::new();
    if url.contains("memory") {
        opts = opts.max_connections(1);
    } else {
        opts = opts.max_connections(5);
    }
    let pool = opts.connect(&url).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    // Idempotent; applies crates/storage/migrations.
    sqlx::migrate!("./migrations").run(pool).await?;
    debug!("migrations applied");
    Ok(())
}

pub async fn upsert_project(
    pool: &SqlitePool,
    code: &str,
    name: &str,
    client: Option<&str>,
) -> anyhow::Result<Project> {
    sqlx::query(
        r#"
        INSERT INTO projects (code, name, client)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(code) DO UPDATE SET
            name = excluded.name,
            client = COALESCE(excluded.client, projects.client)
        "#,
    )
    .bind(code)
    .bind(name)
    .bind(client)
    .execute(pool)
    .await?;
    project_by_code(pool, code)
        .await?
        .ok_or_else(|| anyhow::anyhow!("project {} vanished after upsert", code))
}

pub async fn project_by_code(pool: &SqlitePool, code: &str) -> anyhow::Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE code = ?1")
        .bind(code)
        .fetch_optional(pool)
        .await?;
    Ok(project)
}

/// Binds a drive folder to an existing project.
pub async fn link_project_folder(
    pool: &SqlitePool,
    code: &str,
    drive_folder: &str,
) -> anyhow::Result<Project> {
    let res = sqlx::query("UPDATE projects SET drive_folder = ?2 WHERE code = ?1")
        .bind(code)
        .bind(drive_folder)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        anyhow::bail!("unknown project code: {}", code);
    }
    project_by_code(pool, code)
        .await?
        .ok_or_else(|| anyhow::anyhow!("unknown project code: {}", code))
}

pub async fn insert_file_routing(pool: &SqlitePool, row: &NewFileRouting) -> anyhow::Result<i64> {
    let res = sqlx::query(
        r#"
        INSERT INTO file_routings
            (project_id, file_name, file_type, suggested_path, actual_path, confidence, method)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(row.project_id)
    .bind(&row.file_name)
    .bind(&row.file_type)
    .bind(&row.suggested_path)
    .bind(&row.actual_path)
    .bind(row.confidence)
    .bind(&row.method)
    .execute(pool)
    .await?;
    debug!(project_id = row.project_id, file = %row.file_name, method = %row.method, "routing recorded");
    Ok(res.last_insert_rowid())
}

pub async fn file_routings_for_project(
    pool: &SqlitePool,
    project_id: i64,
) -> anyhow::Result<Vec<FileRouting>> {
    let rows = sqlx::query_as::<_, FileRouting>(
        "SELECT * FROM file_routings WHERE project_id = ?1 ORDER BY id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        let pool = connect("sqlite::memory:").await.unwrap();
        migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn project_upsert_and_link() {
        let pool = memory_pool().await;
        let p = upsert_project(&pool, "25ABC123", "Ponte", Some("Comune"))
            .await
            .unwrap();
        assert_eq!(p.code, "25ABC123");
        assert!(p.drive_folder.is_none());

        let again = upsert_project(&pool, "25ABC123", "Ponte sul fiume", None)
            .await
            .unwrap();
        assert_eq!(again.id, p.id);
        assert_eq!(again.client.as_deref(), Some("Comune"));

        let linked = link_project_folder(&pool, "25ABC123", "Commesse/25ABC123")
            .await
            .unwrap();
        assert_eq!(linked.drive_folder.as_deref(), Some("Commesse/25ABC123"));

        assert!(link_project_folder(&pool, "NOPE", "x").await.is_err());
    }

    #[tokio::test]
    async fn routings_are_listed_in_insert_order() {
        let pool = memory_pool().await;
        let p = upsert_project(&pool, "25XYZ999", "Scuola", None).await.unwrap();
        for name in ["a.pdf", "b.dwg"] {
            insert_file_routing(
                &pool,
                &NewFileRouting {
                    project_id: p.id,
                    file_name: name.into(),
                    file_type: None,
                    suggested_path: "MATERIALE_RICEVUTO/".into(),
                    actual_path: "RELAZIONI/".into(),
                    confidence: 0.5,
                    method: "fallback".into(),
                },
            )
            .await
            .unwrap();
        }
        let rows = file_routings_for_project(&pool, p.id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].file_name, "a.pdf");
        assert_eq!(rows[1].actual_path, "RELAZIONI/");
    }
}
