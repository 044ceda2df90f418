use crate::errors::StoreResult;
use crate::metrics_defs::DIRECTORY_QUERY_DURATION;
use crate::store::{EventStore, TenantDirectory, UsageStore};
use crate::types::{
    Credential, EventRow, Project, PullRecord, Tenant, TenantConfig, TenantProject,
    TenantWithToken, UsageRow, WriteToken,
};
use async_trait::async_trait;
use shared::histogram;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Instant;

// SQLite caps bound parameters at 999 per statement.
const USAGE_ROWS_PER_BATCH: usize = 160; // 6 params each
const EVENTS_PER_BATCH: usize = 110; // 8 params each

// Newest active credential per tenant.
const ACTIVE_CREDENTIAL: &str = "SELECT id FROM credentials \
    WHERE tenant_id = t.id AND active = 1 ORDER BY rowid DESC LIMIT 1";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to an in-memory database sees its own copy, and
        // the data is gone once that connection closes.
        let pool_options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections)
        };
        let pool = pool_options.connect_with(options).await?;

        tracing::info!(url, "Connected to SQLite store");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Store migrations applied");
        Ok(())
    }
}

/// Seeding for tests. Production data is written by the migrations and by
/// whatever owns the directory.
#[cfg(test)]
impl SqliteStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> StoreResult<()> {
        sqlx::query("INSERT INTO tenants (id, slug, name) VALUES (?, ?, ?)")
            .bind(&tenant.id)
            .bind(&tenant.slug)
            .bind(&tenant.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_credential(&self, credential: &Credential) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO credentials (id, tenant_id, api_key_encrypted, environment_id, active, rotated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&credential.id)
        .bind(&credential.tenant_id)
        .bind(&credential.api_key_encrypted)
        .bind(&credential.environment_id)
        .bind(credential.active)
        .bind(&credential.rotated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_project(&self, project: &Project) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, tenant_id, project_id, display_name, active)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&project.id)
        .bind(&project.tenant_id)
        .bind(&project.project_id)
        .bind(&project.display_name)
        .bind(project.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_write_token(&self, token: &WriteToken) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO event_write_tokens (id, tenant_id, token, active, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&token.id)
        .bind(&token.tenant_id)
        .bind(&token.token)
        .bind(token.active)
        .bind(&token.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_origin(&self, tenant_id: &str, origin: &str) -> StoreResult<()> {
        sqlx::query("INSERT OR IGNORE INTO tenant_origins (tenant_id, origin) VALUES (?, ?)")
            .bind(tenant_id)
            .bind(origin)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn record_duration(query: &'static str, started: Instant) {
    histogram!(DIRECTORY_QUERY_DURATION, "query" => query).record(started.elapsed().as_secs_f64());
}

fn tenant_from_row(row: &SqliteRow) -> StoreResult<Tenant> {
    Ok(Tenant {
        id: row.try_get("tenant_id")?,
        slug: row.try_get("tenant_slug")?,
        name: row.try_get("tenant_name")?,
    })
}

fn credential_from_row(row: &SqliteRow) -> StoreResult<Credential> {
    Ok(Credential {
        id: row.try_get("credential_id")?,
        tenant_id: row.try_get("tenant_id")?,
        api_key_encrypted: row.try_get("api_key_encrypted")?,
        environment_id: row.try_get("environment_id")?,
        active: row.try_get("credential_active")?,
        rotated_at: row.try_get("rotated_at")?,
    })
}

fn project_from_row(row: &SqliteRow) -> StoreResult<Project> {
    Ok(Project {
        id: row.try_get("project_row_id")?,
        tenant_id: row.try_get("tenant_id")?,
        project_id: row.try_get("project_id")?,
        display_name: row.try_get("display_name")?,
        active: row.try_get("project_active")?,
    })
}

#[async_trait]
impl TenantDirectory for SqliteStore {
    async fn list_active_projects(&self) -> StoreResult<Vec<TenantProject>> {
        let started = Instant::now();
        let rows = sqlx::query(&format!(
            r#"
            SELECT
                t.id AS tenant_id, t.slug AS tenant_slug, t.name AS tenant_name,
                c.id AS credential_id, c.api_key_encrypted, c.environment_id,
                c.active AS credential_active, c.rotated_at,
                p.id AS project_row_id, p.project_id, p.display_name, p.active AS project_active
            FROM tenants t
            JOIN credentials c ON c.id = ({ACTIVE_CREDENTIAL})
            JOIN projects p ON p.tenant_id = t.id AND p.active = 1
            ORDER BY t.slug, p.rowid
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        record_duration("list_active_projects", started);

        rows.iter()
            .map(|row| {
                Ok(TenantProject {
                    tenant: tenant_from_row(row)?,
                    credential: credential_from_row(row)?,
                    project: project_from_row(row)?,
                })
            })
            .collect()
    }

    async fn fetch_tenant_config(&self, slug: &str) -> StoreResult<Option<TenantConfig>> {
        let started = Instant::now();
        let rows = sqlx::query(&format!(
            r#"
            SELECT
                t.id AS tenant_id, t.slug AS tenant_slug, t.name AS tenant_name,
                c.id AS credential_id, c.api_key_encrypted, c.environment_id,
                c.active AS credential_active, c.rotated_at,
                p.id AS project_row_id, p.project_id, p.display_name, p.active AS project_active
            FROM tenants t
            JOIN credentials c ON c.id = ({ACTIVE_CREDENTIAL})
            JOIN projects p ON p.tenant_id = t.id AND p.active = 1
            WHERE t.slug = ?
            ORDER BY p.rowid
            "#
        ))
        .bind(slug)
        .fetch_all(&self.pool)
        .await?;
        record_duration("fetch_tenant_config", started);

        let Some(first) = rows.first() else {
            return Ok(None);
        };

        let projects = rows
            .iter()
            .map(project_from_row)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Some(TenantConfig {
            tenant: tenant_from_row(first)?,
            credential: credential_from_row(first)?,
            projects,
        }))
    }

    async fn tenant_for_write_token(&self, token: &str) -> StoreResult<Option<TenantWithToken>> {
        let started = Instant::now();
        let row = sqlx::query(
            r#"
            SELECT
                t.id AS tenant_id, t.slug AS tenant_slug, t.name AS tenant_name,
                w.id AS token_id, w.token, w.active, w.created_at
            FROM event_write_tokens w
            JOIN tenants t ON t.id = w.tenant_id
            WHERE w.token = ? AND w.active = 1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        record_duration("tenant_for_write_token", started);

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(TenantWithToken {
            tenant: tenant_from_row(&row)?,
            token: WriteToken {
                id: row.try_get("token_id")?,
                tenant_id: row.try_get("tenant_id")?,
                token: row.try_get("token")?,
                active: row.try_get("active")?,
                created_at: row.try_get("created_at")?,
            },
        }))
    }

    async fn allowed_origins(&self, tenant_id: &str) -> StoreResult<Vec<String>> {
        let origins = sqlx::query_scalar(
            "SELECT origin FROM tenant_origins WHERE tenant_id = ? ORDER BY origin",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(origins)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl UsageStore for SqliteStore {
    async fn upsert_usage(&self, rows: &[UsageRow]) -> StoreResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let mut inserted = 0;
        let mut tx = self.pool.begin().await?;

        for chunk in rows.chunks(USAGE_ROWS_PER_BATCH) {
            let placeholders: Vec<&str> = chunk.iter().map(|_| "(?, ?, ?, ?, ?, ?)").collect();
            let query = format!(
                "INSERT OR IGNORE INTO usage_rows (dedupe_key, tenant_id, project_id, metric, period, data) VALUES {}",
                placeholders.join(", ")
            );

            let mut builder = sqlx::query(&query);
            for row in chunk {
                builder = builder
                    .bind(row.dedupe_key())
                    .bind(&row.tenant_id)
                    .bind(&row.project_id)
                    .bind(&row.metric)
                    .bind(&row.period)
                    .bind(serde_json::to_string(&row.data)?);
            }

            inserted += builder.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        record_duration("upsert_usage", started);
        Ok(inserted)
    }

    async fn append_pull(&self, record: &PullRecord) -> StoreResult<()> {
        let cursor = record.cursor.as_ref().map(serde_json::to_string).transpose()?;
        let error = record.error.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO pulls (tenant_id, project_id, metric, window_start, window_end, cursor, status, error_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.tenant_id)
        .bind(&record.project_id)
        .bind(&record.metric)
        .bind(&record.window_start)
        .bind(&record.window_end)
        .bind(cursor)
        .bind(record.status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn insert_events(&self, rows: &[EventRow]) -> StoreResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let mut inserted = 0;
        let mut tx = self.pool.begin().await?;

        for chunk in rows.chunks(EVENTS_PER_BATCH) {
            let placeholders: Vec<&str> = chunk
                .iter()
                .map(|_| "(?, ?, ?, ?, ?, ?, ?, ?)")
                .collect();
            let query = format!(
                r#"
                INSERT OR IGNORE INTO events_raw (
                    event_id, tenant_id, project_id, event_name, occurred_at,
                    user_id, session_id, properties
                )
                VALUES {}
                "#,
                placeholders.join(", ")
            );

            let mut builder = sqlx::query(&query);
            for row in chunk {
                builder = builder
                    .bind(&row.event_id)
                    .bind(&row.tenant_id)
                    .bind(&row.project_id)
                    .bind(&row.event_name)
                    .bind(&row.occurred_at)
                    .bind(&row.user_id)
                    .bind(&row.session_id)
                    .bind(serde_json::to_string(&row.properties)?);
            }

            inserted += builder.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        record_duration("insert_events", started);
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PullStatus;
    use serde_json::json;

    async fn create_test_store() -> SqliteStore {
        let store = SqliteStore::connect("sqlite::memory:", 5)
            .await
            .expect("Failed to create in-memory SQLite pool");
        store.migrate().await.expect("Failed to run migrations");
        store
    }

    async fn seed(store: &SqliteStore, id: &str, slug: &str, projects: &[&str]) -> Tenant {
        let tenant = Tenant::new(id, slug, slug.to_uppercase());
        store.insert_tenant(&tenant).await.unwrap();
        store
            .insert_credential(&Credential {
                id: format!("{id}-cred"),
                tenant_id: id.into(),
                api_key_encrypted: format!("encrypted:{slug}-key"),
                environment_id: Some("production".into()),
                active: true,
                rotated_at: None,
            })
            .await
            .unwrap();
        for project in projects {
            store
                .insert_project(&Project {
                    id: format!("{id}-{project}"),
                    tenant_id: id.into(),
                    project_id: (*project).into(),
                    display_name: None,
                    active: true,
                })
                .await
                .unwrap();
        }
        tenant
    }

    fn usage_row(period: Option<&str>, count: i64) -> UsageRow {
        UsageRow {
            tenant_id: "t1".into(),
            project_id: "p1".into(),
            metric: "interactions".into(),
            period: period.map(String::from),
            data: json!({"count": count}),
        }
    }

    fn event(id: &str) -> EventRow {
        EventRow {
            event_id: id.into(),
            tenant_id: "t1".into(),
            project_id: Some("p1".into()),
            event_name: "signup".into(),
            occurred_at: "2025-03-01T00:00:00.000Z".into(),
            user_id: Some("u1".into()),
            session_id: None,
            properties: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_list_active_projects() {
        let store = create_test_store().await;
        seed(&store, "t2", "zeta", &["z1"]).await;
        seed(&store, "t1", "acme", &["a2", "a1"]).await;
        // No credential, so never listed
        store
            .insert_tenant(&Tenant::new("t3", "bare", "Bare"))
            .await
            .unwrap();
        store
            .insert_project(&Project {
                id: "t3-b1".into(),
                tenant_id: "t3".into(),
                project_id: "b1".into(),
                display_name: None,
                active: true,
            })
            .await
            .unwrap();

        let entries = store.list_active_projects().await.unwrap();
        let ids: Vec<(&str, &str)> = entries
            .iter()
            .map(|e| (e.tenant.slug.as_str(), e.project.project_id.as_str()))
            .collect();
        // Projects keep their creation order within a tenant
        assert_eq!(ids, vec![("acme", "a2"), ("acme", "a1"), ("zeta", "z1")]);
        assert_eq!(entries[0].credential.api_key_encrypted, "encrypted:acme-key");
    }

    #[tokio::test]
    async fn test_fetch_tenant_config() {
        let store = create_test_store().await;
        seed(&store, "t1", "acme", &["a1", "a2"]).await;
        store
            .insert_credential(&Credential {
                id: "t1-cred-2".into(),
                tenant_id: "t1".into(),
                api_key_encrypted: "encrypted:rotated".into(),
                environment_id: None,
                active: true,
                rotated_at: Some("2025-03-01T00:00:00Z".into()),
            })
            .await
            .unwrap();

        let config = store.fetch_tenant_config("acme").await.unwrap().unwrap();
        assert_eq!(config.tenant.name, "ACME");
        assert_eq!(config.credential.id, "t1-cred-2");
        assert_eq!(config.projects.len(), 2);

        assert!(store.fetch_tenant_config("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_token_lookup() {
        let store = create_test_store().await;
        seed(&store, "t1", "acme", &["a1"]).await;
        for (id, token, active) in [("w1", "live", true), ("w2", "revoked", false)] {
            store
                .insert_write_token(&WriteToken {
                    id: id.into(),
                    tenant_id: "t1".into(),
                    token: token.into(),
                    active,
                    created_at: "2025-03-01T00:00:00Z".into(),
                })
                .await
                .unwrap();
        }
        store.insert_origin("t1", "https://b.example").await.unwrap();
        store.insert_origin("t1", "https://a.example").await.unwrap();

        let found = store.tenant_for_write_token("live").await.unwrap().unwrap();
        assert_eq!(found.tenant.slug, "acme");
        assert_eq!(found.token.id, "w1");
        assert!(store.tenant_for_write_token("revoked").await.unwrap().is_none());
        assert_eq!(
            store.allowed_origins("t1").await.unwrap(),
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[tokio::test]
    async fn test_upsert_usage_is_idempotent() {
        let store = create_test_store().await;
        let rows = vec![
            usage_row(Some("2025-03-01T00:00:00.000Z"), 1),
            usage_row(None, 2),
        ];

        assert_eq!(store.upsert_usage(&rows).await.unwrap(), 2);
        // Null periods still collide on the dedupe key
        assert_eq!(store.upsert_usage(&rows).await.unwrap(), 0);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage_rows")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_upsert_usage_spans_batches() {
        let store = create_test_store().await;
        let rows: Vec<UsageRow> = (0..USAGE_ROWS_PER_BATCH as i64 * 2 + 3)
            .map(|i| usage_row(None, i))
            .collect();

        assert_eq!(store.upsert_usage(&rows).await.unwrap(), rows.len() as u64);
    }

    #[tokio::test]
    async fn test_pulls_are_append_only() {
        let store = create_test_store().await;
        let record = PullRecord {
            tenant_id: "t1".into(),
            project_id: "p1".into(),
            metric: "interactions".into(),
            window_start: "2025-03-01T00:00:00.000Z".into(),
            window_end: "2025-03-02T00:00:00.000Z".into(),
            cursor: Some(json!("next")),
            status: PullStatus::Succeeded,
            error: None,
        };
        store.append_pull(&record).await.unwrap();
        store
            .append_pull(&PullRecord {
                status: PullStatus::Failed,
                cursor: None,
                error: Some(json!({"message": "boom"})),
                ..record
            })
            .await
            .unwrap();

        let statuses: Vec<String> = sqlx::query_scalar("SELECT status FROM pulls ORDER BY id")
            .fetch_all(store.pool())
            .await
            .unwrap();
        assert_eq!(statuses, vec!["succeeded", "failed"]);

        assert!(sqlx::query("UPDATE pulls SET status = 'failed'")
            .execute(store.pool())
            .await
            .is_err());
        assert!(sqlx::query("DELETE FROM pulls")
            .execute(store.pool())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_insert_events_ignores_duplicates() {
        let store = create_test_store().await;
        let first = event("6f1c1c2e-8a4b-4c6d-9e7f-0a1b2c3d4e5f");
        let second = event("0b8e6a52-3f7d-4e0a-8c21-5d9f3b7a1c44");

        assert_eq!(
            store
                .insert_events(&[first.clone(), second.clone()])
                .await
                .unwrap(),
            2
        );
        assert_eq!(store.insert_events(&[first]).await.unwrap(), 0);
    }
}
