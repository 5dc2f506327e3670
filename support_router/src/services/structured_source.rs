//! Account and ticket records from the relational store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::errors::{ProviderError, ProviderResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    UserProfile,
    Ticket,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredRow {
    /// Stable reference such as `user:7` or `ticket:42`
    pub id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub kind: RecordKind,
    /// User the record belongs to; `None` when the store does not know
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

impl StructuredRow {
    /// Rows without a known owner belong to nobody.
    pub fn belongs_to(&self, user_id: &str) -> bool {
        self.owner_id.as_deref().map(str::trim) == Some(user_id.trim())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    /// Restrict to one kind; `None` returns profile and tickets
    pub kind: Option<RecordKind>,
    pub limit: usize,
}

/// Key-based lookup and simple filtered queries over account data.
#[async_trait]
pub trait StructuredDataSource: Send + Sync {
    async fn lookup(&self, key: &str) -> ProviderResult<Option<StructuredRow>>;

    async fn query(&self, filter: &RecordFilter) -> ProviderResult<Vec<StructuredRow>>;
}

/// Split `user:7` / `ticket:42` into kind and numeric id.
pub fn parse_record_key(key: &str) -> ProviderResult<(RecordKind, i32)> {
    let (prefix, raw_id) = key
        .split_once(':')
        .ok_or_else(|| ProviderError::InvalidRequest(format!("record key '{}' has no prefix", key)))?;

    let kind = match prefix {
        "user" => RecordKind::UserProfile,
        "ticket" => RecordKind::Ticket,
        other => {
            return Err(ProviderError::InvalidRequest(format!("unknown record prefix '{}'", other)))
        }
    };

    let id = raw_id
        .trim()
        .trim_start_matches('#')
        .parse::<i32>()
        .map_err(|_| ProviderError::InvalidRequest(format!("record id '{}' is not numeric", raw_id)))?;

    Ok((kind, id))
}

fn as_utc(value: Option<NaiveDateTime>) -> DateTime<Utc> {
    value
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or_else(Utc::now)
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i32,
    username: String,
    email: String,
    name: Option<String>,
    updated_at: Option<NaiveDateTime>,
}

impl UserRow {
    fn into_row(self) -> StructuredRow {
        StructuredRow {
            id: format!("user:{}", self.id),
            content: format!(
                "User account {} (username: {}, name: {}, email: {})",
                self.id,
                self.username,
                self.name.as_deref().unwrap_or("not set"),
                self.email
            ),
            timestamp: as_utc(self.updated_at),
            kind: RecordKind::UserProfile,
            owner_id: Some(self.id.to_string()),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TicketRow {
    id: i32,
    user_id: Option<i32>,
    title: String,
    description: Option<String>,
    status: Option<String>,
    priority: Option<String>,
    resolution: Option<String>,
    created_at: Option<NaiveDateTime>,
    updated_at: Option<NaiveDateTime>,
    closed_at: Option<NaiveDateTime>,
}

impl TicketRow {
    fn into_row(self) -> StructuredRow {
        let mut content = format!(
            "Ticket #{}: {} (status: {}, priority: {})",
            self.id,
            self.title,
            self.status.as_deref().unwrap_or("open"),
            self.priority.as_deref().unwrap_or("medium")
        );
        if let Some(created) = self.created_at {
            content.push_str(&format!("\nOpened: {}", created.format("%Y-%m-%d %H:%M")));
        }
        if let Some(closed) = self.closed_at {
            content.push_str(&format!("\nClosed: {}", closed.format("%Y-%m-%d %H:%M")));
        }
        if let Some(description) = self.description.filter(|d| !d.trim().is_empty()) {
            content.push_str(&format!("\nDescription: {}", description));
        }
        if let Some(resolution) = self.resolution.filter(|r| !r.trim().is_empty()) {
            content.push_str(&format!("\nResolution: {}", resolution));
        }

        StructuredRow {
            id: format!("ticket:{}", self.id),
            content,
            timestamp: as_utc(self.updated_at.or(self.created_at)),
            kind: RecordKind::Ticket,
            owner_id: self.user_id.map(|id| id.to_string()),
        }
    }
}

/// Postgres-backed account store over `app_user` and `support_ticket`.
pub struct PgSupportRepository {
    db_pool: PgPool,
}

impl PgSupportRepository {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Pool that connects on first use, so startup does not need the database.
    pub fn connect_lazy(url: &str, max_connections: u32) -> ProviderResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)?;
        Ok(Self::new(pool))
    }

    async fn fetch_user(&self, user_id: i32) -> ProviderResult<Option<StructuredRow>> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, username, email, name, updated_at
            FROM app_user
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(row.map(UserRow::into_row))
    }

    async fn fetch_ticket(&self, ticket_id: i32) -> ProviderResult<Option<StructuredRow>> {
        let row: Option<TicketRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, title, description, status, priority, resolution,
                   created_at, updated_at, closed_at
            FROM support_ticket
            WHERE id = $1
            "#,
        )
        .bind(ticket_id)
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(row.map(TicketRow::into_row))
    }

    async fn fetch_tickets_for_user(&self, user_id: i32, limit: usize) -> ProviderResult<Vec<StructuredRow>> {
        let rows: Vec<TicketRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, title, description, status, priority, resolution,
                   created_at, updated_at, closed_at
            FROM support_ticket
            WHERE user_id = $1
            ORDER BY COALESCE(updated_at, created_at) DESC NULLS LAST
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(rows.into_iter().map(TicketRow::into_row).collect())
    }
}

#[async_trait]
impl StructuredDataSource for PgSupportRepository {
    async fn lookup(&self, key: &str) -> ProviderResult<Option<StructuredRow>> {
        let (kind, id) = parse_record_key(key)?;
        debug!(key, "Structured lookup");

        match kind {
            RecordKind::UserProfile => self.fetch_user(id).await,
            RecordKind::Ticket => self.fetch_ticket(id).await,
        }
    }

    async fn query(&self, filter: &RecordFilter) -> ProviderResult<Vec<StructuredRow>> {
        // Sessions are not persisted here; only a user id can scope the query
        let Some(raw_user_id) = filter.user_id.as_deref() else {
            debug!(session_id = ?filter.session_id, "No user id on structured query, returning nothing");
            return Ok(Vec::new());
        };

        let user_id = match raw_user_id.trim().parse::<i32>() {
            Ok(id) => id,
            Err(_) => {
                return Err(ProviderError::InvalidRequest(format!(
                    "user id '{}' is not numeric",
                    raw_user_id
                )))
            }
        };

        let limit = filter.limit.max(1);
        let mut rows = Vec::new();

        if filter.kind != Some(RecordKind::Ticket) {
            if let Some(profile) = self.fetch_user(user_id).await? {
                rows.push(profile);
            }
        }
        if filter.kind != Some(RecordKind::UserProfile) {
            rows.extend(self.fetch_tickets_for_user(user_id, limit).await?);
        }
        rows.truncate(limit);

        info!(user_id, rows = rows.len(), "✅ Fetched account records from Postgres");
        Ok(rows)
    }
}
