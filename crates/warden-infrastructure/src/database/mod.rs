//! SQLite-backed policy repository.
//!
//! Runs its migrations in code on startup. Enum columns are stored as
//! their canonical strings, timestamps as Unix epoch seconds and weekday
//! sets as comma-separated day numbers. List deletion cascades to
//! entries, time rules and quota rules through foreign keys.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use warden_domain::entities::{
    AuditEvent, EntryId, List, ListEntry, ListId, QuotaRule, QuotaRuleId, TimeOfDay, TimeRule,
    TimeRuleId, WeekdaySet,
};
use warden_domain::error::{Error, Result};
use warden_domain::ports::PolicyRepository;

use crate::config::DatabaseConfig;

/// SQLite implementation of [`PolicyRepository`].
pub struct SqlitePolicyRepository {
    pool: SqlitePool,
}

impl SqlitePolicyRepository {
    /// Open (creating if missing) the database at the configured path and
    /// run migrations.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be created or opened, or when a
    /// migration statement fails.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::database(format!("failed to create database directory: {e}")))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .foreign_keys(true);
        Self::connect(options, config.max_connections).await
    }

    /// Open an in-memory database (for testing only).
    ///
    /// # Errors
    ///
    /// Fails when a migration statement fails.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(Path::new(":memory:"))
            .foreign_keys(true);
        // A single connection keeps the in-memory database alive and shared.
        Self::connect(options, 1).await
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| Error::database_with_source("failed to open database", e))?;
        let repo = Self { pool };
        repo.run_migrations().await?;
        Ok(repo)
    }

    async fn run_migrations(&self) -> Result<()> {
        let statements = [
            r"
            CREATE TABLE IF NOT EXISTS lists (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                list_type TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            r"
            CREATE TABLE IF NOT EXISTS list_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                list_id INTEGER NOT NULL REFERENCES lists(id) ON DELETE CASCADE,
                entry_type TEXT NOT NULL,
                pattern_type TEXT NOT NULL,
                pattern TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1
            )",
            r"
            CREATE TABLE IF NOT EXISTS time_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                list_id INTEGER NOT NULL REFERENCES lists(id) ON DELETE CASCADE,
                name TEXT NOT NULL DEFAULT '',
                rule_type TEXT NOT NULL,
                days TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1
            )",
            r"
            CREATE TABLE IF NOT EXISTS quota_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                list_id INTEGER NOT NULL REFERENCES lists(id) ON DELETE CASCADE,
                name TEXT NOT NULL DEFAULT '',
                quota_type TEXT NOT NULL,
                limit_seconds INTEGER NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1
            )",
            r"
            CREATE TABLE IF NOT EXISTS quota_usage (
                rule_id INTEGER NOT NULL REFERENCES quota_rules(id) ON DELETE CASCADE,
                window_start INTEGER NOT NULL,
                used_seconds INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (rule_id, window_start)
            )",
            r"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                kind TEXT NOT NULL,
                subject_type TEXT,
                subject_value TEXT,
                action TEXT,
                list_id INTEGER,
                rule_id INTEGER,
                details TEXT NOT NULL DEFAULT ''
            )",
            "CREATE INDEX IF NOT EXISTS idx_entries_list ON list_entries(list_id)",
            "CREATE INDEX IF NOT EXISTS idx_time_rules_list ON time_rules(list_id)",
            "CREATE INDEX IF NOT EXISTS idx_quota_rules_list ON quota_rules(list_id)",
            "CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp)",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::database_with_source("migration failed", e))?;
        }
        Ok(())
    }
}

fn db_err(context: &str) -> impl Fn(sqlx::Error) -> Error + '_ {
    move |e| Error::database_with_source(context.to_owned(), e)
}

fn parse_enum<T: std::str::FromStr<Err = String>>(raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|e: String| Error::database(format!("corrupt enum column: {e}")))
}

fn epoch_to_utc(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn days_to_csv(days: &WeekdaySet) -> String {
    days.days()
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn csv_to_days(raw: &str) -> WeekdaySet {
    let days: Vec<u8> = raw
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    WeekdaySet::from_days(&days)
}

fn map_list(row: &SqliteRow) -> Result<List> {
    Ok(List {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        list_type: parse_enum(row.get::<&str, _>("list_type"))?,
        enabled: row.get::<i64, _>("enabled") != 0,
        created_at: epoch_to_utc(row.get("created_at")),
        updated_at: epoch_to_utc(row.get("updated_at")),
    })
}

fn map_entry(row: &SqliteRow) -> Result<ListEntry> {
    Ok(ListEntry {
        id: row.get("id"),
        list_id: row.get("list_id"),
        entry_type: parse_enum(row.get::<&str, _>("entry_type"))?,
        pattern_type: parse_enum(row.get::<&str, _>("pattern_type"))?,
        pattern: row.get("pattern"),
        enabled: row.get::<i64, _>("enabled") != 0,
    })
}

fn map_time_rule(row: &SqliteRow) -> Result<TimeRule> {
    Ok(TimeRule {
        id: row.get("id"),
        list_id: row.get("list_id"),
        name: row.get("name"),
        rule_type: parse_enum(row.get::<&str, _>("rule_type"))?,
        days: csv_to_days(row.get::<&str, _>("days")),
        start: TimeOfDay::parse(row.get::<&str, _>("start_time"))
            .map_err(|e| Error::database(format!("corrupt start_time: {e}")))?,
        end: TimeOfDay::parse(row.get::<&str, _>("end_time"))
            .map_err(|e| Error::database(format!("corrupt end_time: {e}")))?,
        enabled: row.get::<i64, _>("enabled") != 0,
    })
}

fn map_quota_rule(row: &SqliteRow) -> Result<QuotaRule> {
    Ok(QuotaRule {
        id: row.get("id"),
        list_id: row.get("list_id"),
        name: row.get("name"),
        quota_type: parse_enum(row.get::<&str, _>("quota_type"))?,
        limit_seconds: row.get::<i64, _>("limit_seconds").max(0) as u64,
        enabled: row.get::<i64, _>("enabled") != 0,
    })
}

fn map_audit(row: &SqliteRow) -> Result<AuditEvent> {
    Ok(AuditEvent {
        timestamp: epoch_to_utc(row.get("timestamp")),
        kind: parse_enum(row.get::<&str, _>("kind"))?,
        subject_type: row
            .get::<Option<&str>, _>("subject_type")
            .map(parse_enum)
            .transpose()?,
        subject_value: row.get("subject_value"),
        action: row
            .get::<Option<&str>, _>("action")
            .map(parse_enum)
            .transpose()?,
        list_id: row.get("list_id"),
        rule_id: row.get("rule_id"),
        details: row.get("details"),
    })
}

#[async_trait]
impl PolicyRepository for SqlitePolicyRepository {
    async fn create_list(&self, list: &List) -> Result<ListId> {
        let result = sqlx::query(
            "INSERT INTO lists (name, description, list_type, enabled, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&list.name)
        .bind(&list.description)
        .bind(list.list_type.as_str())
        .bind(i64::from(list.enabled))
        .bind(list.created_at.timestamp())
        .bind(list.updated_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err("failed to create list"))?;
        Ok(result.last_insert_rowid())
    }

    async fn get_list(&self, id: ListId) -> Result<List> {
        let row = sqlx::query("SELECT * FROM lists WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("failed to fetch list"))?
            .ok_or_else(|| Error::not_found(format!("list {id}")))?;
        map_list(&row)
    }

    async fn lists_enabled(&self) -> Result<Vec<List>> {
        let rows = sqlx::query("SELECT * FROM lists WHERE enabled = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("failed to fetch enabled lists"))?;
        rows.iter().map(map_list).collect()
    }

    async fn lists_all(&self) -> Result<Vec<List>> {
        let rows = sqlx::query("SELECT * FROM lists ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("failed to fetch lists"))?;
        rows.iter().map(map_list).collect()
    }

    async fn update_list(&self, list: &List) -> Result<()> {
        let result = sqlx::query(
            "UPDATE lists SET name = ?, description = ?, list_type = ?, enabled = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&list.name)
        .bind(&list.description)
        .bind(list.list_type.as_str())
        .bind(i64::from(list.enabled))
        .bind(list.updated_at.timestamp())
        .bind(list.id)
        .execute(&self.pool)
        .await
        .map_err(db_err("failed to update list"))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("list {}", list.id)));
        }
        Ok(())
    }

    async fn delete_list(&self, id: ListId) -> Result<()> {
        sqlx::query("DELETE FROM lists WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("failed to delete list"))?;
        Ok(())
    }

    async fn create_entry(&self, entry: &ListEntry) -> Result<EntryId> {
        let result = sqlx::query(
            "INSERT INTO list_entries (list_id, entry_type, pattern_type, pattern, enabled)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(entry.list_id)
        .bind(entry.entry_type.as_str())
        .bind(entry.pattern_type.as_str())
        .bind(&entry.pattern)
        .bind(i64::from(entry.enabled))
        .execute(&self.pool)
        .await
        .map_err(db_err("failed to create entry"))?;
        Ok(result.last_insert_rowid())
    }

    async fn entries_by_list(&self, list_id: ListId) -> Result<Vec<ListEntry>> {
        let rows = sqlx::query("SELECT * FROM list_entries WHERE list_id = ? ORDER BY id")
            .bind(list_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("failed to fetch entries"))?;
        rows.iter().map(map_entry).collect()
    }

    async fn update_entry(&self, entry: &ListEntry) -> Result<()> {
        let result = sqlx::query(
            "UPDATE list_entries SET entry_type = ?, pattern_type = ?, pattern = ?, enabled = ?
             WHERE id = ?",
        )
        .bind(entry.entry_type.as_str())
        .bind(entry.pattern_type.as_str())
        .bind(&entry.pattern)
        .bind(i64::from(entry.enabled))
        .bind(entry.id)
        .execute(&self.pool)
        .await
        .map_err(db_err("failed to update entry"))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("entry {}", entry.id)));
        }
        Ok(())
    }

    async fn delete_entry(&self, id: EntryId) -> Result<()> {
        sqlx::query("DELETE FROM list_entries WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("failed to delete entry"))?;
        Ok(())
    }

    async fn create_time_rule(&self, rule: &TimeRule) -> Result<TimeRuleId> {
        let result = sqlx::query(
            "INSERT INTO time_rules (list_id, name, rule_type, days, start_time, end_time, enabled)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(rule.list_id)
        .bind(&rule.name)
        .bind(rule.rule_type.as_str())
        .bind(days_to_csv(&rule.days))
        .bind(rule.start.to_string())
        .bind(rule.end.to_string())
        .bind(i64::from(rule.enabled))
        .execute(&self.pool)
        .await
        .map_err(db_err("failed to create time rule"))?;
        Ok(result.last_insert_rowid())
    }

    async fn time_rules_enabled(&self) -> Result<Vec<TimeRule>> {
        let rows = sqlx::query("SELECT * FROM time_rules WHERE enabled = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("failed to fetch time rules"))?;
        rows.iter().map(map_time_rule).collect()
    }

    async fn update_time_rule(&self, rule: &TimeRule) -> Result<()> {
        let result = sqlx::query(
            "UPDATE time_rules SET name = ?, rule_type = ?, days = ?, start_time = ?, end_time = ?, enabled = ?
             WHERE id = ?",
        )
        .bind(&rule.name)
        .bind(rule.rule_type.as_str())
        .bind(days_to_csv(&rule.days))
        .bind(rule.start.to_string())
        .bind(rule.end.to_string())
        .bind(i64::from(rule.enabled))
        .bind(rule.id)
        .execute(&self.pool)
        .await
        .map_err(db_err("failed to update time rule"))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("time rule {}", rule.id)));
        }
        Ok(())
    }

    async fn delete_time_rule(&self, id: TimeRuleId) -> Result<()> {
        sqlx::query("DELETE FROM time_rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("failed to delete time rule"))?;
        Ok(())
    }

    async fn create_quota_rule(&self, rule: &QuotaRule) -> Result<QuotaRuleId> {
        let result = sqlx::query(
            "INSERT INTO quota_rules (list_id, name, quota_type, limit_seconds, enabled)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(rule.list_id)
        .bind(&rule.name)
        .bind(rule.quota_type.as_str())
        .bind(rule.limit_seconds as i64)
        .bind(i64::from(rule.enabled))
        .execute(&self.pool)
        .await
        .map_err(db_err("failed to create quota rule"))?;
        Ok(result.last_insert_rowid())
    }

    async fn quota_rules_enabled(&self) -> Result<Vec<QuotaRule>> {
        let rows = sqlx::query("SELECT * FROM quota_rules WHERE enabled = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("failed to fetch quota rules"))?;
        rows.iter().map(map_quota_rule).collect()
    }

    async fn update_quota_rule(&self, rule: &QuotaRule) -> Result<()> {
        let result = sqlx::query(
            "UPDATE quota_rules SET name = ?, quota_type = ?, limit_seconds = ?, enabled = ?
             WHERE id = ?",
        )
        .bind(&rule.name)
        .bind(rule.quota_type.as_str())
        .bind(rule.limit_seconds as i64)
        .bind(i64::from(rule.enabled))
        .bind(rule.id)
        .execute(&self.pool)
        .await
        .map_err(db_err("failed to update quota rule"))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("quota rule {}", rule.id)));
        }
        Ok(())
    }

    async fn delete_quota_rule(&self, id: QuotaRuleId) -> Result<()> {
        sqlx::query("DELETE FROM quota_rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("failed to delete quota rule"))?;
        Ok(())
    }

    async fn quota_usage(&self, rule_id: QuotaRuleId, window_start: DateTime<Utc>) -> Result<u64> {
        let row = sqlx::query(
            "SELECT used_seconds FROM quota_usage WHERE rule_id = ? AND window_start = ?",
        )
        .bind(rule_id)
        .bind(window_start.timestamp())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("failed to fetch quota usage"))?;
        Ok(row.map_or(0, |r| r.get::<i64, _>("used_seconds").max(0) as u64))
    }

    async fn quota_usage_upsert(
        &self,
        rule_id: QuotaRuleId,
        window_start: DateTime<Utc>,
        used_seconds: u64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO quota_usage (rule_id, window_start, used_seconds)
             VALUES (?, ?, ?)
             ON CONFLICT (rule_id, window_start)
             DO UPDATE SET used_seconds = excluded.used_seconds",
        )
        .bind(rule_id)
        .bind(window_start.timestamp())
        .bind(used_seconds as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err("failed to upsert quota usage"))?;
        Ok(())
    }

    async fn audit_append(&self, event: &AuditEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log
                (timestamp, kind, subject_type, subject_value, action, list_id, rule_id, details)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.timestamp.timestamp())
        .bind(event.kind.as_str())
        .bind(event.subject_type.map(|t| t.as_str()))
        .bind(event.subject_value.as_deref())
        .bind(event.action.map(|a| a.as_str()))
        .bind(event.list_id)
        .bind(event.rule_id)
        .bind(&event.details)
        .execute(&self.pool)
        .await
        .map_err(db_err("failed to append audit event"))?;
        Ok(())
    }

    async fn audit_events_since(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM audit_log WHERE timestamp >= ? ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(since.timestamp())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("failed to fetch audit events"))?;
        rows.iter().map(map_audit).collect()
    }
}
