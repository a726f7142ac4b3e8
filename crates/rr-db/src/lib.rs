//! Storage layer for notification rules.
//!
//! Rules are persisted with `rusqlite`, one row per `(scope, identifier)`.
//!
//! # Thread Safety
//!
//! [`RuleStore`] wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! Long-running services load a [`RuleBook`] snapshot with
//! [`RuleStore::load_rule_book`] and resolve against that instead.
//!
//! # Schema
//!
//! Snowflake identifiers are stored as INTEGER; every snowflake fits in 63 bits.
//! Enum columns hold the same lowercase names used in configuration files, so
//! rows stay readable from the `sqlite3` shell. `updated_at` is ISO 8601 UTC.

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use rr_core::{
    CategoryId, ChannelHierarchy, ChannelId, HistoryDetail, Rule, RuleBook, Scope,
    ValidationError,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Identifier does not fit an SQLite integer.
    #[error("identifier out of range: {0}")]
    IdOutOfRange(u64),
    /// A stored row holds a value this version cannot read.
    #[error("invalid rule for {scope} {id}: {source}")]
    InvalidRule {
        scope: Scope,
        id: u64,
        #[source]
        source: ValidationError,
    },
    #[error("invalid stored scope: {0}")]
    InvalidScope(#[source] ValidationError),
    #[error("negative identifier in storage: {0}")]
    NegativeId(i64),
}

/// A stored rule with its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRecord {
    pub scope: Scope,
    pub id: u64,
    pub rule: Rule,
    pub updated_at: String,
}

/// Rule table wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct RuleStore {
    conn: Connection,
}

impl RuleStore {
    /// Opens a store at the given path, creating it if necessary.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init()?;
        tracing::debug!(path = %path.display(), "opened rule store");
        Ok(store)
    }

    /// Opens an in-memory store. Used by tests.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS rules (
                scope INTEGER NOT NULL,
                identifier INTEGER NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 0,
                notification_channel INTEGER,
                history TEXT NOT NULL,
                user_format TEXT NOT NULL,
                channel_format TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (scope, identifier)
            );
            ",
        )?;
        Ok(())
    }

    /// Inserts or replaces the rule at `(scope, id)`.
    pub fn save(&mut self, scope: Scope, id: u64, rule: &Rule) -> Result<(), DbError> {
        let notification_channel = rule
            .notification_channel
            .map(|channel| to_sql_id(channel.get()))
            .transpose()?;
        self.conn.execute(
            "
            INSERT INTO rules
                (scope, identifier, enabled, notification_channel, history, user_format, channel_format, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (scope, identifier) DO UPDATE SET
                enabled = excluded.enabled,
                notification_channel = excluded.notification_channel,
                history = excluded.history,
                user_format = excluded.user_format,
                channel_format = excluded.channel_format,
                updated_at = excluded.updated_at
            ",
            params![
                scope.code(),
                to_sql_id(id)?,
                rule.enabled,
                notification_channel,
                rule.history.as_str(),
                rule.user_format.as_str(),
                rule.channel_format.as_str(),
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            ],
        )?;
        tracing::info!(%scope, id, enabled = rule.enabled, "saved rule");
        Ok(())
    }

    /// Deletes the rule at `(scope, id)`. Returns whether one existed.
    pub fn delete(&mut self, scope: Scope, id: u64) -> Result<bool, DbError> {
        let deleted = self.conn.execute(
            "DELETE FROM rules WHERE scope = ? AND identifier = ?",
            params![scope.code(), to_sql_id(id)?],
        )?;
        Ok(deleted > 0)
    }

    pub fn find(&self, scope: Scope, id: u64) -> Result<Option<Rule>, DbError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT scope, identifier, enabled, notification_channel, history, user_format, channel_format, updated_at
                FROM rules
                WHERE scope = ? AND identifier = ?
                ",
                params![scope.code(), to_sql_id(id)?],
                RawRule::from_row,
            )
            .optional()?;
        row.map(|raw| raw.into_record().map(|record| record.rule))
            .transpose()
    }

    /// Lists all rules, guild scope first, then by identifier.
    pub fn list(&self) -> Result<Vec<RuleRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT scope, identifier, enabled, notification_channel, history, user_format, channel_format, updated_at
            FROM rules
            ORDER BY scope ASC, identifier ASC
            ",
        )?;
        let rows = stmt.query_map([], RawRule::from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    /// Loads every stored rule into an in-memory resolver.
    pub fn load_rule_book(&self) -> Result<RuleBook, DbError> {
        let mut book = RuleBook::default();
        for record in self.list()? {
            book.set(record.scope, record.id, record.rule);
        }
        tracing::debug!(rules = book.len(), "loaded rule book");
        Ok(book)
    }

    /// Resolves the effective rule for a channel directly against the table.
    ///
    /// Channel beats category beats guild; nothing configured yields a
    /// disabled rule at guild scope.
    pub fn scoped_effective_rule(
        &self,
        hierarchy: &ChannelHierarchy,
    ) -> Result<(Rule, Scope), DbError> {
        let candidates = [
            (Scope::Channel, Some(hierarchy.channel.get())),
            (Scope::Category, hierarchy.category.map(CategoryId::get)),
            (Scope::Guild, Some(hierarchy.guild.get())),
        ];
        for (scope, id) in candidates {
            let Some(id) = id else { continue };
            if let Some(rule) = self.find(scope, id)? {
                return Ok((rule, scope));
            }
        }
        Ok((Rule::default(), Scope::Guild))
    }
}

fn to_sql_id(id: u64) -> Result<i64, DbError> {
    i64::try_from(id).map_err(|_| DbError::IdOutOfRange(id))
}

fn from_sql_id(raw: i64) -> Result<u64, DbError> {
    u64::try_from(raw).map_err(|_| DbError::NegativeId(raw))
}

/// Column values as stored, before enum parsing.
struct RawRule {
    scope: i64,
    id: i64,
    enabled: bool,
    notification_channel: Option<i64>,
    history: String,
    user_format: String,
    channel_format: String,
    updated_at: String,
}

impl RawRule {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            scope: row.get(0)?,
            id: row.get(1)?,
            enabled: row.get(2)?,
            notification_channel: row.get(3)?,
            history: row.get(4)?,
            user_format: row.get(5)?,
            channel_format: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<RuleRecord, DbError> {
        let scope = Scope::from_code(self.scope).map_err(DbError::InvalidScope)?;
        let id = from_sql_id(self.id)?;
        let invalid = |source| DbError::InvalidRule { scope, id, source };

        let notification_channel = self
            .notification_channel
            .map(from_sql_id)
            .transpose()?
            .map(ChannelId::new)
            .transpose()
            .map_err(invalid)?;
        let rule = Rule {
            enabled: self.enabled,
            notification_channel,
            history: self.history.parse::<HistoryDetail>().map_err(invalid)?,
            user_format: self.user_format.parse().map_err(invalid)?,
            channel_format: self.channel_format.parse().map_err(invalid)?,
        };
        Ok(RuleRecord {
            scope,
            id,
            rule,
            updated_at: self.updated_at,
        })
    }
}
