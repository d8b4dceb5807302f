//! Persisted platform connections, one row per (user, platform).
//!
//! The store only ever sees encrypted token blobs; encryption and
//! decryption happen in the flow controller and validity manager through
//! the token cipher. All operations are keyed by `(user_id, platform)`, so
//! cross-user reads are impossible by construction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Mutex;

use crate::crypto::EncryptedToken;
use crate::error::TwinError;

/// Lifecycle status of a platform connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    NeedsReauth,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::NeedsReauth => "needs_reauth",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "connected" => ConnectionStatus::Connected,
            "needs_reauth" => ConnectionStatus::NeedsReauth,
            _ => ConnectionStatus::Disconnected,
        }
    }
}

/// A user's OAuth grant for one platform, with tokens encrypted at rest.
#[derive(Clone, Debug)]
pub struct PlatformConnection {
    pub user_id: String,
    pub platform: String,
    pub status: ConnectionStatus,
    pub access_token: EncryptedToken,
    pub refresh_token: Option<EncryptedToken>,
    pub expires_at: Option<DateTime<Utc>>,
    pub connected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<String>,
}

/// SQLite-backed store of platform connections.
///
/// # Thread safety
/// The connection is wrapped in a Mutex; SQLite's ACID guarantees make the
/// upsert last-write-wins, so a double refresh cannot leave a torn record.
pub struct ConnectionStore {
    conn: Mutex<Connection>,
}

impl ConnectionStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, TwinError> {
        let conn = Connection::open(db_path)?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS connections (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                status TEXT NOT NULL,
                access_ciphertext TEXT NOT NULL,
                access_nonce TEXT NOT NULL,
                access_tag TEXT NOT NULL,
                refresh_ciphertext TEXT,
                refresh_nonce TEXT,
                refresh_tag TEXT,
                expires_at TEXT,
                connected_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_sync_at TEXT,
                last_sync_status TEXT,
                UNIQUE(user_id, platform)
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_user_platform ON connections(user_id, platform)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create or replace the single record for `(user_id, platform)`.
    ///
    /// Idempotent; `connected_at` is preserved on replace.
    pub fn upsert(&self, record: &PlatformConnection) -> Result<(), TwinError> {
        let (refresh_ct, refresh_nonce, refresh_tag) = match &record.refresh_token {
            Some(t) => (
                Some(t.ciphertext.as_str()),
                Some(t.nonce.as_str()),
                Some(t.tag.as_str()),
            ),
            None => (None, None, None),
        };

        self.conn.lock().unwrap().execute(
            r#"
            INSERT INTO connections (
                user_id, platform, status,
                access_ciphertext, access_nonce, access_tag,
                refresh_ciphertext, refresh_nonce, refresh_tag,
                expires_at, connected_at, updated_at,
                last_sync_at, last_sync_status
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(user_id, platform) DO UPDATE SET
                status = excluded.status,
                access_ciphertext = excluded.access_ciphertext,
                access_nonce = excluded.access_nonce,
                access_tag = excluded.access_tag,
                refresh_ciphertext = excluded.refresh_ciphertext,
                refresh_nonce = excluded.refresh_nonce,
                refresh_tag = excluded.refresh_tag,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
            params![
                record.user_id,
                record.platform,
                record.status.as_str(),
                record.access_token.ciphertext,
                record.access_token.nonce,
                record.access_token.tag,
                refresh_ct,
                refresh_nonce,
                refresh_tag,
                record.expires_at.map(|dt| dt.to_rfc3339()),
                record.connected_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.last_sync_at.map(|dt| dt.to_rfc3339()),
                record.last_sync_status,
            ],
        )?;

        Ok(())
    }

    pub fn find(
        &self,
        user_id: &str,
        platform: &str,
    ) -> Result<Option<PlatformConnection>, TwinError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT user_id, platform, status,
                   access_ciphertext, access_nonce, access_tag,
                   refresh_ciphertext, refresh_nonce, refresh_tag,
                   expires_at, connected_at, updated_at,
                   last_sync_at, last_sync_status
            FROM connections
            WHERE user_id = ?1 AND platform = ?2
            "#,
        )?;

        let mut rows = stmt.query(params![user_id, platform])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_connection(row)?)),
            None => Ok(None),
        }
    }

    /// Partial update of status; also touches `updated_at`.
    pub fn set_status(
        &self,
        user_id: &str,
        platform: &str,
        status: ConnectionStatus,
    ) -> Result<(), TwinError> {
        self.conn.lock().unwrap().execute(
            "UPDATE connections SET status = ?3, updated_at = ?4
             WHERE user_id = ?1 AND platform = ?2",
            params![
                user_id,
                platform,
                status.as_str(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Record the outcome of a data sync run for this connection.
    pub fn set_sync_result(
        &self,
        user_id: &str,
        platform: &str,
        sync_status: &str,
    ) -> Result<(), TwinError> {
        let now = Utc::now().to_rfc3339();
        self.conn.lock().unwrap().execute(
            "UPDATE connections
             SET last_sync_at = ?3, last_sync_status = ?4, updated_at = ?3
             WHERE user_id = ?1 AND platform = ?2",
            params![user_id, platform, now, sync_status],
        )?;
        Ok(())
    }

    /// Delete the record for `(user_id, platform)`.
    ///
    /// Returns whether a record existed; deleting an absent record is not
    /// an error.
    pub fn delete(&self, user_id: &str, platform: &str) -> Result<bool, TwinError> {
        let rows = self.conn.lock().unwrap().execute(
            "DELETE FROM connections WHERE user_id = ?1 AND platform = ?2",
            params![user_id, platform],
        )?;
        Ok(rows > 0)
    }

    /// All connections for one user, ordered by platform.
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<PlatformConnection>, TwinError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT user_id, platform, status,
                   access_ciphertext, access_nonce, access_tag,
                   refresh_ciphertext, refresh_nonce, refresh_tag,
                   expires_at, connected_at, updated_at,
                   last_sync_at, last_sync_status
            FROM connections
            WHERE user_id = ?1
            ORDER BY platform
            "#,
        )?;

        let mut rows = stmt.query(params![user_id])?;
        let mut connections = Vec::new();
        while let Some(row) = rows.next()? {
            connections.push(row_to_connection(row)?);
        }
        Ok(connections)
    }
}

fn row_to_connection(row: &Row<'_>) -> Result<PlatformConnection, TwinError> {
    let refresh_ct: Option<String> = row.get(6)?;
    let refresh_nonce: Option<String> = row.get(7)?;
    let refresh_tag: Option<String> = row.get(8)?;
    let refresh_token = match (refresh_ct, refresh_nonce, refresh_tag) {
        (Some(ciphertext), Some(nonce), Some(tag)) => Some(EncryptedToken {
            ciphertext,
            nonce,
            tag,
        }),
        _ => None,
    };

    let status: String = row.get(2)?;

    Ok(PlatformConnection {
        user_id: row.get(0)?,
        platform: row.get(1)?,
        status: ConnectionStatus::parse(&status),
        access_token: EncryptedToken {
            ciphertext: row.get(3)?,
            nonce: row.get(4)?,
            tag: row.get(5)?,
        },
        refresh_token,
        expires_at: parse_timestamp(row.get(9)?),
        connected_at: parse_timestamp(row.get(10)?).unwrap_or_else(Utc::now),
        updated_at: parse_timestamp(row.get(11)?).unwrap_or_else(Utc::now),
        last_sync_at: parse_timestamp(row.get(12)?),
        last_sync_status: row.get(13)?,
    })
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
