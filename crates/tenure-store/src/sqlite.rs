//! SQLite-based store implementation

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tenure_api::{EntitlementKind, EntitlementState};
use tenure_util::{DurationSpec, EntitlementId, GrantId, MacAddress};
use tracing::{debug, warn};

use crate::{AuditEvent, Entitlement, Grant, Store, StoreError, StoreResult};

const GRANT_COLUMNS: &str =
    "id, identifier, owner, anchor, duration, active, last_validated_at, note, version";

const ENTITLEMENT_COLUMNS: &str = "id, kind, reference, label, anchor, duration, expires_at, \
     remaining_days, state, alerts_sent, primary_recipient, secondary_recipients, version, active";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("store lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- MAC-keyed licenses
            CREATE TABLE IF NOT EXISTS grants (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identifier TEXT NOT NULL UNIQUE,
                owner TEXT NOT NULL,
                anchor TEXT NOT NULL,
                duration TEXT NOT NULL,
                active INTEGER NOT NULL,
                last_validated_at TEXT,
                note TEXT,
                version INTEGER NOT NULL
            );

            -- Certificates and projects
            CREATE TABLE IF NOT EXISTS entitlements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                reference TEXT NOT NULL,
                label TEXT NOT NULL,
                anchor TEXT NOT NULL,
                duration TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                remaining_days INTEGER NOT NULL,
                state TEXT NOT NULL,
                alerts_sent TEXT NOT NULL,
                primary_recipient TEXT,
                secondary_recipients TEXT NOT NULL,
                version INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                UNIQUE (kind, reference)
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_grants_active ON grants(active);
            CREATE INDEX IF NOT EXISTS idx_entitlements_active ON entitlements(active);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }

    /// A guarded write touched nothing: tell a deleted row from a stale one
    fn missing_or_conflict(conn: &Connection, table: &str, id: i64) -> StoreError {
        let exists = conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE id = ?", table),
                [id],
                |_| Ok(()),
            )
            .optional();

        match exists {
            Ok(Some(())) => StoreError::Conflict(format!("{} row {}", table, id)),
            Ok(None) => StoreError::NotFound(format!("{} row {}", table, id)),
            Err(e) => e.into(),
        }
    }

    fn query_grants(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<Grant>> {
        let mut stmt = conn.prepare(sql)?;
        let grants = stmt
            .query_map(params, grant_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(grants)
    }

    fn query_entitlements(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<Entitlement>> {
        let mut stmt = conn.prepare(sql)?;
        let entitlements = stmt
            .query_map(params, entitlement_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entitlements)
    }
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
}

fn parse_instant(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn grant_from_row(row: &Row<'_>) -> rusqlite::Result<Grant> {
    let identifier: String = row.get(1)?;
    let anchor: String = row.get(3)?;
    let duration: String = row.get(4)?;
    let last_validated_at: Option<String> = row.get(6)?;

    Ok(Grant {
        id: GrantId::new(row.get(0)?),
        identifier: MacAddress::parse(&identifier).map_err(|e| conversion_error(1, e))?,
        owner: row.get(2)?,
        anchor: parse_instant(3, &anchor)?,
        duration: DurationSpec::from_display(&duration).map_err(|e| conversion_error(4, e))?,
        active: row.get(5)?,
        last_validated_at: last_validated_at
            .as_deref()
            .map(|s| parse_instant(6, s))
            .transpose()?,
        note: row.get(7)?,
        version: row.get(8)?,
    })
}

fn entitlement_from_row(row: &Row<'_>) -> rusqlite::Result<Entitlement> {
    let kind: String = row.get(1)?;
    let anchor: String = row.get(4)?;
    let duration: String = row.get(5)?;
    let expires_at: String = row.get(6)?;
    let state: String = row.get(8)?;
    let alerts_sent: String = row.get(9)?;
    let secondary: String = row.get(11)?;

    Ok(Entitlement {
        id: EntitlementId::new(row.get(0)?),
        kind: kind.parse::<EntitlementKind>().map_err(|e: String| conversion_error(1, e))?,
        reference: row.get(2)?,
        label: row.get(3)?,
        anchor: parse_instant(4, &anchor)?,
        duration: DurationSpec::from_display(&duration).map_err(|e| conversion_error(5, e))?,
        expires_at: parse_instant(6, &expires_at)?,
        remaining_days: row.get(7)?,
        state: state.parse::<EntitlementState>().map_err(|e: String| conversion_error(8, e))?,
        alerts_sent: serde_json::from_str::<BTreeSet<u32>>(&alerts_sent)
            .map_err(|e| conversion_error(9, e))?,
        primary_recipient: row.get(10)?,
        secondary_recipients: serde_json::from_str(&secondary)
            .map_err(|e| conversion_error(11, e))?,
        version: row.get(12)?,
        active: row.get(13)?,
    })
}

impl Store for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| tenure_util::now());
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn insert_grant(&self, grant: &Grant) -> StoreResult<Grant> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO grants
                (identifier, owner, anchor, duration, active, last_validated_at, note, version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
            "#,
            params![
                grant.identifier.as_str(),
                grant.owner,
                grant.anchor.to_rfc3339(),
                grant.duration.to_string(),
                grant.active,
                grant.last_validated_at.map(|t| t.to_rfc3339()),
                grant.note,
            ],
        )
        .map_err(|e| match StoreError::from(e) {
            StoreError::Duplicate(_) => {
                StoreError::Duplicate(format!("grant {}", grant.identifier))
            }
            other => other,
        })?;

        let mut stored = grant.clone();
        stored.id = GrantId::new(conn.last_insert_rowid());
        stored.version = 1;

        debug!(grant_id = %stored.id, identifier = %stored.identifier, "Grant inserted");
        Ok(stored)
    }

    fn get_grant(&self, id: GrantId) -> StoreResult<Option<Grant>> {
        let conn = self.conn()?;
        let grant = conn
            .query_row(
                &format!("SELECT {} FROM grants WHERE id = ?", GRANT_COLUMNS),
                [id.get()],
                grant_from_row,
            )
            .optional()?;
        Ok(grant)
    }

    fn find_grant_by_identifier(&self, identifier: &MacAddress) -> StoreResult<Option<Grant>> {
        let conn = self.conn()?;
        let grant = conn
            .query_row(
                &format!("SELECT {} FROM grants WHERE identifier = ?", GRANT_COLUMNS),
                [identifier.as_str()],
                grant_from_row,
            )
            .optional()?;
        Ok(grant)
    }

    fn list_grants(&self) -> StoreResult<Vec<Grant>> {
        let conn = self.conn()?;
        Self::query_grants(
            &conn,
            &format!("SELECT {} FROM grants ORDER BY id", GRANT_COLUMNS),
            [],
        )
    }

    fn list_active_grants(&self) -> StoreResult<Vec<Grant>> {
        let conn = self.conn()?;
        Self::query_grants(
            &conn,
            &format!("SELECT {} FROM grants WHERE active = 1 ORDER BY id", GRANT_COLUMNS),
            [],
        )
    }

    fn save_grant(&self, grant: &Grant) -> StoreResult<Grant> {
        let conn = self.conn()?;

        let updated = conn.execute(
            r#"
            UPDATE grants
            SET identifier = ?1, owner = ?2, anchor = ?3, duration = ?4, active = ?5,
                last_validated_at = ?6, note = ?7, version = version + 1
            WHERE id = ?8 AND version = ?9
            "#,
            params![
                grant.identifier.as_str(),
                grant.owner,
                grant.anchor.to_rfc3339(),
                grant.duration.to_string(),
                grant.active,
                grant.last_validated_at.map(|t| t.to_rfc3339()),
                grant.note,
                grant.id.get(),
                grant.version,
            ],
        )?;

        if updated == 0 {
            return Err(Self::missing_or_conflict(&conn, "grants", grant.id.get()));
        }

        let mut saved = grant.clone();
        saved.version += 1;
        debug!(grant_id = %saved.id, version = saved.version, "Grant saved");
        Ok(saved)
    }

    fn delete_grant(&self, id: GrantId) -> StoreResult<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM grants WHERE id = ?", [id.get()])?;
        Ok(deleted > 0)
    }

    fn insert_entitlement(&self, entitlement: &Entitlement) -> StoreResult<Entitlement> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO entitlements
                (kind, reference, label, anchor, duration, expires_at, remaining_days, state,
                 alerts_sent, primary_recipient, secondary_recipients, active, version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1)
            "#,
            params![
                entitlement.kind.as_str(),
                entitlement.reference,
                entitlement.label,
                entitlement.anchor.to_rfc3339(),
                entitlement.duration.to_string(),
                entitlement.expires_at.to_rfc3339(),
                entitlement.remaining_days,
                entitlement.state.as_str(),
                serde_json::to_string(&entitlement.alerts_sent)?,
                entitlement.primary_recipient,
                serde_json::to_string(&entitlement.secondary_recipients)?,
                entitlement.active,
            ],
        )
        .map_err(|e| match StoreError::from(e) {
            StoreError::Duplicate(_) => StoreError::Duplicate(format!(
                "{} {}",
                entitlement.kind, entitlement.reference
            )),
            other => other,
        })?;

        let mut stored = entitlement.clone();
        stored.id = EntitlementId::new(conn.last_insert_rowid());
        stored.version = 1;

        debug!(entitlement_id = %stored.id, kind = %stored.kind, "Entitlement inserted");
        Ok(stored)
    }

    fn get_entitlement(&self, id: EntitlementId) -> StoreResult<Option<Entitlement>> {
        let conn = self.conn()?;
        let entitlement = conn
            .query_row(
                &format!("SELECT {} FROM entitlements WHERE id = ?", ENTITLEMENT_COLUMNS),
                [id.get()],
                entitlement_from_row,
            )
            .optional()?;
        Ok(entitlement)
    }

    fn find_entitlement(
        &self,
        kind: EntitlementKind,
        reference: &str,
    ) -> StoreResult<Option<Entitlement>> {
        let conn = self.conn()?;
        let entitlement = conn
            .query_row(
                &format!(
                    "SELECT {} FROM entitlements WHERE kind = ? AND reference = ?",
                    ENTITLEMENT_COLUMNS
                ),
                params![kind.as_str(), reference],
                entitlement_from_row,
            )
            .optional()?;
        Ok(entitlement)
    }

    fn list_entitlements(&self) -> StoreResult<Vec<Entitlement>> {
        let conn = self.conn()?;
        Self::query_entitlements(
            &conn,
            &format!("SELECT {} FROM entitlements ORDER BY id", ENTITLEMENT_COLUMNS),
            [],
        )
    }

    fn list_active_entitlements(&self) -> StoreResult<Vec<Entitlement>> {
        let conn = self.conn()?;
        Self::query_entitlements(
            &conn,
            &format!(
                "SELECT {} FROM entitlements WHERE active = 1 ORDER BY id",
                ENTITLEMENT_COLUMNS
            ),
            [],
        )
    }

    fn save_entitlement(&self, entitlement: &Entitlement) -> StoreResult<Entitlement> {
        let conn = self.conn()?;

        let updated = conn.execute(
            r#"
            UPDATE entitlements
            SET kind = ?1, reference = ?2, label = ?3, anchor = ?4, duration = ?5,
                expires_at = ?6, remaining_days = ?7, state = ?8, alerts_sent = ?9,
                primary_recipient = ?10, secondary_recipients = ?11, active = ?12,
                version = version + 1
            WHERE id = ?13 AND version = ?14
            "#,
            params![
                entitlement.kind.as_str(),
                entitlement.reference,
                entitlement.label,
                entitlement.anchor.to_rfc3339(),
                entitlement.duration.to_string(),
                entitlement.expires_at.to_rfc3339(),
                entitlement.remaining_days,
                entitlement.state.as_str(),
                serde_json::to_string(&entitlement.alerts_sent)?,
                entitlement.primary_recipient,
                serde_json::to_string(&entitlement.secondary_recipients)?,
                entitlement.active,
                entitlement.id.get(),
                entitlement.version,
            ],
        )?;

        if updated == 0 {
            return Err(Self::missing_or_conflict(
                &conn,
                "entitlements",
                entitlement.id.get(),
            ));
        }

        let mut saved = entitlement.clone();
        saved.version += 1;
        debug!(entitlement_id = %saved.id, version = saved.version, "Entitlement saved");
        Ok(saved)
    }

    fn delete_entitlement(&self, id: EntitlementId) -> StoreResult<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM entitlements WHERE id = ?", [id.get()])?;
        Ok(deleted > 0)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
