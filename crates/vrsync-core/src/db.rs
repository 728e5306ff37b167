// SQLite persistence layer for licenses, tournaments, events and grade
// approvals.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::model::{Event, GradeApproval, License, Tournament, TournamentKind};

const TOURNAMENT_COLUMNS: &str = "t.tournament_code, t.type_id, t.name, t.level, t.start_date,
     t.end_date, t.city, t.last_updated_in_vr, l.id, l.license_name, l.province";

/// SQLite-backed store for the imported tournament data.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS licenses (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                license_name TEXT NOT NULL UNIQUE,
                province     TEXT
            );

            CREATE TABLE IF NOT EXISTS tournaments (
                tournament_code    TEXT PRIMARY KEY,
                type_id            INTEGER NOT NULL,
                name               TEXT NOT NULL,
                level              TEXT,
                start_date         TEXT,
                end_date           TEXT,
                city               TEXT,
                last_updated_in_vr TEXT NOT NULL,
                license_id         INTEGER REFERENCES licenses(id)
            );

            CREATE TABLE IF NOT EXISTS events (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                tournament_code TEXT NOT NULL
                                REFERENCES tournaments(tournament_code) ON DELETE CASCADE,
                event_code      TEXT NOT NULL,
                name            TEXT NOT NULL,
                gender_id       INTEGER,
                is_singles      INTEGER NOT NULL,
                level           TEXT,
                min_age         INTEGER,
                max_age         INTEGER,
                UNIQUE(tournament_code, event_code)
            );

            CREATE TABLE IF NOT EXISTS grade_approvals (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                tournament_code TEXT NOT NULL,
                approved_level  TEXT NOT NULL,
                approved_at     TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_events_tournament ON events(tournament_code);
             CREATE INDEX IF NOT EXISTS idx_tournaments_end_date ON tournaments(end_date);
             CREATE INDEX IF NOT EXISTS idx_grade_approvals_code ON grade_approvals(tournament_code);",
        )
        .context("failed to create indexes")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Licenses
    // ------------------------------------------------------------------

    /// Return the license for `organization_name`, creating it if absent.
    /// Names are matched exactly; no case or whitespace folding.
    pub fn lookup_or_create_license(&self, organization_name: &str) -> Result<License> {
        let conn = self.conn();
        let license = conn
            .query_row(
                "INSERT INTO licenses (license_name) VALUES (?1)
                 ON CONFLICT(license_name) DO UPDATE SET license_name = excluded.license_name
                 RETURNING id, license_name, province",
                params![organization_name],
                |row| {
                    Ok(License {
                        id: row.get(0)?,
                        organization_name: row.get(1)?,
                        province: row.get(2)?,
                    })
                },
            )
            .context("failed to look up or create license")?;
        Ok(license)
    }

    pub fn license_count(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM licenses", [], |row| row.get(0))
            .context("failed to count licenses")?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------
    // Tournaments
    // ------------------------------------------------------------------

    /// Look up a tournament (with its license, without events) by code.
    pub fn find_tournament(&self, code: &str) -> Result<Option<Tournament>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {TOURNAMENT_COLUMNS}
             FROM tournaments t LEFT JOIN licenses l ON l.id = t.license_id
             WHERE t.tournament_code = ?1"
        );
        conn.query_row(&sql, params![code], tournament_from_row)
            .optional()
            .context("failed to look up tournament")
    }

    /// Insert a new tournament row. Fails on a duplicate code.
    pub fn insert_tournament(&self, tournament: &Tournament) -> Result<()> {
        let conn = self.conn();
        insert_tournament_row(&conn, tournament).context("failed to insert tournament")?;
        Ok(())
    }

    /// Delete any tournament stored under the same code and insert
    /// `tournament` in its place, atomically. Events of the old row go with
    /// it.
    pub fn replace_tournament(&self, tournament: &Tournament) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute(
            "DELETE FROM tournaments WHERE tournament_code = ?1",
            params![tournament.code],
        )
        .context("failed to delete stale tournament")?;
        insert_tournament_row(&tx, tournament).context("failed to insert replacement tournament")?;
        tx.commit().context("failed to commit tournament replacement")?;
        Ok(())
    }

    /// Delete a tournament and its events. Returns `false` if it did not exist.
    pub fn delete_tournament(&self, code: &str) -> Result<bool> {
        let conn = self.conn();
        let n = conn
            .execute(
                "DELETE FROM tournaments WHERE tournament_code = ?1",
                params![code],
            )
            .context("failed to delete tournament")?;
        Ok(n > 0)
    }

    pub fn find_all_tournaments(&self) -> Result<Vec<Tournament>> {
        let sql = format!(
            "SELECT {TOURNAMENT_COLUMNS}
             FROM tournaments t LEFT JOIN licenses l ON l.id = t.license_id
             ORDER BY t.tournament_code"
        );
        self.query_tournaments(&sql, [])
    }

    /// Tournaments whose upstream copy changed at or after `since`.
    pub fn tournaments_updated_since(&self, since: NaiveDateTime) -> Result<Vec<Tournament>> {
        let sql = format!(
            "SELECT {TOURNAMENT_COLUMNS}
             FROM tournaments t LEFT JOIN licenses l ON l.id = t.license_id
             WHERE t.last_updated_in_vr >= ?1
             ORDER BY t.last_updated_in_vr"
        );
        self.query_tournaments(&sql, params![since])
    }

    /// Tournaments of the given kinds ending on or after `since`, ordered by
    /// end date.
    pub fn tournaments_ending_since(
        &self,
        since: NaiveDate,
        kinds: &[TournamentKind],
    ) -> Result<Vec<Tournament>> {
        let type_ids = kinds
            .iter()
            .map(|k| k.type_id().to_string())
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT {TOURNAMENT_COLUMNS}
             FROM tournaments t LEFT JOIN licenses l ON l.id = t.license_id
             WHERE t.end_date >= ?1 AND t.type_id IN ({type_ids})
             ORDER BY t.end_date, t.tournament_code"
        );
        self.query_tournaments(&sql, params![since])
    }

    /// A tournament with its license and events, events in import order.
    pub fn tournament_with_events(&self, code: &str) -> Result<Option<Tournament>> {
        let Some(mut tournament) = self.find_tournament(code)? else {
            return Ok(None);
        };
        tournament.events = self.load_events(code)?;
        Ok(Some(tournament))
    }

    pub fn tournament_count(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM tournaments", [], |row| row.get(0))
            .context("failed to count tournaments")?;
        Ok(count as usize)
    }

    fn query_tournaments<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Tournament>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(sql)
            .context("failed to prepare tournament query")?;
        let tournaments = stmt
            .query_map(params, tournament_from_row)
            .context("failed to query tournaments")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map tournament rows")?;
        Ok(tournaments)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Insert the events of a tournament in one transaction, in order.
    pub fn insert_events(&self, tournament_code: &str, events: &[Event]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin event transaction")?;
        for event in events {
            tx.execute(
                "INSERT INTO events
                    (tournament_code, event_code, name, gender_id, is_singles, level, min_age, max_age)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    tournament_code,
                    event.code,
                    event.name,
                    event.gender_id,
                    event.is_singles,
                    event.level,
                    event.min_age,
                    event.max_age,
                ],
            )
            .with_context(|| format!("failed to insert event {}", event.code))?;
        }
        tx.commit().context("failed to commit events")?;
        Ok(())
    }

    pub fn load_events(&self, tournament_code: &str) -> Result<Vec<Event>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT event_code, name, gender_id, is_singles, level, min_age, max_age
                 FROM events WHERE tournament_code = ?1 ORDER BY id",
            )
            .context("failed to prepare load_events query")?;
        let events = stmt
            .query_map(params![tournament_code], |row| {
                Ok(Event {
                    code: row.get(0)?,
                    name: row.get(1)?,
                    gender_id: row.get(2)?,
                    is_singles: row.get(3)?,
                    level: row.get(4)?,
                    min_age: row.get(5)?,
                    max_age: row.get(6)?,
                })
            })
            .context("failed to query events")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map event rows")?;
        Ok(events)
    }

    // ------------------------------------------------------------------
    // Grade approvals
    // ------------------------------------------------------------------

    pub fn record_grade_approval(&self, approval: &GradeApproval) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO grade_approvals (tournament_code, approved_level, approved_at)
             VALUES (?1, ?2, ?3)",
            params![
                approval.tournament_code,
                approval.approved_level,
                approval.approved_at
            ],
        )
        .context("failed to record grade approval")?;
        Ok(())
    }

    /// The latest approval for a tournament code, if any. Ties on
    /// `approved_at` go to the most recently inserted row.
    pub fn most_recent_approval(&self, tournament_code: &str) -> Result<Option<GradeApproval>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT tournament_code, approved_level, approved_at
             FROM grade_approvals WHERE tournament_code = ?1
             ORDER BY approved_at DESC, id DESC LIMIT 1",
            params![tournament_code],
            |row| {
                Ok(GradeApproval {
                    tournament_code: row.get(0)?,
                    approved_level: row.get(1)?,
                    approved_at: row.get(2)?,
                })
            },
        )
        .optional()
        .context("failed to load grade approval")
    }
}

/// True if `err` came from a SQLite constraint violation (unique key,
/// foreign key, NOT NULL).
pub fn is_constraint_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn insert_tournament_row(conn: &Connection, t: &Tournament) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO tournaments
            (tournament_code, type_id, name, level, start_date, end_date, city,
             last_updated_in_vr, license_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            t.code,
            t.kind.type_id(),
            t.name,
            t.level,
            t.start_date,
            t.end_date,
            t.city,
            t.last_updated_in_vr,
            t.license.as_ref().map(|l| l.id),
        ],
    )
}

/// Map a row selected with `TOURNAMENT_COLUMNS`.
fn tournament_from_row(row: &Row<'_>) -> rusqlite::Result<Tournament> {
    let type_id: i64 = row.get(1)?;
    let kind = TournamentKind::from_db(type_id).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            Type::Integer,
            format!("unknown tournament type id {type_id}").into(),
        )
    })?;
    let license_id: Option<i64> = row.get(8)?;
    let license = match license_id {
        Some(id) => Some(License {
            id,
            organization_name: row.get(9)?,
            province: row.get(10)?,
        }),
        None => None,
    };
    Ok(Tournament {
        code: row.get(0)?,
        kind,
        name: row.get(2)?,
        level: row.get(3)?,
        start_date: row.get(4)?,
        end_date: row.get(5)?,
        city: row.get(6)?,
        last_updated_in_vr: row.get(7)?,
        license,
        events: vec![],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: create a fresh in-memory database for each test.
    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    fn ts(raw: &str) -> NaiveDateTime {
        crate::model::parse_vr_timestamp(raw).unwrap()
    }

    fn sample_tournament(code: &str, license: Option<License>) -> Tournament {
        Tournament {
            code: code.to_string(),
            kind: TournamentKind::Tournament,
            name: format!("Tournament {code}"),
            level: Some("B".to_string()),
            start_date: NaiveDate::from_ymd_opt(2024, 4, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 4, 3),
            city: Some("Halifax".to_string()),
            last_updated_in_vr: ts("2024-03-15T10:22:31.17"),
            license,
            events: vec![],
        }
    }

    fn sample_event(code: &str) -> Event {
        Event {
            code: code.to_string(),
            name: format!("Event {code}"),
            gender_id: Some(1),
            is_singles: true,
            level: None,
            min_age: None,
            max_age: Some(19),
        }
    }

    // ------------------------------------------------------------------
    // Schema / open
    // ------------------------------------------------------------------

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let conn = db.conn();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for table in ["licenses", "tournaments", "events", "grade_approvals"] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    // ------------------------------------------------------------------
    // Licenses
    // ------------------------------------------------------------------

    #[test]
    fn lookup_or_create_license_is_idempotent() {
        let db = test_db();
        let a = db.lookup_or_create_license("Squash Nova Scotia").unwrap();
        let b = db.lookup_or_create_license("Squash Nova Scotia").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.province, None);
        assert_eq!(db.license_count().unwrap(), 1);
    }

    #[test]
    fn license_names_match_exactly() {
        let db = test_db();
        let a = db.lookup_or_create_license("Squash Ontario").unwrap();
        let b = db.lookup_or_create_license("squash ontario").unwrap();
        let c = db.lookup_or_create_license("Squash Ontario ").unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(db.license_count().unwrap(), 3);
    }

    // ------------------------------------------------------------------
    // Tournaments
    // ------------------------------------------------------------------

    #[test]
    fn insert_and_find_round_trip() {
        let db = test_db();
        let license = db.lookup_or_create_license("Squash Canada").unwrap();
        let t = sample_tournament("ABC", Some(license));
        db.insert_tournament(&t).unwrap();

        let loaded = db.find_tournament("ABC").unwrap().expect("should exist");
        assert_eq!(loaded, t);
        assert!(db.find_tournament("missing").unwrap().is_none());
    }

    #[test]
    fn duplicate_insert_is_a_constraint_violation() {
        let db = test_db();
        db.insert_tournament(&sample_tournament("ABC", None)).unwrap();
        let err = db.insert_tournament(&sample_tournament("ABC", None)).unwrap_err();
        assert!(is_constraint_violation(&err), "unexpected error: {err:#}");
    }

    #[test]
    fn replace_swaps_row_and_drops_old_events() {
        let db = test_db();
        db.insert_tournament(&sample_tournament("ABC", None)).unwrap();
        db.insert_events("ABC", &[sample_event("1"), sample_event("2")]).unwrap();

        let newer = Tournament {
            name: "Renamed".to_string(),
            last_updated_in_vr: ts("2024-03-20T08:00:00"),
            ..sample_tournament("ABC", None)
        };
        db.replace_tournament(&newer).unwrap();

        let loaded = db.tournament_with_events("ABC").unwrap().unwrap();
        assert_eq!(loaded.name, "Renamed");
        assert!(loaded.events.is_empty());
        assert_eq!(db.tournament_count().unwrap(), 1);
    }

    #[test]
    fn replace_inserts_when_absent() {
        let db = test_db();
        db.replace_tournament(&sample_tournament("NEW", None)).unwrap();
        assert!(db.find_tournament("NEW").unwrap().is_some());
    }

    #[test]
    fn delete_keeps_shared_license() {
        let db = test_db();
        let license = db.lookup_or_create_license("Squash Canada").unwrap();
        db.insert_tournament(&sample_tournament("A", Some(license.clone()))).unwrap();
        db.insert_tournament(&sample_tournament("B", Some(license))).unwrap();

        assert!(db.delete_tournament("A").unwrap());
        assert!(!db.delete_tournament("A").unwrap());
        assert_eq!(db.license_count().unwrap(), 1);
        assert!(db.find_tournament("B").unwrap().unwrap().license.is_some());
    }

    #[test]
    fn updated_since_filters_by_timestamp() {
        let db = test_db();
        db.insert_tournament(&sample_tournament("OLD", None)).unwrap();
        db.insert_tournament(&Tournament {
            last_updated_in_vr: ts("2024-05-01T00:00:00"),
            ..sample_tournament("NEW", None)
        })
        .unwrap();

        let found = db.tournaments_updated_since(ts("2024-04-01T00:00:00")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, "NEW");
        assert_eq!(db.find_all_tournaments().unwrap().len(), 2);
    }

    #[test]
    fn ending_since_filters_by_kind_and_date() {
        let db = test_db();
        db.insert_tournament(&sample_tournament("T1", None)).unwrap();
        db.insert_tournament(&Tournament {
            kind: TournamentKind::BoxLadder,
            ..sample_tournament("BOX", None)
        })
        .unwrap();
        db.insert_tournament(&Tournament {
            end_date: NaiveDate::from_ymd_opt(2023, 1, 1),
            ..sample_tournament("T0", None)
        })
        .unwrap();

        let since = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let found = db
            .tournaments_ending_since(since, &[TournamentKind::Tournament])
            .unwrap();
        let codes: Vec<&str> = found.iter().map(|t| t.code.as_str()).collect();
        assert_eq!(codes, vec!["T1"]);
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    #[test]
    fn events_load_in_insert_order() {
        let db = test_db();
        db.insert_tournament(&sample_tournament("ABC", None)).unwrap();
        db.insert_events("ABC", &[sample_event("9"), sample_event("2")]).unwrap();

        let events = db.load_events("ABC").unwrap();
        let codes: Vec<&str> = events.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, vec!["9", "2"]);
        assert_eq!(events[0], sample_event("9"));
    }

    #[test]
    fn events_require_parent_tournament() {
        let db = test_db();
        assert!(db.insert_events("nope", &[sample_event("1")]).is_err());
    }

    // ------------------------------------------------------------------
    // Grade approvals
    // ------------------------------------------------------------------

    #[test]
    fn most_recent_approval_wins() {
        let db = test_db();
        assert!(db.most_recent_approval("ABC").unwrap().is_none());

        for (level, at) in [("C", "2024-01-01T00:00:00"), ("B", "2024-02-01T00:00:00")] {
            db.record_grade_approval(&GradeApproval {
                tournament_code: "ABC".to_string(),
                approved_level: level.to_string(),
                approved_at: ts(at),
            })
            .unwrap();
        }

        let latest = db.most_recent_approval("ABC").unwrap().unwrap();
        assert_eq!(latest.approved_level, "B");
    }
}
