// Domain types for tournaments, events and licenses.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Tournament kinds
// ---------------------------------------------------------------------------

/// The competition categories the importer understands. Upstream `TypeID`
/// values outside this set are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TournamentKind {
    Tournament,
    LeaguePlanner,
    OnlineLeague,
    BoxLadder,
}

impl TournamentKind {
    pub const ALL: [TournamentKind; 4] = [
        TournamentKind::Tournament,
        TournamentKind::LeaguePlanner,
        TournamentKind::OnlineLeague,
        TournamentKind::BoxLadder,
    ];

    /// Parse the upstream `TypeID` ("0", "1", "3", "10").
    pub fn from_type_id(raw: &str) -> Option<Self> {
        match raw.trim() {
            "0" => Some(TournamentKind::Tournament),
            "1" => Some(TournamentKind::LeaguePlanner),
            "3" => Some(TournamentKind::OnlineLeague),
            "10" => Some(TournamentKind::BoxLadder),
            _ => None,
        }
    }

    /// Numeric type id, as stored in the database.
    pub fn type_id(self) -> i64 {
        match self {
            TournamentKind::Tournament => 0,
            TournamentKind::LeaguePlanner => 1,
            TournamentKind::OnlineLeague => 3,
            TournamentKind::BoxLadder => 10,
        }
    }

    pub fn from_db(type_id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.type_id() == type_id)
    }
}

impl fmt::Display for TournamentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TournamentKind::Tournament => "tournament",
            TournamentKind::LeaguePlanner => "league planner league",
            TournamentKind::OnlineLeague => "online league",
            TournamentKind::BoxLadder => "box ladder",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Persisted aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct License {
    pub id: i64,
    pub organization_name: String,
    pub province: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub code: String,
    pub name: String,
    pub gender_id: Option<i64>,
    pub is_singles: bool,
    pub level: Option<String>,
    pub min_age: Option<i64>,
    pub max_age: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tournament {
    pub code: String,
    pub kind: TournamentKind,
    pub name: String,
    pub level: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub city: Option<String>,
    pub last_updated_in_vr: NaiveDateTime,
    pub license: Option<License>,
    /// Only populated by queries that ask for events.
    pub events: Vec<Event>,
}

impl Tournament {
    /// True when the upstream copy was modified after ours was taken.
    pub fn is_out_of_date(&self, remote_last_updated: NaiveDateTime) -> bool {
        remote_last_updated > self.last_updated_in_vr
    }
}

/// A grading level signed off for a tournament. Approvals are keyed by code
/// and outlive the tournament rows, which are rebuilt on every update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeApproval {
    pub tournament_code: String,
    pub approved_level: String,
    pub approved_at: NaiveDateTime,
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

const VR_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an upstream timestamp. The VR API sends local times without an
/// offset (`2024-03-15T10:22:31.17`); offsets and bare dates are accepted too.
pub fn parse_vr_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    for fmt in VR_DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Calendar date part of an upstream timestamp.
pub fn parse_vr_date(raw: &str) -> Option<NaiveDate> {
    parse_vr_timestamp(raw).map(|ts| ts.date())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
