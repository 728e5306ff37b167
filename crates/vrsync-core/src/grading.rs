// Grading review: which recent tournaments still need their level approved.

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;

use crate::db::Database;
use crate::model::{GradeApproval, Tournament, TournamentKind};

/// Which kinds of competition a grading review covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradingCategory {
    BoxLadders,
    Tournaments,
    Leagues,
}

impl GradingCategory {
    /// Map the category name used by callers. Unrecognised names mean leagues.
    pub fn from_query(raw: &str) -> Self {
        match raw {
            "boxLadders" => GradingCategory::BoxLadders,
            "tournaments" => GradingCategory::Tournaments,
            _ => GradingCategory::Leagues,
        }
    }

    pub fn kinds(self) -> &'static [TournamentKind] {
        match self {
            GradingCategory::BoxLadders => &[TournamentKind::BoxLadder],
            GradingCategory::Tournaments => &[TournamentKind::Tournament],
            GradingCategory::Leagues => {
                &[TournamentKind::LeaguePlanner, TournamentKind::OnlineLeague]
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GradingQuery {
    pub since: NaiveDate,
    pub category: GradingCategory,
    /// Include tournaments whose current level is already approved.
    pub show_all: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grading {
    pub tournament: Tournament,
    pub most_recent_approval: Option<GradeApproval>,
}

impl Grading {
    /// True when the last approval signed off the level the tournament has now.
    pub fn is_current(&self) -> bool {
        self.most_recent_approval
            .as_ref()
            .is_some_and(|a| self.tournament.level.as_deref() == Some(a.approved_level.as_str()))
    }
}

/// Tournaments ending on or after `query.since`, each paired with its most
/// recent approval, ordered by end date.
pub fn current_gradings(db: &Database, query: &GradingQuery) -> Result<Vec<Grading>> {
    let tournaments = db.tournaments_ending_since(query.since, query.category.kinds())?;

    let mut gradings = Vec::with_capacity(tournaments.len());
    for tournament in tournaments {
        let most_recent_approval = db.most_recent_approval(&tournament.code)?;
        let grading = Grading {
            tournament,
            most_recent_approval,
        };
        if query.show_all || !grading.is_current() {
            gradings.push(grading);
        }
    }
    Ok(gradings)
}
