// Tournament import: reconciles the local store with the VR API.
//
// Each run scans years backwards from the current season down to the
// configured floor year. Every listed tournament is created if we do not
// have it, rebuilt if upstream has a newer copy, and otherwise left alone.
// Stored tournaments are never patched in place: a stale copy is replaced
// wholesale, events included.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Datelike, Local, NaiveDate};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::builder::RecordBuilder;
use crate::config::ImportConfig;
use crate::db::Database;
use crate::error::ImportError;
use crate::event::{EventImport, VrEventImport};
use crate::model::TournamentKind;
use crate::stats::{JobState, JobStats};
use crate::visited::VisitedSet;
use crate::vrapi::{RemoteCatalog, RemoteSummary};

// ---------------------------------------------------------------------------
// Counter names (part of the status JSON)
// ---------------------------------------------------------------------------

pub const TOURNAMENT_CREATION_COUNT: &str = "Tournaments created";
pub const TOURNAMENT_UPDATE_COUNT: &str = "Tournaments updated";
pub const TOURNAMENT_UP_TO_DATE_COUNT: &str = "Tournaments already up to date";
pub const LP_LEAGUE_CREATION_COUNT: &str = "League Planner leagues created";
pub const LP_LEAGUE_UPDATE_COUNT: &str = "League Planner leagues updated";
pub const LP_LEAGUE_UP_TO_DATE_COUNT: &str = "League Planner leagues already up to date";
pub const OL_LEAGUE_CREATION_COUNT: &str = "Online leagues created";
pub const OL_LEAGUE_UPDATE_COUNT: &str = "Online leagues updated";
pub const OL_LEAGUE_UP_TO_DATE_COUNT: &str = "Online leagues already up to date";
pub const BOX_LEAGUE_CREATION_COUNT: &str = "Box leagues created";
pub const BOX_LEAGUE_UPDATE_COUNT: &str = "Box leagues updated";
pub const BOX_LEAGUE_UP_TO_DATE_COUNT: &str = "Box leagues already up to date";
pub const BOX_LEAGUE_FORCED_RELOAD_COUNT: &str =
    "Box leagues reloaded in spite of being up to date";
pub const SKIP_COUNT: &str = "Leagues and Tournaments skipped";
pub const DUPLICATE_COUNT: &str = "Tournaments or Leagues seen multiple times";
pub const DONE: &str = "Done (created + updated + already up to date + skipped)";

/// Name of the job, as reported in the status JSON.
pub const IMPORT_JOB_NAME: &str = "tournamentImport";

struct KindCounters {
    created: &'static str,
    updated: &'static str,
    up_to_date: &'static str,
}

fn counters_for(kind: TournamentKind) -> KindCounters {
    match kind {
        TournamentKind::Tournament => KindCounters {
            created: TOURNAMENT_CREATION_COUNT,
            updated: TOURNAMENT_UPDATE_COUNT,
            up_to_date: TOURNAMENT_UP_TO_DATE_COUNT,
        },
        TournamentKind::LeaguePlanner => KindCounters {
            created: LP_LEAGUE_CREATION_COUNT,
            updated: LP_LEAGUE_UPDATE_COUNT,
            up_to_date: LP_LEAGUE_UP_TO_DATE_COUNT,
        },
        TournamentKind::OnlineLeague => KindCounters {
            created: OL_LEAGUE_CREATION_COUNT,
            updated: OL_LEAGUE_UPDATE_COUNT,
            up_to_date: OL_LEAGUE_UP_TO_DATE_COUNT,
        },
        TournamentKind::BoxLadder => KindCounters {
            created: BOX_LEAGUE_CREATION_COUNT,
            updated: BOX_LEAGUE_UPDATE_COUNT,
            up_to_date: BOX_LEAGUE_UP_TO_DATE_COUNT,
        },
    }
}

// ---------------------------------------------------------------------------
// Randomness
// ---------------------------------------------------------------------------

/// Source of the per-item draw for forced box ladder reloads.
pub trait RandomSource: Send + Sync {
    /// A uniform draw in `[0, 100)`.
    fn percent(&self) -> f64;
}

/// Thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn percent(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..100.0)
    }
}

// ---------------------------------------------------------------------------
// Year window
// ---------------------------------------------------------------------------

/// Newest year to scan. From June onwards the next season is already being
/// listed, so the scan starts a year ahead.
pub fn first_scan_year(today: NaiveDate) -> i32 {
    if today.month0() > 4 {
        today.year() + 1
    } else {
        today.year()
    }
}

// ---------------------------------------------------------------------------
// TournamentImporter
// ---------------------------------------------------------------------------

/// Clears the single-flight flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct TournamentImporter {
    catalog: Arc<dyn RemoteCatalog>,
    db: Arc<Database>,
    builder: RecordBuilder,
    settings: ImportConfig,
    random: Box<dyn RandomSource>,
    /// Stats of the current (or last) run. Replaced at the start of each run.
    stats: Mutex<Arc<JobStats>>,
    running: AtomicBool,
}

impl TournamentImporter {
    pub fn new(
        catalog: Arc<dyn RemoteCatalog>,
        db: Arc<Database>,
        events: Arc<dyn EventImport>,
        settings: ImportConfig,
        random: Box<dyn RandomSource>,
    ) -> Self {
        let builder = RecordBuilder::new(catalog.clone(), db.clone(), events);
        Self {
            catalog,
            db,
            builder,
            settings,
            random,
            stats: Mutex::new(Arc::new(JobStats::new(IMPORT_JOB_NAME))),
            running: AtomicBool::new(false),
        }
    }

    /// Importer wired for production: events come from the same catalog and
    /// box ladder draws from the thread RNG.
    pub fn for_vr(
        catalog: Arc<dyn RemoteCatalog>,
        db: Arc<Database>,
        settings: ImportConfig,
    ) -> Self {
        let events = Arc::new(VrEventImport::new(catalog.clone(), db.clone()));
        Self::new(catalog, db, events, settings, Box::new(ThreadRandom))
    }

    /// Stats of the current run, or of the last one if none is running.
    pub fn current_stats(&self) -> Arc<JobStats> {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// JSON summary of [`current_stats`](Self::current_stats), for polling.
    pub fn import_status(&self) -> String {
        self.current_stats().to_json()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run a full import using today's local date.
    pub async fn import_tournaments(&self) -> Result<(), ImportError> {
        self.import_tournaments_at(Local::now().date_naive()).await
    }

    /// Run a full import as if today were `today`.
    pub async fn import_tournaments_at(&self, today: NaiveDate) -> Result<(), ImportError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ImportError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        info!("**** VR tournament import started");
        let stats = Arc::new(JobStats::new(IMPORT_JOB_NAME));
        stats.set_status(JobState::InProgress);
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = stats.clone();

        let floor = self.settings.effective_start_year(today);
        let mut visited = VisitedSet::new();

        for year in (floor..=first_scan_year(today)).rev() {
            if self.limit_reached(&stats) {
                break;
            }
            if self.import_year(year, &mut visited, &stats).await?.is_break() {
                break;
            }
        }

        stats.set_status(JobState::Done);
        info!(status = %stats.to_json(), "**** VR tournament import done");
        Ok(())
    }

    fn limit_reached(&self, stats: &JobStats) -> bool {
        stats.get(TOURNAMENT_CREATION_COUNT) >= self.settings.upload_limit
    }

    /// Reconcile one year's listing. Breaks when the creation limit is hit.
    async fn import_year(
        &self,
        year: i32,
        visited: &mut VisitedSet,
        stats: &JobStats,
    ) -> Result<ControlFlow<()>, ImportError> {
        let listing = self.catalog.list_year(year).await?;
        info!("{} tournaments found for {year}", listing.len());

        // An estimate: skips, duplicates and the creation limit all mean
        // fewer items are actually done.
        stats.add_to_do(listing.len() as u64);

        for item in listing.iter().rev() {
            self.reconcile(item, visited, stats).await?;
            stats.bump(DONE);

            if self.limit_reached(stats) {
                info!(
                    limit = self.settings.upload_limit,
                    "tournament upload limit reached, stopping"
                );
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Decide and apply the action for one listed tournament.
    async fn reconcile(
        &self,
        item: &RemoteSummary,
        visited: &mut VisitedSet,
        stats: &JobStats,
    ) -> Result<(), ImportError> {
        if visited.seen(&item.code) {
            stats.bump(DUPLICATE_COUNT);
            info!(
                "Tournament {} type: {} seen multiple times",
                item.code, item.type_id
            );
            return Ok(());
        }
        visited.mark_seen(&item.code);

        let (Some(kind), Some(last_updated)) = (item.kind, item.last_updated) else {
            stats.bump(SKIP_COUNT);
            warn!(
                "Tournament has unknown type: {} ({}). TypeID: {}",
                item.name, item.code, item.type_id
            );
            return Ok(());
        };
        let counters = counters_for(kind);

        let existing = self
            .db
            .find_tournament(&item.code)
            .map_err(ImportError::Storage)?;

        match existing {
            None => {
                info!(code = %item.code, name = %item.name, %kind, "creating");
                stats.bump(counters.created);
                self.builder.build_and_persist(&item.code, stats).await?;
            }
            Some(stored) if stored.is_out_of_date(last_updated) => {
                info!(
                    code = %item.code,
                    name = %item.name,
                    %kind,
                    stored = %stored.last_updated_in_vr,
                    remote = %last_updated,
                    "updating"
                );
                stats.bump(counters.updated);
                self.builder.rebuild(&item.code, stats).await?;
            }
            Some(_) if kind == TournamentKind::BoxLadder => {
                // Box ladder timestamps do not move when match results are
                // added, so reload some of them regardless.
                if self.settings.box_ladder_force_reload_percent > self.random.percent() {
                    info!(code = %item.code, "forced reload of box ladder");
                    self.builder.rebuild(&item.code, stats).await?;
                    stats.bump(BOX_LEAGUE_FORCED_RELOAD_COUNT);
                } else {
                    debug!(code = %item.code, "box ladder up to date");
                    stats.bump(counters.up_to_date);
                }
            }
            Some(_) => {
                debug!(code = %item.code, %kind, "up to date");
                stats.bump(counters.up_to_date);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
