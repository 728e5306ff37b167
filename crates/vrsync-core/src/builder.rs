// Builds the persisted tournament aggregate from the VR API detail.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::Database;
use crate::error::ImportError;
use crate::event::EventImport;
use crate::model::{License, Tournament};
use crate::stats::JobStats;
use crate::vrapi::{RemoteCatalog, RemoteTournament};

pub struct RecordBuilder {
    catalog: Arc<dyn RemoteCatalog>,
    db: Arc<Database>,
    events: Arc<dyn EventImport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Persist {
    Insert,
    Replace,
}

impl RecordBuilder {
    pub fn new(
        catalog: Arc<dyn RemoteCatalog>,
        db: Arc<Database>,
        events: Arc<dyn EventImport>,
    ) -> Self {
        Self {
            catalog,
            db,
            events,
        }
    }

    /// Fetch `code`, store it as a new tournament and import its events.
    pub async fn build_and_persist(
        &self,
        code: &str,
        stats: &JobStats,
    ) -> Result<Tournament, ImportError> {
        self.build(code, stats, Persist::Insert).await
    }

    /// Rebuild a stored tournament from a fresh upstream snapshot.
    ///
    /// The detail is fetched before anything is deleted, and the old row is
    /// swapped for the new one in a single transaction.
    pub async fn rebuild(&self, code: &str, stats: &JobStats) -> Result<Tournament, ImportError> {
        self.build(code, stats, Persist::Replace).await
    }

    async fn build(
        &self,
        code: &str,
        stats: &JobStats,
        persist: Persist,
    ) -> Result<Tournament, ImportError> {
        let detail = self.catalog.fetch_detail(code).await?;

        // The license is the only reliable source of the province.
        let license = self
            .db
            .lookup_or_create_license(&detail.organization_name)
            .map_err(|e| ImportError::storage(code, e))?;

        let tournament = tournament_from_remote(detail, license);
        let stored = match persist {
            Persist::Insert => self.db.insert_tournament(&tournament),
            Persist::Replace => self.db.replace_tournament(&tournament),
        };
        stored.map_err(|e| ImportError::storage(code, e))?;
        debug!(code, ?persist, "stored tournament");

        // A row without its events would look up to date on the next run and
        // never be repaired, so drop it and let the next run recreate it.
        if let Err(err) = self.events.import_events(&tournament, stats).await {
            warn!(code, error = %err, "event import failed, removing tournament");
            self.db
                .delete_tournament(code)
                .map_err(|e| ImportError::storage(code, e))?;
            return Err(err);
        }
        Ok(tournament)
    }
}

/// Scalar fields of the aggregate, taken from one upstream snapshot.
pub fn tournament_from_remote(remote: RemoteTournament, license: License) -> Tournament {
    Tournament {
        code: remote.code,
        kind: remote.kind,
        name: remote.name,
        level: remote.level,
        start_date: remote.start_date,
        end_date: remote.end_date,
        city: remote.city,
        last_updated_in_vr: remote.last_updated,
        license: Some(license),
        events: vec![],
    }
}
