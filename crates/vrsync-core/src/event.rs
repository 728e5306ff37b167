// Event import: pulls the events of a freshly built tournament.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::db::Database;
use crate::error::ImportError;
use crate::model::{Event, Tournament};
use crate::stats::JobStats;
use crate::vrapi::RemoteCatalog;

pub const EVENT_CREATION_COUNT: &str = "Events created";

/// Imports the nested events of a tournament that was just persisted.
/// Counters go into the stats of the run that built the tournament.
#[async_trait]
pub trait EventImport: Send + Sync {
    async fn import_events(&self, tournament: &Tournament, stats: &JobStats)
        -> Result<(), ImportError>;
}

/// Event import against the VR API.
pub struct VrEventImport {
    catalog: Arc<dyn RemoteCatalog>,
    db: Arc<Database>,
}

impl VrEventImport {
    pub fn new(catalog: Arc<dyn RemoteCatalog>, db: Arc<Database>) -> Self {
        Self { catalog, db }
    }
}

#[async_trait]
impl EventImport for VrEventImport {
    async fn import_events(
        &self,
        tournament: &Tournament,
        stats: &JobStats,
    ) -> Result<(), ImportError> {
        let events: Vec<Event> = self
            .catalog
            .fetch_events(&tournament.code)
            .await?
            .into_iter()
            .map(Event::from)
            .collect();

        self.db
            .insert_events(&tournament.code, &events)
            .map_err(|e| ImportError::storage(&tournament.code, e))?;

        stats.bump_by(EVENT_CREATION_COUNT, events.len() as u64);
        debug!(
            code = %tournament.code,
            count = events.len(),
            "imported events"
        );
        Ok(())
    }
}
