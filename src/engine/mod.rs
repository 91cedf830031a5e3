mod catalog;
mod conflict;
mod ledger;

use std::io;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::store::StoreError;
use crate::wal::Wal;

pub type SharedListingState = Arc<RwLock<ListingState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Takes the first waiting append, drains every append already
/// queued behind it, and answers the whole batch after one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
        }
        for (_, tx) in batch {
            let _ = tx.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }

        // A compaction queued behind the batch runs only after the batch is durable.
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't leak into the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Where committed events go before they are applied in memory.
#[derive(Clone)]
pub(super) enum Journal {
    Durable(mpsc::Sender<WalCommand>),
    /// No persistence: tests and throwaway instances.
    Volatile,
}

impl Journal {
    async fn append(&self, event: &Event) -> Result<(), StoreError> {
        let Journal::Durable(tx) = self else {
            return Ok(());
        };
        let (response, rx) = oneshot::channel();
        tx.send(WalCommand::Append {
            event: event.clone(),
            response,
        })
        .await
        .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }
}

/// In-memory tables shared with detached commit tasks.
pub(super) struct Tables {
    pub(super) listings: DashMap<Ulid, SharedListingState>,
    /// Reservation id → listing id.
    pub(super) reservation_index: DashMap<Ulid, Ulid>,
}

impl Tables {
    fn insert_listing(&self, listing: Listing) {
        let id = listing.id;
        self.listings
            .insert(id, Arc::new(RwLock::new(ListingState::new(listing))));
    }

    /// Apply an event to a listing whose write lock the caller holds.
    fn apply_locked(&self, ls: &mut ListingState, event: &Event) {
        match event {
            Event::ListingUpdated { listing } => ls.listing = listing.clone(),
            Event::ListingDeleted { id } => {
                for r in ls.reservations.drain(..) {
                    self.reservation_index.remove(&r.id);
                }
                ls.retired = true;
                self.listings.remove(id);
            }
            Event::ReservationCommitted { reservation } => {
                self.reservation_index
                    .insert(reservation.id, reservation.listing_id);
                ls.insert_reservation(reservation.clone());
            }
            Event::ReservationCancelled { id, .. } => {
                ls.remove_reservation(*id);
                self.reservation_index.remove(id);
            }
            // Creation has no lock to hold yet; see `insert_listing`.
            Event::ListingCreated { .. } => {}
        }
    }
}

/// In-process implementation of both [`crate::store::ListingCatalog`] and
/// [`crate::store::ReservationStore`].
///
/// Each listing and its reservations sit behind one `RwLock`. Writers on a
/// listing are serialized by that lock, which is what makes `try_insert`'s
/// check-then-write atomic; readers and writers on other listings never wait.
pub struct Engine {
    pub(super) tables: Arc<Tables>,
    pub(super) journal: Journal,
    /// Mutations hold it shared; compaction holds it exclusively so its snapshot
    /// cannot miss an event that is in flight.
    pub(super) gate: Arc<RwLock<()>>,
}

impl Engine {
    /// Durable engine: replays `wal_path`, drops any torn tail, then appends to it.
    /// Spawns the WAL writer task, so it must be called inside a tokio runtime.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let events = Wal::recover(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self::with_journal(Journal::Durable(wal_tx));
        engine.replay(&events)?;
        info!(
            "replayed {} events: {} listings, {} reservations",
            events.len(),
            engine.listing_count(),
            engine.tables.reservation_index.len()
        );
        Ok(engine)
    }

    /// Non-durable engine with identical semantics.
    pub fn in_memory() -> Self {
        Self::with_journal(Journal::Volatile)
    }

    fn with_journal(journal: Journal) -> Self {
        Self {
            tables: Arc::new(Tables {
                listings: DashMap::new(),
                reservation_index: DashMap::new(),
            }),
            journal,
            gate: Arc::new(RwLock::new(())),
        }
    }

    /// Nothing else holds these locks during startup, so `try_write` never waits.
    fn replay(&self, events: &[Event]) -> io::Result<()> {
        for event in events {
            if let Event::ListingCreated { listing } = event {
                self.tables.insert_listing(listing.clone());
                continue;
            }
            let Some(state) = self.get_state(&event.listing_id()) else {
                continue;
            };
            let mut guard = state
                .try_write()
                .map_err(|_| io::Error::other("replay: listing lock contended"))?;
            self.tables.apply_locked(&mut guard, event);
        }
        Ok(())
    }

    pub fn listing_count(&self) -> usize {
        self.tables.listings.len()
    }

    pub(super) fn get_state(&self, id: &Ulid) -> Option<SharedListingState> {
        self.tables.listings.get(id).map(|e| e.value().clone())
    }

    /// Handles to every listing, taken without holding any map shard across an await.
    pub(super) fn all_states(&self) -> Vec<SharedListingState> {
        self.tables
            .listings
            .iter()
            .map(|e| e.value().clone())
            .collect()
    }

    /// Shared hold on the compaction gate for the length of one mutation.
    pub(super) async fn enter_mutation(&self) -> OwnedRwLockReadGuard<()> {
        self.gate.clone().read_owned().await
    }

    /// Write-lock a live listing. Retired handles report `NotFound`.
    pub(super) async fn lock_listing(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ListingState>, StoreError> {
        let state = self.get_state(&id).ok_or(StoreError::NotFound(id))?;
        let guard = state.write_owned().await;
        if guard.retired {
            return Err(StoreError::NotFound(id));
        }
        Ok(guard)
    }

    /// Journal the event, then apply it in memory.
    ///
    /// Runs on its own task: once started it finishes even if the caller's
    /// future is dropped (e.g. by a request timeout), so the WAL and memory
    /// always agree and an insert is either wholly visible or absent.
    pub(super) async fn commit(
        &self,
        gate: OwnedRwLockReadGuard<()>,
        guard: Option<OwnedRwLockWriteGuard<ListingState>>,
        event: Event,
    ) -> Result<(), StoreError> {
        let journal = self.journal.clone();
        let tables = self.tables.clone();
        tokio::spawn(async move {
            let _gate = gate;
            let mut guard = guard;
            journal.append(&event).await?;
            match guard.as_deref_mut() {
                Some(ls) => tables.apply_locked(ls, &event),
                None => {
                    if let Event::ListingCreated { listing } = event {
                        tables.insert_listing(listing);
                    }
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::WalError(format!("commit task failed: {e}")))?
    }

    /// Rewrite the WAL as the minimal event set for the current state.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let Journal::Durable(wal_tx) = &self.journal else {
            return Ok(());
        };
        let _quiesced = self.gate.write().await;

        let mut events = Vec::new();
        for state in self.all_states() {
            let ls = state.read().await;
            events.push(Event::ListingCreated {
                listing: ls.listing.clone(),
            });
            events.extend(ls.reservations.iter().map(|r| Event::ReservationCommitted {
                reservation: r.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let Journal::Durable(wal_tx) = &self.journal else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
