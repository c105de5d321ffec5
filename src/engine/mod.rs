mod error;
mod mutations;
mod queries;
mod validate;

pub use error::EngineError;
pub use mutations::{ConnectionPatch, DevicePatch};
pub use queries::{ConnectionFilter, DeviceFilter, ModelFilter, TypeFilter};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedLinkSet = Arc<RwLock<ChildLinkSet>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The inventory engine: entity directories plus per-child connection sets.
/// All writes go through the WAL before touching in-memory state.
pub struct Engine {
    pub(super) types: DashMap<Ulid, DeviceType>,
    pub(super) models: DashMap<Ulid, DeviceModel>,
    pub(super) devices: DashMap<Ulid, Device>,
    pub(super) users: DashMap<Ulid, User>,
    /// Connection sets keyed by child device — the no-overlap invariant is
    /// enforced under each set's write lock.
    pub(super) links: DashMap<Ulid, SharedLinkSet>,
    /// Reverse lookup: connection id → child device id.
    pub(super) connection_to_child: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            types: DashMap::new(),
            models: DashMap::new(),
            devices: DashMap::new(),
            users: DashMap::new(),
            links: DashMap::new(),
            connection_to_child: DashMap::new(),
            wal_tx,
        };

        // Replay — we're the sole owner of the link-set Arcs here, so
        // try_write always succeeds instantly (no contention).
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::ConnectionCreated {
                id,
                parent_device_id,
                child_device_id,
                span,
            } => {
                let set = self.link_set(*child_device_id);
                let mut guard = set.try_write().expect("replay: uncontended write");
                guard.insert(ConnectionRecord {
                    id: *id,
                    parent_device_id: *parent_device_id,
                    child_device_id: *child_device_id,
                    span: *span,
                    archived: false,
                });
                self.connection_to_child.insert(*id, *child_device_id);
            }
            Event::ConnectionUpdated {
                id,
                parent_device_id,
                child_device_id,
                span,
            } => {
                if let Some(old_child) = self.child_of(id)
                    && old_child != *child_device_id
                    && let Some(old_set) = self.links.get(&old_child).map(|e| e.value().clone())
                {
                    old_set
                        .try_write()
                        .expect("replay: uncontended write")
                        .remove(*id);
                }
                let set = self.link_set(*child_device_id);
                let mut guard = set.try_write().expect("replay: uncontended write");
                guard.remove(*id);
                guard.insert(ConnectionRecord {
                    id: *id,
                    parent_device_id: *parent_device_id,
                    child_device_id: *child_device_id,
                    span: *span,
                    archived: false,
                });
                self.connection_to_child.insert(*id, *child_device_id);
            }
            Event::ConnectionArchived { id } => {
                if let Some(child) = self.child_of(id)
                    && let Some(set) = self.links.get(&child).map(|e| e.value().clone())
                {
                    let mut guard = set.try_write().expect("replay: uncontended write");
                    if let Some(rec) = guard.get_mut(*id) {
                        rec.archived = true;
                    }
                }
            }
            Event::ConnectionDeleted { id } => {
                if let Some(child) = self.child_of(id)
                    && let Some(set) = self.links.get(&child).map(|e| e.value().clone())
                {
                    set.try_write()
                        .expect("replay: uncontended write")
                        .remove(*id);
                }
                self.connection_to_child.remove(id);
            }
            other => self.apply_entity_event(other),
        }
    }

    /// Apply a non-connection event to the entity directories. Shared by
    /// replay and the runtime mutation path.
    pub(super) fn apply_entity_event(&self, event: &Event) {
        match event {
            Event::TypeCreated { id, name } | Event::TypeUpdated { id, name } => {
                self.types.insert(
                    *id,
                    DeviceType {
                        id: *id,
                        name: name.clone(),
                    },
                );
            }
            Event::TypeDeleted { id } => {
                self.types.remove(id);
            }
            Event::ModelCreated { id, name, type_id }
            | Event::ModelUpdated { id, name, type_id } => {
                self.models.insert(
                    *id,
                    DeviceModel {
                        id: *id,
                        name: name.clone(),
                        type_id: *type_id,
                    },
                );
            }
            Event::ModelDeleted { id } => {
                self.models.remove(id);
            }
            Event::DeviceCreated {
                id,
                model_id,
                mac,
                state,
            }
            | Event::DeviceUpdated {
                id,
                model_id,
                mac,
                state,
            } => {
                self.devices.insert(
                    *id,
                    Device {
                        id: *id,
                        model_id: *model_id,
                        mac: mac.clone(),
                        state: *state,
                    },
                );
            }
            Event::DeviceDeleted { id } => {
                self.devices.remove(id);
            }
            Event::UserCreated {
                id,
                username,
                password_hash,
            }
            | Event::UserUpdated {
                id,
                username,
                password_hash,
            } => {
                self.users.insert(
                    *id,
                    User {
                        id: *id,
                        username: username.clone(),
                        password_hash: password_hash.clone(),
                    },
                );
            }
            Event::UserDeleted { id } => {
                self.users.remove(id);
            }
            Event::ConnectionCreated { .. }
            | Event::ConnectionUpdated { .. }
            | Event::ConnectionArchived { .. }
            | Event::ConnectionDeleted { .. } => {}
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    /// WAL-append + apply in one call, for entity (non-connection) events.
    pub(super) async fn persist_entity(&self, event: Event) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        self.apply_entity_event(&event);
        Ok(())
    }

    /// Get or create the link set for a child device.
    pub(super) fn link_set(&self, child_id: Ulid) -> SharedLinkSet {
        self.links
            .entry(child_id)
            .or_insert_with(|| Arc::new(RwLock::new(ChildLinkSet::default())))
            .value()
            .clone()
    }

    pub(super) fn child_of(&self, connection_id: &Ulid) -> Option<Ulid> {
        self.connection_to_child
            .get(connection_id)
            .map(|e| *e.value())
    }

    /// Device Directory lookup: lifecycle state by id, or None if absent.
    pub(super) fn device_state(&self, id: &Ulid) -> Option<DeviceState> {
        self.devices.get(id).map(|e| e.value().state)
    }
}
