use chrono::NaiveDate;
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::validate::{check_distinct, check_installed, check_no_overlap, validate_span};
use super::{Engine, EngineError, SharedLinkSet, WalCommand};

/// Partial update for a connection. `None` keeps the current value.
#[derive(Debug, Default, Clone)]
pub struct ConnectionPatch {
    pub parent_device_id: Option<Ulid>,
    pub child_device_id: Option<Ulid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Partial update for a device. `None` keeps the current value.
#[derive(Debug, Default, Clone)]
pub struct DevicePatch {
    pub model_id: Option<Ulid>,
    pub mac: Option<String>,
    pub state: Option<DeviceState>,
}

fn check_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("empty name"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

impl Engine {
    // ── Device types ─────────────────────────────────────────

    pub async fn create_type(&self, name: &str) -> Result<DeviceType, EngineError> {
        check_name(name)?;
        if self.type_name_taken(name, None) {
            return Err(EngineError::AlreadyExists("type name"));
        }
        let id = Ulid::new();
        self.persist_entity(Event::TypeCreated {
            id,
            name: name.to_string(),
        })
        .await?;
        Ok(DeviceType {
            id,
            name: name.to_string(),
        })
    }

    pub async fn update_type(
        &self,
        id: Ulid,
        name: Option<String>,
    ) -> Result<DeviceType, EngineError> {
        let current = self
            .types
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound("device type", id))?;
        let name = name.unwrap_or(current.name);
        check_name(&name)?;
        if self.type_name_taken(&name, Some(id)) {
            return Err(EngineError::AlreadyExists("type name"));
        }
        self.persist_entity(Event::TypeUpdated {
            id,
            name: name.clone(),
        })
        .await?;
        Ok(DeviceType { id, name })
    }

    pub async fn delete_type(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.types.contains_key(&id) {
            return Err(EngineError::NotFound("device type", id));
        }
        if self.models.iter().any(|m| m.value().type_id == id) {
            return Err(EngineError::InUse("device type", id));
        }
        self.persist_entity(Event::TypeDeleted { id }).await
    }

    fn type_name_taken(&self, name: &str, exclude: Option<Ulid>) -> bool {
        self.types
            .iter()
            .any(|e| e.value().name == name && Some(e.value().id) != exclude)
    }

    // ── Device models ────────────────────────────────────────

    pub async fn create_model(&self, name: &str, type_id: Ulid) -> Result<DeviceModel, EngineError> {
        check_name(name)?;
        if self.model_name_taken(name, None) {
            return Err(EngineError::AlreadyExists("model name"));
        }
        if !self.types.contains_key(&type_id) {
            return Err(EngineError::NotFound("device type", type_id));
        }
        let id = Ulid::new();
        self.persist_entity(Event::ModelCreated {
            id,
            name: name.to_string(),
            type_id,
        })
        .await?;
        Ok(DeviceModel {
            id,
            name: name.to_string(),
            type_id,
        })
    }

    pub async fn update_model(
        &self,
        id: Ulid,
        name: Option<String>,
        type_id: Option<Ulid>,
    ) -> Result<DeviceModel, EngineError> {
        let current = self
            .models
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound("device model", id))?;
        let name = name.unwrap_or(current.name);
        let type_id = type_id.unwrap_or(current.type_id);
        check_name(&name)?;
        if self.model_name_taken(&name, Some(id)) {
            return Err(EngineError::AlreadyExists("model name"));
        }
        if !self.types.contains_key(&type_id) {
            return Err(EngineError::NotFound("device type", type_id));
        }
        self.persist_entity(Event::ModelUpdated {
            id,
            name: name.clone(),
            type_id,
        })
        .await?;
        Ok(DeviceModel { id, name, type_id })
    }

    pub async fn delete_model(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.models.contains_key(&id) {
            return Err(EngineError::NotFound("device model", id));
        }
        if self.devices.iter().any(|d| d.value().model_id == id) {
            return Err(EngineError::InUse("device model", id));
        }
        self.persist_entity(Event::ModelDeleted { id }).await
    }

    fn model_name_taken(&self, name: &str, exclude: Option<Ulid>) -> bool {
        self.models
            .iter()
            .any(|e| e.value().name == name && Some(e.value().id) != exclude)
    }

    // ── Devices ──────────────────────────────────────────────

    pub async fn create_device(
        &self,
        model_id: Ulid,
        mac: &str,
        state: Option<DeviceState>,
    ) -> Result<Device, EngineError> {
        let mac = MacAddr::parse(mac).ok_or(EngineError::Validation("malformed MAC address"))?;
        if !self.models.contains_key(&model_id) {
            return Err(EngineError::NotFound("device model", model_id));
        }
        if self.mac_taken(&mac, None) {
            return Err(EngineError::AlreadyExists("MAC address"));
        }
        let id = Ulid::new();
        let state = state.unwrap_or_default();
        self.persist_entity(Event::DeviceCreated {
            id,
            model_id,
            mac: mac.clone(),
            state,
        })
        .await?;
        Ok(Device {
            id,
            model_id,
            mac,
            state,
        })
    }

    pub async fn update_device(&self, id: Ulid, patch: DevicePatch) -> Result<Device, EngineError> {
        let current = self
            .devices
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound("device", id))?;
        let mac = match patch.mac {
            Some(raw) => {
                MacAddr::parse(&raw).ok_or(EngineError::Validation("malformed MAC address"))?
            }
            None => current.mac,
        };
        let model_id = patch.model_id.unwrap_or(current.model_id);
        let state = patch.state.unwrap_or(current.state);
        if !self.models.contains_key(&model_id) {
            return Err(EngineError::NotFound("device model", model_id));
        }
        if self.mac_taken(&mac, Some(id)) {
            return Err(EngineError::AlreadyExists("MAC address"));
        }
        self.persist_entity(Event::DeviceUpdated {
            id,
            model_id,
            mac: mac.clone(),
            state,
        })
        .await?;
        Ok(Device {
            id,
            model_id,
            mac,
            state,
        })
    }

    /// Delete a device. Refused while any active connection references it
    /// as either endpoint; archived connections don't pin it.
    pub async fn delete_device(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.devices.contains_key(&id) {
            return Err(EngineError::NotFound("device", id));
        }
        let sets: Vec<SharedLinkSet> = self.links.iter().map(|e| e.value().clone()).collect();
        for set in sets {
            let guard = set.read().await;
            if guard
                .links
                .iter()
                .any(|c| !c.archived && (c.parent_device_id == id || c.child_device_id == id))
            {
                return Err(EngineError::InUse("device", id));
            }
        }
        self.persist_entity(Event::DeviceDeleted { id }).await
    }

    fn mac_taken(&self, mac: &MacAddr, exclude: Option<Ulid>) -> bool {
        self.devices
            .iter()
            .any(|e| e.value().mac == *mac && Some(e.value().id) != exclude)
    }

    // ── Connections ──────────────────────────────────────────

    /// Validate and commit a new connection. Gates run in order and fail
    /// fast; the child's write lock is held from the overlap scan through
    /// the WAL append so concurrent creates for one child serialize.
    pub async fn create_connection(
        &self,
        parent_device_id: Ulid,
        child_device_id: Ulid,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
    ) -> Result<ConnectionRecord, EngineError> {
        let end_date = end_date.unwrap_or_else(open_end);
        check_distinct(parent_device_id, child_device_id)?;
        check_installed(
            self.device_state(&parent_device_id),
            "parent device",
            parent_device_id,
        )?;
        check_installed(
            self.device_state(&child_device_id),
            "child device",
            child_device_id,
        )?;
        if start_date > end_date {
            return Err(EngineError::Validation("start date after end date"));
        }
        let span = DateSpan::new(start_date, end_date);
        validate_span(&span)?;

        let set = self.link_set(child_device_id);
        let mut guard = set.write().await;
        if guard.links.len() >= MAX_LINKS_PER_CHILD {
            return Err(EngineError::LimitExceeded("too many connections for child device"));
        }
        check_no_overlap(&guard, &span, None)?;

        let id = Ulid::new();
        let record = ConnectionRecord {
            id,
            parent_device_id,
            child_device_id,
            span,
            archived: false,
        };
        self.wal_append(&Event::ConnectionCreated {
            id,
            parent_device_id,
            child_device_id,
            span,
        })
        .await?;
        guard.insert(record.clone());
        self.connection_to_child.insert(id, child_device_id);
        Ok(record)
    }

    /// Merge a patch onto the stored connection and re-validate. The record
    /// under update is excluded from its own overlap scan.
    pub async fn update_connection(
        &self,
        id: Ulid,
        patch: ConnectionPatch,
    ) -> Result<ConnectionRecord, EngineError> {
        let old_child = self
            .child_of(&id)
            .ok_or(EngineError::NotFound("connection", id))?;
        let old_set = self.link_set(old_child);

        let current = {
            let guard = old_set.read().await;
            guard
                .get(id)
                .filter(|c| !c.archived)
                .cloned()
                .ok_or(EngineError::NotFound("connection", id))?
        };

        let parent_device_id = patch.parent_device_id.unwrap_or(current.parent_device_id);
        let child_device_id = patch.child_device_id.unwrap_or(current.child_device_id);
        let start_date = patch.start_date.unwrap_or(current.span.start);
        let end_date = patch.end_date.unwrap_or(current.span.end);

        // Covers the cross-collision case too: patching only one endpoint
        // to equal the other (unpatched) endpoint lands here.
        check_distinct(parent_device_id, child_device_id)?;
        if start_date > end_date {
            return Err(EngineError::Validation("start date after end date"));
        }
        let span = DateSpan::new(start_date, end_date);
        validate_span(&span)?;

        if patch.parent_device_id.is_some() {
            check_installed(
                self.device_state(&parent_device_id),
                "parent device",
                parent_device_id,
            )?;
        }

        let span_changed = span != current.span;
        let recheck_child = patch.child_device_id.is_some() || span_changed;
        if recheck_child {
            check_installed(
                self.device_state(&child_device_id),
                "child device",
                child_device_id,
            )?;
        }

        let record = ConnectionRecord {
            id,
            parent_device_id,
            child_device_id,
            span,
            archived: false,
        };
        let event = Event::ConnectionUpdated {
            id,
            parent_device_id,
            child_device_id,
            span,
        };

        if child_device_id == old_child {
            let mut guard = old_set.write().await;
            if guard.get(id).filter(|c| !c.archived).is_none() {
                return Err(EngineError::NotFound("connection", id));
            }
            if recheck_child {
                check_no_overlap(&guard, &span, Some(id))?;
            }
            self.wal_append(&event).await?;
            guard.remove(id);
            guard.insert(record.clone());
        } else {
            let new_set = self.link_set(child_device_id);
            // Lock both children in id order so concurrent updates cannot deadlock.
            let (mut old_guard, mut new_guard) = if old_child < child_device_id {
                let o = old_set.write().await;
                let n = new_set.write().await;
                (o, n)
            } else {
                let n = new_set.write().await;
                let o = old_set.write().await;
                (o, n)
            };
            if old_guard.get(id).filter(|c| !c.archived).is_none() {
                return Err(EngineError::NotFound("connection", id));
            }
            if new_guard.links.len() >= MAX_LINKS_PER_CHILD {
                return Err(EngineError::LimitExceeded("too many connections for child device"));
            }
            check_no_overlap(&new_guard, &span, Some(id))?;
            self.wal_append(&event).await?;
            old_guard.remove(id);
            new_guard.insert(record.clone());
            self.connection_to_child.insert(id, child_device_id);
        }
        Ok(record)
    }

    /// Soft delete: the record stays for audit but leaves the active set,
    /// freeing its date slot for new connections.
    pub async fn archive_connection(&self, id: Ulid) -> Result<(), EngineError> {
        let child = self
            .child_of(&id)
            .ok_or(EngineError::NotFound("connection", id))?;
        let set = self.link_set(child);
        let mut guard = set.write().await;
        match guard.get(id) {
            Some(c) if !c.archived => {}
            _ => return Err(EngineError::NotFound("connection", id)),
        }
        self.wal_append(&Event::ConnectionArchived { id }).await?;
        if let Some(rec) = guard.get_mut(id) {
            rec.archived = true;
        }
        Ok(())
    }

    /// Hard delete: removes the record entirely, archived or not.
    pub async fn delete_connection(&self, id: Ulid) -> Result<(), EngineError> {
        let child = self
            .child_of(&id)
            .ok_or(EngineError::NotFound("connection", id))?;
        let set = self.link_set(child);
        let mut guard = set.write().await;
        if guard.get(id).is_none() {
            return Err(EngineError::NotFound("connection", id));
        }
        self.wal_append(&Event::ConnectionDeleted { id }).await?;
        guard.remove(id);
        self.connection_to_child.remove(&id);
        Ok(())
    }

    // ── Users ────────────────────────────────────────────────

    pub async fn create_user(
        &self,
        username: &str,
        password_hash: String,
    ) -> Result<User, EngineError> {
        check_username(username)?;
        if self.username_taken(username, None) {
            return Err(EngineError::AlreadyExists("username"));
        }
        let id = Ulid::new();
        self.persist_entity(Event::UserCreated {
            id,
            username: username.to_string(),
            password_hash: password_hash.clone(),
        })
        .await?;
        Ok(User {
            id,
            username: username.to_string(),
            password_hash,
        })
    }

    pub async fn update_user(
        &self,
        id: Ulid,
        username: Option<String>,
        password_hash: Option<String>,
    ) -> Result<User, EngineError> {
        let current = self
            .users
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound("user", id))?;
        let username = username.unwrap_or(current.username);
        let password_hash = password_hash.unwrap_or(current.password_hash);
        check_username(&username)?;
        if self.username_taken(&username, Some(id)) {
            return Err(EngineError::AlreadyExists("username"));
        }
        self.persist_entity(Event::UserUpdated {
            id,
            username: username.clone(),
            password_hash: password_hash.clone(),
        })
        .await?;
        Ok(User {
            id,
            username,
            password_hash,
        })
    }

    pub async fn delete_user(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.users.contains_key(&id) {
            return Err(EngineError::NotFound("user", id));
        }
        self.persist_entity(Event::UserDeleted { id }).await
    }

    fn username_taken(&self, username: &str, exclude: Option<Ulid>) -> bool {
        self.users
            .iter()
            .any(|e| e.value().username == username && Some(e.value().id) != exclude)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Replay does no referential checks, so
    /// event ordering across entity kinds doesn't matter.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        for e in self.types.iter() {
            events.push(Event::TypeCreated {
                id: e.value().id,
                name: e.value().name.clone(),
            });
        }
        for e in self.models.iter() {
            events.push(Event::ModelCreated {
                id: e.value().id,
                name: e.value().name.clone(),
                type_id: e.value().type_id,
            });
        }
        for e in self.devices.iter() {
            let d = e.value();
            events.push(Event::DeviceCreated {
                id: d.id,
                model_id: d.model_id,
                mac: d.mac.clone(),
                state: d.state,
            });
        }
        for e in self.users.iter() {
            let u = e.value();
            events.push(Event::UserCreated {
                id: u.id,
                username: u.username.clone(),
                password_hash: u.password_hash.clone(),
            });
        }
        let sets: Vec<SharedLinkSet> = self.links.iter().map(|e| e.value().clone()).collect();
        for set in sets {
            let guard = set.read().await;
            for c in &guard.links {
                events.push(Event::ConnectionCreated {
                    id: c.id,
                    parent_device_id: c.parent_device_id,
                    child_device_id: c.child_device_id,
                    span: c.span,
                });
                if c.archived {
                    events.push(Event::ConnectionArchived { id: c.id });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn check_username(username: &str) -> Result<(), EngineError> {
    if username.trim().is_empty() {
        return Err(EngineError::Validation("empty username"));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(EngineError::LimitExceeded("username too long"));
    }
    Ok(())
}
