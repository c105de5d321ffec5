use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, SharedLinkSet};

/// Filters are an explicit, enumerated set — never freeform key-to-column
/// mapping. Absent fields don't constrain.
#[derive(Debug, Default, Clone)]
pub struct TypeFilter {
    pub name: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ModelFilter {
    pub name: Option<String>,
    pub type_id: Option<Ulid>,
    pub type_name: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct DeviceFilter {
    pub mac: Option<String>,
    pub state: Option<DeviceState>,
    pub model_id: Option<Ulid>,
    pub type_id: Option<Ulid>,
    pub model_name: Option<String>,
    pub type_name: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConnectionFilter {
    pub parent_device_id: Option<Ulid>,
    pub child_device_id: Option<Ulid>,
    /// Keep connections with `startDate >= start_from`.
    pub start_from: Option<NaiveDate>,
    /// Keep connections with `endDate <= end_until`.
    pub end_until: Option<NaiveDate>,
    pub include_archived: bool,
}

impl Engine {
    // ── Device types ─────────────────────────────────────────

    pub fn list_types(&self, filter: &TypeFilter) -> Vec<DeviceType> {
        let mut out: Vec<DeviceType> = self
            .types
            .iter()
            .filter(|e| filter.name.as_deref().is_none_or(|n| e.value().name == n))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|t| t.id);
        out
    }

    pub fn get_type(&self, id: Ulid) -> Result<DeviceType, EngineError> {
        self.types
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound("device type", id))
    }

    // ── Device models ────────────────────────────────────────

    fn model_info(&self, model: &DeviceModel) -> DeviceModelInfo {
        DeviceModelInfo {
            id: model.id,
            name: model.name.clone(),
            type_id: model.type_id,
            device_type: self.types.get(&model.type_id).map(|e| e.value().clone()),
        }
    }

    pub fn list_models(&self, filter: &ModelFilter) -> Vec<DeviceModelInfo> {
        let mut out: Vec<DeviceModelInfo> = self
            .models
            .iter()
            .filter(|e| {
                let m = e.value();
                filter.name.as_deref().is_none_or(|n| m.name == n)
                    && filter.type_id.is_none_or(|t| m.type_id == t)
            })
            .map(|e| self.model_info(e.value()))
            .filter(|info| {
                filter
                    .type_name
                    .as_deref()
                    .is_none_or(|n| info.device_type.as_ref().is_some_and(|t| t.name == n))
            })
            .collect();
        out.sort_by_key(|m| m.id);
        out
    }

    pub fn get_model(&self, id: Ulid) -> Result<DeviceModelInfo, EngineError> {
        self.models
            .get(&id)
            .map(|e| self.model_info(e.value()))
            .ok_or(EngineError::NotFound("device model", id))
    }

    // ── Devices ──────────────────────────────────────────────

    fn device_info(&self, device: &Device) -> DeviceInfo {
        DeviceInfo {
            id: device.id,
            model_id: device.model_id,
            mac: device.mac.clone(),
            state: device.state,
            model: self
                .models
                .get(&device.model_id)
                .map(|e| self.model_info(e.value())),
        }
    }

    pub fn list_devices(&self, filter: &DeviceFilter) -> Vec<DeviceInfo> {
        // A MAC filter that doesn't parse can't match any stored (canonical) MAC.
        let mac = filter.mac.as_deref().map(MacAddr::parse);
        let mut out: Vec<DeviceInfo> = self
            .devices
            .iter()
            .filter(|e| {
                let d = e.value();
                mac.as_ref()
                    .is_none_or(|m| m.as_ref().is_some_and(|m| *m == d.mac))
                    && filter.state.is_none_or(|s| d.state == s)
                    && filter.model_id.is_none_or(|m| d.model_id == m)
            })
            .map(|e| self.device_info(e.value()))
            .filter(|info| {
                let model = info.model.as_ref();
                filter
                    .type_id
                    .is_none_or(|t| model.is_some_and(|m| m.type_id == t))
                    && filter
                        .model_name
                        .as_deref()
                        .is_none_or(|n| model.is_some_and(|m| m.name == n))
                    && filter.type_name.as_deref().is_none_or(|n| {
                        model
                            .and_then(|m| m.device_type.as_ref())
                            .is_some_and(|t| t.name == n)
                    })
            })
            .collect();
        out.sort_by_key(|d| d.id);
        out
    }

    pub fn get_device(&self, id: Ulid) -> Result<DeviceInfo, EngineError> {
        self.devices
            .get(&id)
            .map(|e| self.device_info(e.value()))
            .ok_or(EngineError::NotFound("device", id))
    }

    // ── Connections ──────────────────────────────────────────

    fn connection_info(&self, record: &ConnectionRecord) -> ConnectionInfo {
        ConnectionInfo {
            id: record.id,
            parent_device_id: record.parent_device_id,
            child_device_id: record.child_device_id,
            start_date: record.span.start,
            end_date: record.span.end,
            archived: record.archived,
            parent_device: self
                .devices
                .get(&record.parent_device_id)
                .map(|e| e.value().clone()),
            child_device: self
                .devices
                .get(&record.child_device_id)
                .map(|e| e.value().clone()),
        }
    }

    pub async fn list_connections(&self, filter: &ConnectionFilter) -> Vec<ConnectionInfo> {
        // A child filter narrows the scan to that child's set.
        let sets: Vec<SharedLinkSet> = match filter.child_device_id {
            Some(child) => self
                .links
                .get(&child)
                .map(|e| vec![e.value().clone()])
                .unwrap_or_default(),
            None => self.links.iter().map(|e| e.value().clone()).collect(),
        };

        let mut out = Vec::new();
        for set in sets {
            let guard = set.read().await;
            for c in &guard.links {
                if c.archived && !filter.include_archived {
                    continue;
                }
                if filter
                    .parent_device_id
                    .is_some_and(|p| c.parent_device_id != p)
                {
                    continue;
                }
                if filter.start_from.is_some_and(|s| c.span.start < s) {
                    continue;
                }
                if filter.end_until.is_some_and(|e| c.span.end > e) {
                    continue;
                }
                out.push(self.connection_info(c));
            }
        }
        out.sort_by_key(|c| c.id);
        out
    }

    /// Archived records are still readable by id — the detail view is the
    /// audit trail. Mutations on them are refused elsewhere.
    pub async fn get_connection(&self, id: Ulid) -> Result<ConnectionInfo, EngineError> {
        let child = self
            .child_of(&id)
            .ok_or(EngineError::NotFound("connection", id))?;
        let set = self.link_set(child);
        let guard = set.read().await;
        guard
            .get(id)
            .map(|c| self.connection_info(c))
            .ok_or(EngineError::NotFound("connection", id))
    }

    // ── Users ────────────────────────────────────────────────

    pub fn list_users(&self) -> Vec<UserInfo> {
        let mut out: Vec<UserInfo> = self
            .users
            .iter()
            .map(|e| UserInfo {
                id: e.value().id,
                username: e.value().username.clone(),
            })
            .collect();
        out.sort_by_key(|u| u.id);
        out
    }

    pub fn get_user(&self, id: Ulid) -> Result<UserInfo, EngineError> {
        self.users
            .get(&id)
            .map(|e| UserInfo {
                id: e.value().id,
                username: e.value().username.clone(),
            })
            .ok_or(EngineError::NotFound("user", id))
    }

    /// Full record including the password hash — for credential checks only.
    pub fn find_user_by_username(&self, username: &str) -> Option<User> {
        self.users
            .iter()
            .find(|e| e.value().username == username)
            .map(|e| e.value().clone())
    }
}
