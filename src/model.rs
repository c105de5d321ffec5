use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Open-ended connections carry this far-future end date instead of an
/// absent field, so every stored interval is closed and comparable.
pub fn open_end() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 12, 31).expect("sentinel date is valid")
}

/// Closed calendar-day interval `[start, end]` — both days inclusive.
/// A single-day connection has `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateSpan start must not be after end");
        Self { start, end }
    }

    /// Closed-interval overlap: the spans share at least one calendar day.
    /// A shared boundary day counts.
    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    pub fn is_open_ended(&self) -> bool {
        self.end == open_end()
    }
}

/// Device lifecycle. Only `Installed` devices may take part in a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceState {
    InStock,
    Installed,
    Maintenance,
}

impl Default for DeviceState {
    fn default() -> Self {
        DeviceState::InStock
    }
}

fn mac_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}$").expect("mac pattern compiles")
    })
}

/// Canonical MAC address: uppercase, colon-separated. `-` separators are
/// accepted on input and normalised away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MacAddr(String);

impl MacAddr {
    pub fn parse(raw: &str) -> Option<MacAddr> {
        if !mac_pattern().is_match(raw) {
            return None;
        }
        Some(MacAddr(raw.to_ascii_uppercase().replace('-', ":")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MacAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceType {
    pub id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceModel {
    pub id: Ulid,
    pub name: String,
    pub type_id: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: Ulid,
    pub model_id: Ulid,
    pub mac: MacAddr,
    pub state: DeviceState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub username: String,
    pub password_hash: String,
}

/// A parent→child link over a date span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub id: Ulid,
    pub parent_device_id: Ulid,
    pub child_device_id: Ulid,
    pub span: DateSpan,
    /// Soft-deleted: kept for audit, never counted toward overlap.
    pub archived: bool,
}

/// All connections of one child device, sorted by `span.start`.
/// The no-overlap invariant is scoped to this set.
#[derive(Debug, Clone, Default)]
pub struct ChildLinkSet {
    pub links: Vec<ConnectionRecord>,
}

impl ChildLinkSet {
    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, record: ConnectionRecord) {
        let pos = self
            .links
            .binary_search_by_key(&record.span.start, |c| c.span.start)
            .unwrap_or_else(|e| e);
        self.links.insert(pos, record);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<ConnectionRecord> {
        if let Some(pos) = self.links.iter().position(|c| c.id == id) {
            Some(self.links.remove(pos))
        } else {
            None
        }
    }

    pub fn get(&self, id: Ulid) -> Option<&ConnectionRecord> {
        self.links.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut ConnectionRecord> {
        self.links.iter_mut().find(|c| c.id == id)
    }

    /// Return only records whose span overlaps the query window (closed
    /// intervals). Uses binary search to skip records starting after
    /// `query.end`; a record starting exactly on `query.end` still overlaps.
    pub fn overlapping(&self, query: &DateSpan) -> impl Iterator<Item = &ConnectionRecord> {
        let right_bound = self.links.partition_point(|c| c.span.start <= query.end);
        self.links[..right_bound]
            .iter()
            .filter(move |c| c.span.end >= query.start)
    }

    /// Non-archived records overlapping the query window, optionally
    /// excluding one record by id (the record being updated).
    pub fn active_overlapping<'a>(
        &'a self,
        query: &'a DateSpan,
        exclude: Option<Ulid>,
    ) -> impl Iterator<Item = &'a ConnectionRecord> {
        self.overlapping(query)
            .filter(move |c| !c.archived && Some(c.id) != exclude)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
/// Update events carry the full new state, not a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    TypeCreated {
        id: Ulid,
        name: String,
    },
    TypeUpdated {
        id: Ulid,
        name: String,
    },
    TypeDeleted {
        id: Ulid,
    },
    ModelCreated {
        id: Ulid,
        name: String,
        type_id: Ulid,
    },
    ModelUpdated {
        id: Ulid,
        name: String,
        type_id: Ulid,
    },
    ModelDeleted {
        id: Ulid,
    },
    DeviceCreated {
        id: Ulid,
        model_id: Ulid,
        mac: MacAddr,
        state: DeviceState,
    },
    DeviceUpdated {
        id: Ulid,
        model_id: Ulid,
        mac: MacAddr,
        state: DeviceState,
    },
    DeviceDeleted {
        id: Ulid,
    },
    ConnectionCreated {
        id: Ulid,
        parent_device_id: Ulid,
        child_device_id: Ulid,
        span: DateSpan,
    },
    ConnectionUpdated {
        id: Ulid,
        parent_device_id: Ulid,
        child_device_id: Ulid,
        span: DateSpan,
    },
    ConnectionArchived {
        id: Ulid,
    },
    ConnectionDeleted {
        id: Ulid,
    },
    UserCreated {
        id: Ulid,
        username: String,
        password_hash: String,
    },
    UserUpdated {
        id: Ulid,
        username: String,
        password_hash: String,
    },
    UserDeleted {
        id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceModelInfo {
    pub id: Ulid,
    pub name: String,
    pub type_id: Ulid,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub id: Ulid,
    pub model_id: Ulid,
    pub mac: MacAddr,
    pub state: DeviceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<DeviceModelInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: Ulid,
    pub parent_device_id: Ulid,
    pub child_device_id: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_device: Option<Device>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_device: Option<Device>,
}

/// User as exposed over the API — the password hash never leaves the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserInfo {
    pub id: Ulid,
    pub username: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn link(id: Ulid, start: &str, end: &str) -> ConnectionRecord {
        ConnectionRecord {
            id,
            parent_device_id: Ulid::new(),
            child_device_id: Ulid::new(),
            span: DateSpan::new(d(start), d(end)),
            archived: false,
        }
    }

    #[test]
    fn span_overlap_closed_boundary() {
        let a = DateSpan::new(d("2024-01-01"), d("2024-03-31"));
        let b = DateSpan::new(d("2024-03-31"), d("2024-04-10"));
        let c = DateSpan::new(d("2024-04-01"), d("2024-04-10"));
        assert!(a.overlaps(&b)); // shared boundary day counts
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent days do not
    }

    #[test]
    fn span_single_day() {
        let s = DateSpan::new(d("2024-06-15"), d("2024-06-15"));
        assert!(s.contains_day(d("2024-06-15")));
        assert!(s.overlaps(&s));
        assert!(!s.overlaps(&DateSpan::new(d("2024-06-16"), d("2024-06-20"))));
    }

    #[test]
    fn span_open_ended_overlaps_any_future() {
        let open = DateSpan::new(d("2024-01-01"), open_end());
        assert!(open.is_open_ended());
        assert!(open.overlaps(&DateSpan::new(d("2030-05-01"), d("2030-05-02"))));
    }

    #[test]
    fn mac_parse_canonicalises() {
        let mac = MacAddr::parse("aa-bb-cc-dd-ee-ff").unwrap();
        assert_eq!(mac.as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(
            MacAddr::parse("11:22:33:44:55:66").unwrap().as_str(),
            "11:22:33:44:55:66"
        );
    }

    #[test]
    fn mac_parse_rejects_malformed() {
        assert!(MacAddr::parse("11:22:33:44:55").is_none());
        assert!(MacAddr::parse("11:22:33:44:55:GG").is_none());
        assert!(MacAddr::parse("112233445566").is_none());
        assert!(MacAddr::parse("").is_none());
    }

    #[test]
    fn device_state_wire_spelling() {
        assert_eq!(
            serde_json::to_string(&DeviceState::InStock).unwrap(),
            "\"in-stock\""
        );
        assert_eq!(
            serde_json::to_string(&DeviceState::Installed).unwrap(),
            "\"installed\""
        );
        let s: DeviceState = serde_json::from_str("\"maintenance\"").unwrap();
        assert_eq!(s, DeviceState::Maintenance);
    }

    #[test]
    fn link_set_keeps_start_order() {
        let mut set = ChildLinkSet::default();
        set.insert(link(Ulid::new(), "2024-05-01", "2024-05-31"));
        set.insert(link(Ulid::new(), "2024-01-01", "2024-01-31"));
        set.insert(link(Ulid::new(), "2024-03-01", "2024-03-31"));
        let starts: Vec<NaiveDate> = set.links.iter().map(|c| c.span.start).collect();
        assert_eq!(starts, vec![d("2024-01-01"), d("2024-03-01"), d("2024-05-01")]);
    }

    #[test]
    fn link_set_remove_preserves_order() {
        let mut set = ChildLinkSet::default();
        let ids: Vec<Ulid> = (0..3).map(|_| Ulid::new()).collect();
        set.insert(link(ids[0], "2024-01-01", "2024-01-31"));
        set.insert(link(ids[1], "2024-02-01", "2024-02-28"));
        set.insert(link(ids[2], "2024-03-01", "2024-03-31"));
        assert!(set.remove(ids[1]).is_some());
        assert_eq!(set.links.len(), 2);
        assert_eq!(set.links[0].id, ids[0]);
        assert_eq!(set.links[1].id, ids[2]);
        assert!(set.remove(Ulid::new()).is_none());
    }

    #[test]
    fn link_set_overlapping_prunes_by_start() {
        let mut set = ChildLinkSet::default();
        set.insert(link(Ulid::new(), "2024-01-01", "2024-01-31")); // past
        set.insert(link(Ulid::new(), "2024-03-15", "2024-04-15")); // hit
        set.insert(link(Ulid::new(), "2024-06-01", "2024-06-30")); // future
        let query = DateSpan::new(d("2024-04-01"), d("2024-04-30"));
        let hits: Vec<_> = set.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span.start, d("2024-03-15"));
    }

    #[test]
    fn link_set_overlapping_includes_boundary_start() {
        let mut set = ChildLinkSet::default();
        set.insert(link(Ulid::new(), "2024-04-30", "2024-05-10"));
        let query = DateSpan::new(d("2024-04-01"), d("2024-04-30"));
        // Starts exactly on query.end — closed intervals, so it overlaps.
        assert_eq!(set.overlapping(&query).count(), 1);
    }

    #[test]
    fn link_set_active_excludes_archived_and_self() {
        let mut set = ChildLinkSet::default();
        let own = Ulid::new();
        let mut dead = link(Ulid::new(), "2024-01-01", "2024-12-31");
        dead.archived = true;
        set.insert(dead);
        set.insert(link(own, "2024-03-01", "2024-03-31"));
        let query = DateSpan::new(d("2024-01-01"), d("2024-12-31"));
        assert_eq!(set.active_overlapping(&query, None).count(), 1);
        assert_eq!(set.active_overlapping(&query, Some(own)).count(), 0);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ConnectionCreated {
            id: Ulid::new(),
            parent_device_id: Ulid::new(),
            child_device_id: Ulid::new(),
            span: DateSpan::new(d("2024-01-01"), open_end()),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn device_event_roundtrip() {
        let event = Event::DeviceCreated {
            id: Ulid::new(),
            model_id: Ulid::new(),
            mac: MacAddr::parse("11:22:33:44:55:66").unwrap(),
            state: DeviceState::Installed,
        };
        let bytes = bincode::serialize(&event).unwrap();
        assert_eq!(bincode::deserialize::<Event>(&bytes).unwrap(), event);
    }
}
