use chrono::Datelike;
use ulid::Ulid;

use crate::limits::MIN_VALID_YEAR;
use crate::model::{open_end, ChildLinkSet, DateSpan, DeviceState};

use super::EngineError;

/// Reject spans outside the representable calendar window. Ordering of the
/// endpoints is a separate gate (`Validation("start date after end date")`)
/// checked by the caller before the span is built.
pub(crate) fn validate_span(span: &DateSpan) -> Result<(), EngineError> {
    if span.start.year() < MIN_VALID_YEAR {
        return Err(EngineError::LimitExceeded("start date out of range"));
    }
    if span.end > open_end() {
        return Err(EngineError::LimitExceeded("end date out of range"));
    }
    Ok(())
}

/// Gate: a device cannot be connected to itself.
pub(crate) fn check_distinct(parent_id: Ulid, child_id: Ulid) -> Result<(), EngineError> {
    if parent_id == child_id {
        return Err(EngineError::Validation("identical devices"));
    }
    Ok(())
}

/// Gate: the referenced device exists and is installed. `state` is the
/// directory lookup result; `role` names the endpoint for the error message.
pub(crate) fn check_installed(
    state: Option<DeviceState>,
    role: &'static str,
    id: Ulid,
) -> Result<(), EngineError> {
    match state {
        None => Err(EngineError::NotFound(role, id)),
        Some(DeviceState::Installed) => Ok(()),
        Some(_) => Err(EngineError::Precondition(role, id)),
    }
}

/// Gate: no active interval for the child overlaps the candidate span.
/// Closed-interval comparison — a shared boundary day is a conflict.
/// `exclude` skips the record being updated so it never collides with itself.
pub(crate) fn check_no_overlap(
    set: &ChildLinkSet,
    span: &DateSpan,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    if let Some(hit) = set.active_overlapping(span, exclude).next() {
        return Err(EngineError::Conflict(hit.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConnectionRecord;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn set_with(spans: &[(&str, &str)]) -> ChildLinkSet {
        let mut set = ChildLinkSet::default();
        for (start, end) in spans {
            set.insert(ConnectionRecord {
                id: Ulid::new(),
                parent_device_id: Ulid::new(),
                child_device_id: Ulid::new(),
                span: DateSpan::new(d(start), d(end)),
                archived: false,
            });
        }
        set
    }

    #[test]
    fn distinct_rejects_self_loop() {
        let id = Ulid::new();
        assert_eq!(
            check_distinct(id, id),
            Err(EngineError::Validation("identical devices"))
        );
        assert!(check_distinct(Ulid::new(), Ulid::new()).is_ok());
    }

    #[test]
    fn installed_gate_ordering() {
        let id = Ulid::new();
        assert!(matches!(
            check_installed(None, "parent device", id),
            Err(EngineError::NotFound("parent device", _))
        ));
        assert!(matches!(
            check_installed(Some(DeviceState::InStock), "parent device", id),
            Err(EngineError::Precondition("parent device", _))
        ));
        assert!(matches!(
            check_installed(Some(DeviceState::Maintenance), "child device", id),
            Err(EngineError::Precondition(..))
        ));
        assert!(check_installed(Some(DeviceState::Installed), "child device", id).is_ok());
    }

    #[test]
    fn overlap_shared_boundary_day_conflicts() {
        let set = set_with(&[("2024-01-01", "2024-03-31")]);
        let touching = DateSpan::new(d("2024-03-31"), d("2024-04-10"));
        assert!(matches!(
            check_no_overlap(&set, &touching, None),
            Err(EngineError::Conflict(_))
        ));
        let adjacent = DateSpan::new(d("2024-04-01"), d("2024-04-10"));
        assert!(check_no_overlap(&set, &adjacent, None).is_ok());
    }

    #[test]
    fn overlap_open_ended_blocks_everything_after() {
        let set = set_with(&[("2024-01-01", "9999-12-31")]);
        let later = DateSpan::new(d("2031-06-01"), d("2031-06-30"));
        assert!(matches!(
            check_no_overlap(&set, &later, None),
            Err(EngineError::Conflict(_))
        ));
        let before = DateSpan::new(d("2023-01-01"), d("2023-12-31"));
        assert!(check_no_overlap(&set, &before, None).is_ok());
    }

    #[test]
    fn overlap_excludes_record_under_update() {
        let mut set = ChildLinkSet::default();
        let own = Ulid::new();
        set.insert(ConnectionRecord {
            id: own,
            parent_device_id: Ulid::new(),
            child_device_id: Ulid::new(),
            span: DateSpan::new(d("2024-01-01"), d("2024-06-30")),
            archived: false,
        });
        // Shrinking within its own previously-occupied slot must pass.
        let shrunk = DateSpan::new(d("2024-02-01"), d("2024-05-31"));
        assert!(check_no_overlap(&set, &shrunk, Some(own)).is_ok());
        // Without the exclusion it collides with itself.
        assert!(check_no_overlap(&set, &shrunk, None).is_err());
    }

    #[test]
    fn span_limits() {
        assert!(validate_span(&DateSpan::new(d("2024-01-01"), d("2024-12-31"))).is_ok());
        assert!(matches!(
            validate_span(&DateSpan::new(d("1850-01-01"), d("2024-12-31"))),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(validate_span(&DateSpan::new(d("2024-01-01"), open_end())).is_ok());
    }
}
