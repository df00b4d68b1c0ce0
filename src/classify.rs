use serde::Serialize;

use crate::model::{IssueState, TicketFields};

/// Destination state and labels derived from a ticket's fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// `None` leaves the destination state untouched.
    pub state: Option<IssueState>,
    pub labels: Vec<String>,
    /// Status value outside the known vocabulary, surfaced for a warning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unknown_status: Option<String>,
}

/// Map priority, resolution, version, component and status to state and labels.
///
/// Rules are independent; labels accumulate in that order.
pub fn classify(fields: &TicketFields) -> Classification {
    let mut labels = Vec::new();

    match fields.priority.as_str() {
        "high" => labels.push("high priority".to_string()),
        "low" => labels.push("low priority".to_string()),
        _ => {}
    }

    match fields.resolution.as_str() {
        "invalid" => labels.push("invalid".to_string()),
        "wontfix" => labels.push("won't fix".to_string()),
        "duplicate" => labels.push("duplicate".to_string()),
        "worksforme" => labels.push("works for me".to_string()),
        _ => {}
    }

    match fields.version.as_str() {
        "" | "trunk" | "dev" => {}
        version => labels.push(format!("release-{version}")),
    }

    labels.extend(
        fields
            .component
            .split(',')
            .map(str::trim)
            .filter(|component| !component.is_empty())
            .map(String::from),
    );

    let mut unknown_status = None;
    let state = match fields.status.as_str() {
        "new" | "assigned" => Some(IssueState::Opened),
        "reopened" => Some(IssueState::Reopened),
        "closed" => Some(IssueState::Closed),
        status @ ("accepted" | "reviewing" | "testing") => {
            labels.push(status.to_string());
            None
        }
        other => {
            unknown_status = Some(other.to_string());
            None
        }
    };

    Classification {
        state,
        labels,
        unknown_status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(priority: &str, resolution: &str, version: &str, component: &str, status: &str) -> TicketFields {
        TicketFields {
            priority: priority.into(),
            resolution: resolution.into(),
            version: version.into(),
            component: component.into(),
            status: status.into(),
            ..TicketFields::default()
        }
    }

    #[test]
    fn new_high_priority_ticket_with_components() {
        let c = classify(&fields("high", "", "2.1", "core, ui", "new"));
        assert_eq!(c.state, Some(IssueState::Opened));
        assert_eq!(c.labels, vec!["high priority", "release-2.1", "core", "ui"]);
        assert_eq!(c.unknown_status, None);
    }

    #[test]
    fn medium_trunk_without_component_has_no_labels() {
        let c = classify(&fields("medium", "fixed", "trunk", "", "closed"));
        assert_eq!(c.state, Some(IssueState::Closed));
        assert!(c.labels.is_empty());
    }

    #[test]
    fn resolutions_map_to_labels() {
        for (resolution, label) in [
            ("invalid", "invalid"),
            ("wontfix", "won't fix"),
            ("duplicate", "duplicate"),
            ("worksforme", "works for me"),
        ] {
            let c = classify(&fields("", resolution, "dev", "", "closed"));
            assert_eq!(c.labels, vec![label]);
        }
    }

    #[test]
    fn workflow_statuses_become_labels_without_state() {
        for status in ["accepted", "reviewing", "testing"] {
            let c = classify(&fields("low", "", "", "", status));
            assert_eq!(c.state, None);
            assert_eq!(c.labels, vec!["low priority".to_string(), status.to_string()]);
            assert_eq!(c.unknown_status, None);
        }
    }

    #[test]
    fn reopened_and_assigned_states() {
        assert_eq!(
            classify(&fields("", "", "", "", "reopened")).state,
            Some(IssueState::Reopened)
        );
        assert_eq!(
            classify(&fields("", "", "", "", "assigned")).state,
            Some(IssueState::Opened)
        );
    }

    #[test]
    fn unknown_status_is_reported_not_fatal() {
        let c = classify(&fields("", "", "", "", "needinfo"));
        assert_eq!(c.state, None);
        assert!(c.labels.is_empty());
        assert_eq!(c.unknown_status.as_deref(), Some("needinfo"));
    }

    #[test]
    fn empty_component_pieces_are_skipped() {
        let c = classify(&fields("", "", "", "a,, b ,", "new"));
        assert_eq!(c.labels, vec!["a", "b"]);
    }

    #[test]
    fn classification_is_deterministic() {
        let f = fields("high", "duplicate", "1.0", "db,api", "testing");
        assert_eq!(classify(&f), classify(&f));
    }
}
