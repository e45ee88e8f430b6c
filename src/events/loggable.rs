use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity levels for activity logs.
/// Controls retention policies and log filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Critical events: long-term retention, never auto-delete
    Critical,
    /// Important events: medium-term retention (default)
    Important,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Important
    }
}

/// Entities that can be recorded in the activity log.
pub trait Loggable: Serialize + Send + Sync {
    /// Prefix of the event name, e.g. "user_role" in "user_role.assigned".
    fn entity_type(&self) -> &'static str;

    /// The subject ID (usually the entity's primary key)
    fn subject_id(&self) -> Uuid;

    /// Severity level for logs (defaults to Important)
    fn severity(&self) -> Severity {
        Severity::Important
    }

    /// Deletions and revocations are always kept.
    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" | "revoked" => Severity::Critical,
            _ => self.severity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Note {
        id: Uuid,
    }

    impl Loggable for Note {
        fn entity_type(&self) -> &'static str { "note" }
        fn subject_id(&self) -> Uuid { self.id }
    }

    #[test]
    fn removals_escalate_to_critical() {
        let note = Note { id: Uuid::new_v4() };
        assert_eq!(note.severity_for_action("created"), Severity::Important);
        assert_eq!(note.severity_for_action("revoked"), Severity::Critical);
        assert_eq!(note.severity_for_action("deleted").as_str(), "critical");
    }

    #[test]
    fn stored_label_matches_serialized_form() {
        for severity in [Severity::Critical, Severity::Important] {
            assert_eq!(serde_json::to_value(severity).unwrap(), severity.as_str());
        }
    }
}
