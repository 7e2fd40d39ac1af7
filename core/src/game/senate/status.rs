use serde::{Deserialize, Serialize};

/// Lifecycle of one senate event for its senator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Dormant,
    Eligible,
    Presented,
    Resolved,
    /// Permanently ineligible after its predicate failed.
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    EligibilityMet,
    EligibilityLost,
    Selected,
    ChoiceSubmitted,
    /// Jumped over by a branching choice.
    Skipped,
    Rearmed,
    Malformed,
}

impl EventStatus {
    /// Returns the next status, or `None` when the trigger does not apply.
    pub fn transition(self, trigger: Transition) -> Option<EventStatus> {
        use EventStatus::*;
        use Transition::*;
        match (self, trigger) {
            (Disabled, _) => None,
            (_, Malformed) => Some(Disabled),
            (Dormant, EligibilityMet) => Some(Eligible),
            (Eligible, EligibilityLost) => Some(Dormant),
            (Eligible, Selected) => Some(Presented),
            (Presented, ChoiceSubmitted) => Some(Resolved),
            (Dormant | Eligible, Skipped) => Some(Resolved),
            (Resolved, Rearmed) => Some(Dormant),
            _ => None,
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, EventStatus::Dormant | EventStatus::Eligible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_runs_through_every_status() {
        let mut status = EventStatus::Dormant;
        for trigger in [
            Transition::EligibilityMet,
            Transition::Selected,
            Transition::ChoiceSubmitted,
            Transition::Rearmed,
        ] {
            status = status.transition(trigger).expect("valid transition");
        }
        assert_eq!(status, EventStatus::Dormant);
    }

    #[test]
    fn resolved_events_cannot_be_presented_again() {
        let resolved = EventStatus::Resolved;
        assert_eq!(resolved.transition(Transition::EligibilityMet), None);
        assert_eq!(resolved.transition(Transition::Selected), None);
        assert_eq!(EventStatus::Dormant.transition(Transition::Selected), None);
    }

    #[test]
    fn disabled_is_terminal() {
        let disabled = EventStatus::Eligible
            .transition(Transition::Malformed)
            .expect("malformed");
        assert_eq!(disabled, EventStatus::Disabled);
        for trigger in [
            Transition::EligibilityMet,
            Transition::Rearmed,
            Transition::Malformed,
            Transition::Skipped,
        ] {
            assert_eq!(disabled.transition(trigger), None);
        }
    }
}
