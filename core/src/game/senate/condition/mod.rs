mod parser;

use anyhow::Result;

use crate::game::state::{GameState, SenatorState};

/// What an eligibility predicate may look at: the whole campaign plus the
/// senator whose arc is being checked.
#[derive(Clone, Copy)]
pub(crate) struct ConditionContext<'a> {
    pub(crate) state: &'a GameState,
    pub(crate) senator: &'a SenatorState,
}

pub(crate) trait ConditionEvaluator {
    /// Fails when the predicate names something the campaign does not have.
    fn evaluate(&self, context: &ConditionContext<'_>) -> Result<bool>;
}

pub(crate) use parser::parse_condition;
