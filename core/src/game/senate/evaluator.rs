use anyhow::{Result, anyhow};
use rand::Rng;
use serde::Serialize;

use super::compiler::{CompiledChoice, CompiledSenateEvent};
use crate::game::causal::linear_chance;
use crate::game::effects::Effect;
use crate::game::state::GameState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Unconditional,
    Success,
    Failure,
}

/// Effects a choice resolved to. Nothing has been applied yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub senator: String,
    pub event_id: String,
    pub choice_index: usize,
    pub outcome: Outcome,
    pub chance: Option<f64>,
    pub roll: Option<f64>,
    pub effects: Vec<Effect>,
    /// Arc event to jump to; only set when the choice did not fail.
    pub advance_to: Option<String>,
}

pub(crate) fn choice_at(
    event: &CompiledSenateEvent,
    choice_index: usize,
) -> Result<&CompiledChoice> {
    event.choices.get(choice_index).ok_or_else(|| {
        anyhow!(
            "event '{}' has no choice {} (it offers {})",
            event.id,
            choice_index,
            event.choices.len()
        )
    })
}

/// Current success chance of a gated choice, or `None` when it always succeeds.
pub(crate) fn choice_chance(
    choice: &CompiledChoice,
    senator: &str,
    state: &GameState,
) -> Option<f64> {
    let gate = choice.gate.as_ref()?;
    let relation = state.relation_of(senator).unwrap_or(0.0);
    Some(linear_chance(&gate.chance, relation, state.reputation()))
}

pub(crate) fn evaluate_choice<R: Rng + ?Sized>(
    event: &CompiledSenateEvent,
    choice_index: usize,
    state: &GameState,
    rng: &mut R,
) -> Result<Resolution> {
    let choice = choice_at(event, choice_index)?;
    let gated_chance = choice_chance(choice, &event.senator, state);
    let (outcome, chance, roll, effects) = match (&choice.gate, gated_chance) {
        (Some(gate), Some(chance)) => {
            let roll = rng.gen_range(0.0..1.0);
            if roll < chance {
                (Outcome::Success, Some(chance), Some(roll), choice.effects.clone())
            } else {
                (Outcome::Failure, Some(chance), Some(roll), gate.failure.clone())
            }
        }
        _ => (Outcome::Unconditional, None, None, choice.effects.clone()),
    };
    let advance_to = match outcome {
        Outcome::Failure => None,
        Outcome::Unconditional | Outcome::Success => choice.advance_to.clone(),
    };
    Ok(Resolution {
        senator: event.senator.clone(),
        event_id: event.id.clone(),
        choice_index,
        outcome,
        chance,
        roll,
        effects,
        advance_to,
    })
}
