use anyhow::{Result, anyhow, ensure};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::compiler::{CompiledSenateEvent, Predicate, SenateCatalog};
use super::condition::ConditionContext;
use super::evaluator::{Resolution, choice_at, choice_chance, evaluate_choice};
use super::formatter::NarrativeText;
use super::status::{EventStatus, Transition};
use crate::game::effects::{ApplyOutcome, Effect, EffectLog, apply, preview};
use crate::game::state::GameState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoiceView {
    pub index: usize,
    pub label: String,
    /// Success chance for gated choices at the current standing.
    pub chance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresentedEvent {
    pub senator: String,
    pub senator_name: String,
    pub event_id: String,
    pub title: String,
    pub narrative: String,
    pub urgent: bool,
    pub choices: Vec<ChoiceView>,
}

/// An event taken out of play because its predicate could not be evaluated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisabledEvent {
    pub senator: String,
    pub event_id: String,
    pub reason: String,
}

/// Dry run of both branches of a choice.
#[derive(Debug, Clone)]
pub struct ChoicePreview {
    pub senator: String,
    pub event_id: String,
    pub choice_index: usize,
    pub chance: Option<f64>,
    pub success: ApplyOutcome,
    pub failure: Option<ApplyOutcome>,
}

#[derive(Debug)]
pub(crate) struct SenateRound {
    pub(crate) state: GameState,
    pub(crate) log: EffectLog,
    pub(crate) presented: Vec<PresentedEvent>,
    pub(crate) disabled: Vec<DisabledEvent>,
    pub(crate) rearmed: Vec<String>,
}

#[derive(Debug)]
pub(crate) struct SubmittedChoice {
    pub(crate) state: GameState,
    pub(crate) resolution: Resolution,
    pub(crate) log: EffectLog,
    pub(crate) skipped: Vec<String>,
}

#[derive(Debug)]
pub(crate) struct SenateEngine {
    catalog: SenateCatalog,
}

fn status_of(state: &GameState, event: &CompiledSenateEvent) -> EventStatus {
    state
        .senator(&event.senator)
        .and_then(|senator| senator.status_of(&event.id))
        .unwrap_or(EventStatus::Dormant)
}

fn transition(state: &mut GameState, event: &CompiledSenateEvent, trigger: Transition) -> bool {
    let Some(senator) = state.senator_mut(&event.senator) else {
        return false;
    };
    let current = senator
        .statuses
        .get(&event.id)
        .copied()
        .unwrap_or(EventStatus::Dormant);
    match current.transition(trigger) {
        Some(next) => {
            senator.statuses.insert(event.id.clone(), next);
            true
        }
        None => {
            debug!(
                senator = %event.senator,
                event = %event.id,
                ?current,
                ?trigger,
                "ignored invalid event transition"
            );
            false
        }
    }
}

fn disable(
    state: &mut GameState,
    event: &CompiledSenateEvent,
    reason: String,
) -> Option<DisabledEvent> {
    if !transition(state, event, Transition::Malformed) {
        return None;
    }
    warn!(senator = %event.senator, event = %event.id, %reason, "senate event disabled");
    Some(DisabledEvent {
        senator: event.senator.clone(),
        event_id: event.id.clone(),
        reason,
    })
}

impl SenateEngine {
    pub(crate) fn new(catalog: SenateCatalog) -> Self {
        Self { catalog }
    }

    pub(crate) fn event_count(&self) -> usize {
        self.catalog.len()
    }

    /// Registers every catalog event with its senator and disables the ones
    /// whose condition never compiled. Existing statuses are kept, so this is
    /// also run on restored snapshots.
    pub(crate) fn initialise(&self, state: &mut GameState) -> Vec<DisabledEvent> {
        let mut disabled = Vec::new();
        for event in self.catalog.events() {
            if let Some(senator) = state.senator_mut(&event.senator) {
                senator
                    .statuses
                    .entry(event.id.clone())
                    .or_insert(EventStatus::Dormant);
            }
            if let Predicate::Malformed(reason) = &event.condition {
                disabled.extend(disable(state, event, format!("malformed condition: {}", reason)));
            }
        }
        disabled
    }

    pub(crate) fn event_status(
        &self,
        state: &GameState,
        senator: &str,
        event_id: &str,
    ) -> Option<EventStatus> {
        self.catalog
            .find(senator, event_id)
            .map(|event| status_of(state, event))
    }

    /// Re-arm, eligibility and selection for the round `state` has just entered.
    pub(crate) fn begin_round(&self, state: GameState) -> SenateRound {
        let mut log = EffectLog::default();
        let mut state = state;

        let mut rearmed = Vec::new();
        let mut consumed: Vec<String> = Vec::new();
        for event in self.catalog.events() {
            let Some(flag) = &event.rearm_flag else {
                continue;
            };
            if status_of(&state, event) != EventStatus::Resolved || !state.flag_active(flag) {
                continue;
            }
            if transition(&mut state, event, Transition::Rearmed) {
                if let Some(senator) = state.senator_mut(&event.senator) {
                    senator.triggered.remove(&event.id);
                }
                rearmed.push(event.id.clone());
                if !consumed.contains(flag) {
                    consumed.push(flag.clone());
                }
            }
        }
        if !consumed.is_empty() {
            let effects: Vec<Effect> = consumed.into_iter().map(Effect::clear_flag).collect();
            state = log.absorb(apply(state, &effects));
        }

        let mut disabled = Vec::new();
        for event in self.catalog.events() {
            let current = status_of(&state, event);
            if !current.is_open() {
                continue;
            }
            match self.is_eligible(&state, event) {
                Ok(true) if current == EventStatus::Dormant => {
                    transition(&mut state, event, Transition::EligibilityMet);
                }
                Ok(false) if current == EventStatus::Eligible => {
                    transition(&mut state, event, Transition::EligibilityLost);
                }
                Ok(_) => {}
                Err(err) => {
                    disabled.extend(disable(&mut state, event, format!("{:#}", err)));
                }
            }
        }

        let roster: Vec<String> = state
            .senators()
            .iter()
            .map(|senator| senator.id().to_string())
            .collect();
        let mut selected = Vec::new();
        for senator in &roster {
            let busy = self
                .catalog
                .for_senator(senator)
                .any(|event| status_of(&state, event) == EventStatus::Presented);
            if busy {
                continue;
            }
            let candidate = self
                .catalog
                .for_senator(senator)
                .filter(|event| status_of(&state, event) == EventStatus::Eligible)
                .min_by_key(|event| {
                    (
                        !event.urgent,
                        event.arc_position.unwrap_or(usize::MAX),
                        event.insertion,
                    )
                });
            if let Some(event) = candidate {
                if transition(&mut state, event, Transition::Selected) {
                    if let Some(record) = state.senator_mut(senator) {
                        record.triggered.insert(event.id.clone());
                    }
                    selected.push(event);
                }
            }
        }

        let mut presented = Vec::with_capacity(selected.len());
        for event in selected {
            if !event.on_present.is_empty() {
                state = log.absorb(apply(state, &event.on_present));
            }
            info!(
                senator = %event.senator,
                event = %event.id,
                round = state.round(),
                "senate event presented"
            );
            presented.push(self.present(&state, event));
        }

        SenateRound {
            state,
            log,
            presented,
            disabled,
            rearmed,
        }
    }

    fn is_eligible(&self, state: &GameState, event: &CompiledSenateEvent) -> Result<bool> {
        let senator = state
            .senator(&event.senator)
            .ok_or_else(|| anyhow!("senator '{}' is not in the campaign", event.senator))?;
        if event.arc_position.is_some_and(|position| position > senator.cursor()) {
            return Ok(false);
        }
        match &event.condition {
            Predicate::Compiled(evaluator) => {
                evaluator.evaluate(&ConditionContext { state, senator })
            }
            Predicate::Malformed(reason) => Err(anyhow!("malformed condition: {}", reason)),
        }
    }

    fn present(&self, state: &GameState, event: &CompiledSenateEvent) -> PresentedEvent {
        let senator_name = state
            .senator(&event.senator)
            .map(|senator| senator.name().to_string())
            .unwrap_or_else(|| event.senator.clone());
        let calendar = state.calendar();
        let narrative = NarrativeText::new(event.narrative.as_str())
            .with("{senator}", &senator_name)
            .with("{round}", state.round())
            .with("{season}", calendar.season.label())
            .with("{year}", calendar.year)
            .render();
        let choices = event
            .choices
            .iter()
            .enumerate()
            .map(|(index, choice)| ChoiceView {
                index,
                label: choice.label.clone(),
                chance: choice_chance(choice, &event.senator, state),
            })
            .collect();
        PresentedEvent {
            senator: event.senator.clone(),
            senator_name,
            event_id: event.id.clone(),
            title: event.title.clone(),
            narrative,
            urgent: event.urgent,
            choices,
        }
    }

    /// Events waiting for a choice, in roster order.
    pub(crate) fn presented_events(&self, state: &GameState) -> Vec<PresentedEvent> {
        state
            .senators()
            .iter()
            .flat_map(|senator| self.catalog.for_senator(senator.id()))
            .filter(|event| status_of(state, event) == EventStatus::Presented)
            .map(|event| self.present(state, event))
            .collect()
    }

    /// Resolves the player's choice on a presented event. The given state is
    /// left untouched; the returned one has the effects applied and the arc
    /// cursor moved.
    pub(crate) fn submit_choice<R: Rng + ?Sized>(
        &self,
        state: &GameState,
        senator: &str,
        event_id: &str,
        choice_index: usize,
        rng: &mut R,
    ) -> Result<SubmittedChoice> {
        let event = self.find(senator, event_id)?;
        let current = status_of(state, event);
        ensure!(
            current == EventStatus::Presented,
            "event '{}' is not awaiting a choice (status {:?})",
            event_id,
            current
        );
        let resolution = evaluate_choice(event, choice_index, state, rng)?;

        let mut log = EffectLog::default();
        let mut next = log.absorb(apply(state.clone(), &resolution.effects));
        let skipped = self.close_event(&mut next, event, resolution.advance_to.as_deref());
        Ok(SubmittedChoice {
            state: next,
            resolution,
            log,
            skipped,
        })
    }

    pub(crate) fn preview_choice(
        &self,
        state: &GameState,
        senator: &str,
        event_id: &str,
        choice_index: usize,
    ) -> Result<ChoicePreview> {
        let event = self.find(senator, event_id)?;
        let choice = choice_at(event, choice_index)?;
        Ok(ChoicePreview {
            senator: event.senator.clone(),
            event_id: event.id.clone(),
            choice_index,
            chance: choice_chance(choice, &event.senator, state),
            success: preview(state, &choice.effects),
            failure: choice.gate.as_ref().map(|gate| preview(state, &gate.failure)),
        })
    }

    fn find(&self, senator: &str, event_id: &str) -> Result<&CompiledSenateEvent> {
        self.catalog
            .find(senator, event_id)
            .ok_or_else(|| anyhow!("senator '{}' has no event '{}'", senator, event_id))
    }

    /// Marks the event resolved and moves the arc cursor. A branch jumps the
    /// cursor to its target and resolves the arc events in between unseen.
    fn close_event(
        &self,
        state: &mut GameState,
        event: &CompiledSenateEvent,
        advance_to: Option<&str>,
    ) -> Vec<String> {
        transition(state, event, Transition::ChoiceSubmitted);
        let mut skipped = Vec::new();
        let Some(position) = event.arc_position else {
            return skipped;
        };
        let mut cursor = state
            .senator(&event.senator)
            .map(|senator| senator.cursor())
            .unwrap_or(0)
            .max(position + 1);

        let target = advance_to
            .and_then(|id| self.catalog.find(&event.senator, id))
            .and_then(|target| target.arc_position);
        if let Some(target) = target {
            for other in self.catalog.for_senator(&event.senator) {
                let Some(other_position) = other.arc_position else {
                    continue;
                };
                if other_position > position
                    && other_position < target
                    && status_of(state, other).is_open()
                    && transition(state, other, Transition::Skipped)
                {
                    skipped.push(other.id.clone());
                }
            }
            cursor = cursor.max(target);
        }

        if let Some(senator) = state.senator_mut(&event.senator) {
            senator.cursor = cursor;
        }
        skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::causal::ChanceSpec;
    use crate::game::senate::compiler::tests::event;
    use crate::game::senate::compiler::{ArcRaw, ChanceGate, SenateEventRaw, compile_catalog};
    use crate::game::state::fixtures::sample_state;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn engine(arcs: Vec<ArcRaw>) -> SenateEngine {
        let roster = vec!["sulla".to_string(), "crassus".to_string()];
        SenateEngine::new(compile_catalog(arcs, &roster).expect("catalog"))
    }

    fn arc(senator: &str, events: Vec<SenateEventRaw>, side_events: Vec<SenateEventRaw>) -> ArcRaw {
        ArcRaw {
            senator: senator.to_string(),
            events,
            side_events,
        }
    }

    fn next_round(engine: &SenateEngine, state: GameState) -> SenateRound {
        let mut state = state;
        state.advance_clock();
        engine.begin_round(state)
    }

    fn ids(presented: &[PresentedEvent]) -> Vec<&str> {
        presented.iter().map(|event| event.event_id.as_str()).collect()
    }

    #[test]
    fn ultimatum_is_not_presented_twice_without_rearm_flag() {
        let mut ultimatum = event("sulla_ultimatum", "relation > 20");
        ultimatum.rearm_flag = Some("sulla_rearm".to_string());
        let engine = engine(vec![arc("sulla", Vec::new(), vec![ultimatum])]);
        let mut state = sample_state();
        engine.initialise(&mut state);

        let round = engine.begin_round(state);
        assert_eq!(ids(&round.presented), vec!["sulla_ultimatum"]);
        let mut rng = StdRng::seed_from_u64(1);
        let mut state = engine
            .submit_choice(&round.state, "sulla", "sulla_ultimatum", 0, &mut rng)
            .expect("choice")
            .state;
        assert!(state.senator("sulla").expect("sulla").has_triggered("sulla_ultimatum"));

        for _ in 0..10 {
            let round = next_round(&engine, state);
            assert!(round.presented.is_empty());
            state = round.state;
        }
        assert_eq!(
            engine.event_status(&state, "sulla", "sulla_ultimatum"),
            Some(EventStatus::Resolved)
        );

        let state = apply(state, &[Effect::flag("sulla_rearm", None)]).state;
        let round = next_round(&engine, state);
        assert_eq!(round.rearmed, vec!["sulla_ultimatum".to_string()]);
        assert_eq!(ids(&round.presented), vec!["sulla_ultimatum"]);
        assert!(!round.state.flag_active("sulla_rearm"));
    }

    #[test]
    fn urgent_events_win_then_arc_order_then_insertion() {
        let mut urgent = event("grain_crisis", "true");
        urgent.urgent = true;
        let engine = engine(vec![arc(
            "sulla",
            vec![event("first_meeting", "true")],
            vec![event("gossip", "true"), urgent],
        )]);
        let mut state = sample_state();
        engine.initialise(&mut state);
        let mut rng = StdRng::seed_from_u64(2);

        let mut order = Vec::new();
        for _ in 0..3 {
            let round = engine.begin_round(state);
            let presented = round.presented[0].event_id.clone();
            state = engine
                .submit_choice(&round.state, "sulla", &presented, 0, &mut rng)
                .expect("choice")
                .state;
            state.advance_clock();
            order.push(presented);
        }
        assert_eq!(order, vec!["grain_crisis", "first_meeting", "gossip"]);
    }

    #[test]
    fn one_event_per_senator_and_roster_order() {
        let engine = engine(vec![
            arc("crassus", Vec::new(), vec![event("loan", "true")]),
            arc("sulla", Vec::new(), vec![event("march", "true"), event("purge", "true")]),
        ]);
        let mut state = sample_state();
        engine.initialise(&mut state);
        let round = engine.begin_round(state);
        assert_eq!(ids(&round.presented), vec!["march", "loan"]);
        assert_eq!(
            engine.event_status(&round.state, "sulla", "purge"),
            Some(EventStatus::Eligible)
        );

        let waiting = next_round(&engine, round.state);
        assert!(waiting.presented.is_empty());
        assert_eq!(ids(&engine.presented_events(&waiting.state)), vec!["march", "loan"]);
    }

    #[test]
    fn failing_predicates_disable_the_event_without_aborting() {
        let engine = engine(vec![arc(
            "sulla",
            Vec::new(),
            vec![
                event("ghost", "relation:cato > 0"),
                event("typo", "relaton > 0"),
                event("fine", "true"),
            ],
        )]);
        let mut state = sample_state();
        let at_start = engine.initialise(&mut state);
        assert_eq!(at_start.len(), 1);
        assert_eq!(at_start[0].event_id, "typo");

        let round = engine.begin_round(state);
        assert_eq!(round.disabled.len(), 1);
        assert_eq!(round.disabled[0].event_id, "ghost");
        assert_eq!(ids(&round.presented), vec!["fine"]);

        let later = next_round(&engine, round.state);
        assert!(later.disabled.is_empty());
        assert_eq!(
            engine.event_status(&later.state, "sulla", "ghost"),
            Some(EventStatus::Disabled)
        );
    }

    #[test]
    fn arc_events_wait_for_the_cursor() {
        let engine = engine(vec![arc(
            "crassus",
            vec![event("first", "relation > 0"), event("second", "true")],
            Vec::new(),
        )]);
        let mut state = sample_state();
        engine.initialise(&mut state);
        let round = engine.begin_round(state);
        assert!(round.presented.is_empty());

        let warmer = apply(round.state, &[Effect::relation("crassus", 20.0)]).state;
        let round = next_round(&engine, warmer);
        assert_eq!(ids(&round.presented), vec!["first"]);
        let mut rng = StdRng::seed_from_u64(3);
        let state = engine
            .submit_choice(&round.state, "crassus", "first", 0, &mut rng)
            .expect("choice")
            .state;
        assert_eq!(state.senator("crassus").expect("crassus").cursor(), 1);
        let round = next_round(&engine, state);
        assert_eq!(ids(&round.presented), vec!["second"]);
    }

    #[test]
    fn branching_choice_skips_intermediate_arc_events() {
        let mut opening = event("opening", "true");
        opening.choices[0].advance_to = Some("finale".to_string());
        let engine = engine(vec![arc(
            "sulla",
            vec![opening, event("middle", "true"), event("finale", "true")],
            Vec::new(),
        )]);
        let mut state = sample_state();
        engine.initialise(&mut state);
        let round = engine.begin_round(state);
        let mut rng = StdRng::seed_from_u64(4);
        let submitted = engine
            .submit_choice(&round.state, "sulla", "opening", 0, &mut rng)
            .expect("choice");
        assert_eq!(submitted.skipped, vec!["middle".to_string()]);
        assert_eq!(submitted.state.senator("sulla").expect("sulla").cursor(), 2);
        assert!(!submitted.state.senator("sulla").expect("sulla").has_triggered("middle"));

        let round = next_round(&engine, submitted.state);
        assert_eq!(ids(&round.presented), vec!["finale"]);
    }

    #[test]
    fn presentation_applies_on_present_effects_and_formats_text() {
        let mut famine = event("famine", "true");
        famine.narrative = "{senator} warns of famine in {season} {year}.".to_string();
        famine.on_present = vec![Effect::price_shock("roma", "grain", 1.5, 2)];
        let engine = engine(vec![arc("sulla", Vec::new(), vec![famine])]);
        let mut state = sample_state();
        engine.initialise(&mut state);
        let before = state.price("roma", "grain").expect("grain");
        let round = engine.begin_round(state);
        assert_eq!(
            round.presented[0].narrative,
            "Lucius Cornelius Sulla warns of famine in Spring 666."
        );
        assert_eq!(round.log.applied.len(), 1);
        let after = round.state.price("roma", "grain").expect("grain");
        assert!((after - before * 1.5).abs() < 1e-9);
    }

    #[test]
    fn choices_must_target_presented_events() {
        let mut bribe = event("bribe", "true");
        bribe.choices[0].effects = vec![Effect::resource("denarii", -50.0)];
        bribe.choices[0].gate = Some(ChanceGate {
            chance: ChanceSpec::fixed(0.5),
            failure: vec![Effect::relation("crassus", -20.0)],
        });
        let engine = engine(vec![arc("crassus", Vec::new(), vec![bribe])]);
        let mut state = sample_state();
        engine.initialise(&mut state);
        let mut rng = StdRng::seed_from_u64(6);
        assert!(engine.submit_choice(&state, "crassus", "bribe", 0, &mut rng).is_err());
        assert!(engine.submit_choice(&state, "crassus", "missing", 0, &mut rng).is_err());

        let round = engine.begin_round(state);
        let preview = engine
            .preview_choice(&round.state, "crassus", "bribe", 0)
            .expect("preview");
        assert_eq!(preview.chance, Some(0.5));
        assert_eq!(preview.success.state.resource("denarii"), Some(450.0));
        let failure = preview.failure.expect("failure branch");
        assert_eq!(failure.state.relation_of("crassus"), Some(-30.0));
        assert_eq!(round.state.resource("denarii"), Some(500.0));
        assert_eq!(round.presented[0].choices[0].chance, Some(0.5));
    }
}
