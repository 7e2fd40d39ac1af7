use serde::{Deserialize, Serialize};
use tracing::debug;

use super::state::{FlagEntry, GameState};

/// A single mutation of the campaign state, as declared by events, envoys and trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    ResourceDelta {
        resource: String,
        amount: f64,
    },
    RelationDelta {
        senator: String,
        amount: f64,
    },
    ReputationDelta {
        amount: f64,
    },
    MerchantReputationDelta {
        city: String,
        amount: f64,
    },
    /// `expiry` counts rounds from the moment the flag is set.
    FlagSet {
        tag: String,
        #[serde(default)]
        expiry: Option<u32>,
    },
    FlagClear {
        tag: String,
    },
    PriceShock {
        city: String,
        resource: String,
        multiplier: f64,
        duration: u32,
    },
    SupplyDelta {
        city: String,
        resource: String,
        amount: f64,
    },
}

impl Effect {
    pub fn resource(resource: impl Into<String>, amount: f64) -> Self {
        Effect::ResourceDelta {
            resource: resource.into(),
            amount,
        }
    }

    pub fn relation(senator: impl Into<String>, amount: f64) -> Self {
        Effect::RelationDelta {
            senator: senator.into(),
            amount,
        }
    }

    pub fn reputation(amount: f64) -> Self {
        Effect::ReputationDelta { amount }
    }

    pub fn merchant_reputation(city: impl Into<String>, amount: f64) -> Self {
        Effect::MerchantReputationDelta {
            city: city.into(),
            amount,
        }
    }

    pub fn flag(tag: impl Into<String>, expiry: Option<u32>) -> Self {
        Effect::FlagSet {
            tag: tag.into(),
            expiry,
        }
    }

    pub fn clear_flag(tag: impl Into<String>) -> Self {
        Effect::FlagClear { tag: tag.into() }
    }

    pub fn price_shock(
        city: impl Into<String>,
        resource: impl Into<String>,
        multiplier: f64,
        duration: u32,
    ) -> Self {
        Effect::PriceShock {
            city: city.into(),
            resource: resource.into(),
            multiplier,
            duration,
        }
    }

    pub fn supply(city: impl Into<String>, resource: impl Into<String>, amount: f64) -> Self {
        Effect::SupplyDelta {
            city: city.into(),
            resource: resource.into(),
            amount,
        }
    }

    fn amount(&self) -> Option<f64> {
        match self {
            Effect::ResourceDelta { amount, .. }
            | Effect::RelationDelta { amount, .. }
            | Effect::ReputationDelta { amount }
            | Effect::MerchantReputationDelta { amount, .. }
            | Effect::SupplyDelta { amount, .. } => Some(*amount),
            Effect::PriceShock { multiplier, .. } => Some(*multiplier),
            Effect::FlagSet { .. } | Effect::FlagClear { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// A resource would have gone negative and was floored at zero.
    ClampedToZero,
    /// A score or parameter was pulled back inside its bound.
    ClampedToBound,
    /// The effect named a senator, city or resource that does not exist.
    ReferenceError,
    /// The effect carried a number that cannot be applied.
    InvalidValue,
}

/// Diagnostic for an effect that was adjusted or skipped. Clamped effects
/// were still applied; reference and value errors were not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub index: usize,
    pub effect: Effect,
    pub kind: RejectionKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedEffect {
    pub index: usize,
    pub effect: Effect,
    pub before: Option<f64>,
    pub after: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub state: GameState,
    pub applied: Vec<AppliedEffect>,
    pub rejected: Vec<Rejection>,
}

/// Accumulates diagnostics across several application passes in one round.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EffectLog {
    pub applied: Vec<AppliedEffect>,
    pub rejected: Vec<Rejection>,
}

impl EffectLog {
    pub fn absorb(&mut self, outcome: ApplyOutcome) -> GameState {
        self.applied.extend(outcome.applied);
        self.rejected.extend(outcome.rejected);
        outcome.state
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.rejected.is_empty()
    }
}

/// Applies `effects` in order. Never fails: problems are reported as
/// rejections and the remaining effects still run.
pub fn apply(state: GameState, effects: &[Effect]) -> ApplyOutcome {
    let mut applier = Applier {
        state,
        applied: Vec::with_capacity(effects.len()),
        rejected: Vec::new(),
    };
    for (index, effect) in effects.iter().enumerate() {
        applier.apply_one(index, effect);
    }
    ApplyOutcome {
        state: applier.state,
        applied: applier.applied,
        rejected: applier.rejected,
    }
}

/// Same as [`apply`] on a copy; the caller's state is untouched.
pub fn preview(state: &GameState, effects: &[Effect]) -> ApplyOutcome {
    apply(state.clone(), effects)
}

struct Applier {
    state: GameState,
    applied: Vec<AppliedEffect>,
    rejected: Vec<Rejection>,
}

impl Applier {
    fn apply_one(&mut self, index: usize, effect: &Effect) {
        if let Some(value) = effect.amount() {
            if !value.is_finite() {
                self.reject(
                    index,
                    effect,
                    RejectionKind::InvalidValue,
                    format!("non-finite value {}", value),
                );
                return;
            }
        }

        match effect {
            Effect::ResourceDelta { resource, amount } => {
                let Some(before) = self.state.resources.get(resource).copied() else {
                    self.reject(
                        index,
                        effect,
                        RejectionKind::ReferenceError,
                        format!("unknown resource '{}'", resource),
                    );
                    return;
                };
                let candidate = before + amount;
                if !candidate.is_finite() {
                    self.reject(
                        index,
                        effect,
                        RejectionKind::InvalidValue,
                        "resource total overflowed".to_string(),
                    );
                    return;
                }
                let after = if candidate < 0.0 {
                    self.reject(
                        index,
                        effect,
                        RejectionKind::ClampedToZero,
                        format!("{} would drop to {:.2}", resource, candidate),
                    );
                    0.0
                } else {
                    candidate
                };
                self.state.resources.insert(resource.clone(), after);
                self.record(index, effect, Some(before), Some(after));
            }
            Effect::RelationDelta { senator, amount } => {
                let bound = self.state.bounds.relation;
                let Some(target) = self.state.senator_mut(senator) else {
                    self.reject(
                        index,
                        effect,
                        RejectionKind::ReferenceError,
                        format!("unknown senator '{}'", senator),
                    );
                    return;
                };
                let before = target.relation;
                let candidate = before + amount;
                target.relation = bound.clamp(candidate);
                let after = target.relation;
                if after != candidate {
                    self.reject(
                        index,
                        effect,
                        RejectionKind::ClampedToBound,
                        format!("relation with {} clamped to {}", senator, after),
                    );
                }
                self.record(index, effect, Some(before), Some(after));
            }
            Effect::ReputationDelta { amount } => {
                let before = self.state.reputation;
                let candidate = before + amount;
                let after = self.state.bounds.reputation.clamp(candidate);
                self.state.reputation = after;
                if after != candidate {
                    self.reject(
                        index,
                        effect,
                        RejectionKind::ClampedToBound,
                        format!("reputation clamped to {}", after),
                    );
                }
                self.record(index, effect, Some(before), Some(after));
            }
            Effect::MerchantReputationDelta { city, amount } => {
                let bound = self.state.bounds.reputation;
                let round = self.state.round;
                let Some(market) = self.state.market.city_mut(city) else {
                    self.reject(
                        index,
                        effect,
                        RejectionKind::ReferenceError,
                        format!("unknown city '{}'", city),
                    );
                    return;
                };
                let before = market.merchant_reputation();
                let candidate = before + amount;
                let after = bound.clamp(candidate);
                market.set_merchant_reputation(after);
                self.state.market.recompute_city(city, round);
                if after != candidate {
                    self.reject(
                        index,
                        effect,
                        RejectionKind::ClampedToBound,
                        format!("merchant reputation in {} clamped to {}", city, after),
                    );
                }
                self.record(index, effect, Some(before), Some(after));
            }
            Effect::FlagSet { tag, expiry } => {
                self.state.prune_expired_flags();
                let round = self.state.round;
                self.state.flags.insert(
                    tag.clone(),
                    FlagEntry {
                        set_round: round,
                        expiry: expiry.map(|rounds| round.saturating_add(rounds)),
                    },
                );
                self.record(index, effect, None, None);
            }
            Effect::FlagClear { tag } => {
                self.state.prune_expired_flags();
                self.state.flags.remove(tag);
                self.record(index, effect, None, None);
            }
            Effect::PriceShock {
                city,
                resource,
                multiplier,
                duration,
            } => {
                if *multiplier <= 0.0 {
                    self.reject(
                        index,
                        effect,
                        RejectionKind::InvalidValue,
                        format!("shock multiplier must be positive, got {}", multiplier),
                    );
                    return;
                }
                let bound = self.state.bounds.shock_multiplier;
                let round = self.state.round;
                if self.state.market.entry(city, resource).is_none() {
                    self.reject(
                        index,
                        effect,
                        RejectionKind::ReferenceError,
                        format!("{} has no market for {}", city, resource),
                    );
                    return;
                }
                let applied_multiplier = bound.clamp(*multiplier);
                if applied_multiplier != *multiplier {
                    self.reject(
                        index,
                        effect,
                        RejectionKind::ClampedToBound,
                        format!("shock multiplier clamped to {}", applied_multiplier),
                    );
                }
                let applied_duration = if *duration == 0 {
                    self.reject(
                        index,
                        effect,
                        RejectionKind::ClampedToBound,
                        "shock duration raised to one round".to_string(),
                    );
                    1
                } else {
                    *duration
                };
                let before = self.state.market.price(city, resource);
                if let Some(entry) = self.state.market.entry_mut(city, resource) {
                    entry.register_shock(applied_multiplier, applied_duration, round);
                }
                self.state.market.recompute_city(city, round);
                let after = self.state.market.price(city, resource);
                self.record(index, effect, before, after);
            }
            Effect::SupplyDelta {
                city,
                resource,
                amount,
            } => {
                let round = self.state.round;
                let Some(entry) = self.state.market.entry_mut(city, resource) else {
                    self.reject(
                        index,
                        effect,
                        RejectionKind::ReferenceError,
                        format!("{} has no market for {}", city, resource),
                    );
                    return;
                };
                let candidate = entry.supply() + amount;
                let (before, after) = entry.adjust_supply(*amount);
                self.state.market.recompute_city(city, round);
                if candidate < 0.0 {
                    self.reject(
                        index,
                        effect,
                        RejectionKind::ClampedToZero,
                        format!("supply of {} in {} floored at zero", resource, city),
                    );
                }
                self.record(index, effect, Some(before), Some(after));
            }
        }
    }

    fn record(&mut self, index: usize, effect: &Effect, before: Option<f64>, after: Option<f64>) {
        self.applied.push(AppliedEffect {
            index,
            effect: effect.clone(),
            before,
            after,
        });
    }

    fn reject(&mut self, index: usize, effect: &Effect, kind: RejectionKind, detail: String) {
        debug!(index, ?kind, %detail, "effect adjusted or skipped");
        self.rejected.push(Rejection {
            index,
            effect: effect.clone(),
            kind,
            detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::DENARII;
    use crate::game::state::fixtures::sample_state;
    use proptest::prelude::*;

    #[test]
    fn overspending_clamps_to_zero_and_reports() {
        let outcome = apply(sample_state(), &[Effect::resource(DENARII, -800.0)]);
        assert_eq!(outcome.state.resource(DENARII), Some(0.0));
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].kind, RejectionKind::ClampedToZero);
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.applied[0].before, Some(500.0));
    }

    #[test]
    fn unknown_targets_are_skipped_without_aborting() {
        let outcome = apply(
            sample_state(),
            &[
                Effect::relation("cato", 10.0),
                Effect::price_shock("carthago", "grain", 1.5, 2),
                Effect::reputation(5.0),
            ],
        );
        assert_eq!(outcome.rejected.len(), 2);
        assert!(
            outcome
                .rejected
                .iter()
                .all(|rejection| rejection.kind == RejectionKind::ReferenceError)
        );
        assert_eq!(outcome.state.reputation(), 25.0);
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.applied[0].index, 2);
    }

    #[test]
    fn misspelt_resource_is_rejected_instead_of_created() {
        let state = sample_state();
        let outcome = apply(state.clone(), &[Effect::resource("denari", 50.0)]);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].kind, RejectionKind::ReferenceError);
        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.state.resource("denari"), None);
        assert_eq!(outcome.state, state);
    }

    #[test]
    fn relation_is_clamped_to_its_bound() {
        let outcome = apply(sample_state(), &[Effect::relation("sulla", 500.0)]);
        assert_eq!(outcome.state.relation_of("sulla"), Some(100.0));
        assert_eq!(outcome.rejected[0].kind, RejectionKind::ClampedToBound);
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let state = sample_state();
        let outcome = apply(
            state.clone(),
            &[
                Effect::resource("grain", f64::NAN),
                Effect::reputation(f64::INFINITY),
                Effect::price_shock("roma", "grain", 0.0, 2),
            ],
        );
        assert_eq!(outcome.rejected.len(), 3);
        assert!(
            outcome
                .rejected
                .iter()
                .all(|rejection| rejection.kind == RejectionKind::InvalidValue)
        );
        assert_eq!(outcome.state, state);
    }

    #[test]
    fn shock_parameters_are_pulled_into_range() {
        let state = sample_state();
        let base_price = state.price("roma", "wine").expect("wine");
        let outcome = apply(state, &[Effect::price_shock("roma", "wine", 50.0, 0)]);
        assert_eq!(outcome.rejected.len(), 2);
        let entry = outcome.state.market().entry("roma", "wine").expect("wine");
        assert_eq!(entry.modifiers()[0].multiplier, 10.0);
        assert_eq!(entry.modifiers()[0].expires_at, 2);
        let shocked = outcome.state.price("roma", "wine").expect("wine");
        assert!((shocked - base_price * 10.0).abs() < 1e-9);
    }

    #[test]
    fn flags_store_absolute_expiry() {
        let outcome = apply(
            sample_state(),
            &[Effect::flag("grain_dole", Some(3)), Effect::flag("triumph", None)],
        );
        let state = outcome.state;
        assert!(state.flag_active("grain_dole"));
        assert_eq!(state.flags["grain_dole"].expiry, Some(4));
        let cleared = apply(state, &[Effect::clear_flag("triumph")]).state;
        assert!(!cleared.flag_active("triumph"));
        assert!(cleared.flag_active("grain_dole"));
    }

    #[test]
    fn merchant_reputation_reprices_the_city() {
        let state = sample_state();
        let before = state.price("ostia", "grain").expect("grain");
        let outcome = apply(state, &[Effect::merchant_reputation("ostia", 30.0)]);
        let after = outcome.state.price("ostia", "grain").expect("grain");
        assert!(after < before);
        let roma = outcome.state.price("roma", "grain").expect("grain");
        assert!((roma - 10.0).abs() < 1e-9);
    }

    #[test]
    fn empty_effect_list_is_identity() {
        let state = sample_state();
        let outcome = apply(state.clone(), &[]);
        assert_eq!(outcome.state, state);
        assert!(outcome.applied.is_empty());
        assert!(outcome.rejected.is_empty());
    }

    #[test]
    fn preview_leaves_the_source_untouched() {
        let state = sample_state();
        let outcome = preview(&state, &[Effect::resource("grain", -10.0)]);
        assert_eq!(outcome.state.resource("grain"), Some(30.0));
        assert_eq!(state.resource("grain"), Some(40.0));
    }

    #[test]
    fn effects_deserialise_from_tagged_yaml() {
        let yaml = r#"
- type: resource_delta
  resource: denarii
  amount: -50
- type: flag_set
  tag: proscriptions
  expiry: 4
- type: price_shock
  city: roma
  resource: grain
  multiplier: 1.3
  duration: 2
"#;
        let effects: Vec<Effect> = serde_yaml::from_str(yaml).expect("parse effects");
        assert_eq!(effects[0], Effect::resource(DENARII, -50.0));
        assert_eq!(effects[1], Effect::flag("proscriptions", Some(4)));
        assert_eq!(effects[2], Effect::price_shock("roma", "grain", 1.3, 2));
    }

    proptest! {
        #[test]
        fn resources_never_go_negative(
            deltas in proptest::collection::vec(-1_000.0f64..1_000.0, 0..16),
        ) {
            let effects: Vec<Effect> =
                deltas.iter().map(|delta| Effect::resource("grain", *delta)).collect();
            let outcome = apply(sample_state(), &effects);
            prop_assert!(outcome.state.resource("grain").unwrap_or(0.0) >= 0.0);
            prop_assert!(outcome.state.validate().is_ok());
        }

        #[test]
        fn relations_stay_within_bounds(
            deltas in proptest::collection::vec(-300.0f64..300.0, 0..16),
        ) {
            let effects: Vec<Effect> =
                deltas.iter().map(|delta| Effect::relation("crassus", *delta)).collect();
            let outcome = apply(sample_state(), &effects);
            let relation = outcome.state.relation_of("crassus").unwrap_or(f64::NAN);
            prop_assert!((-100.0..=100.0).contains(&relation));
        }
    }
}
