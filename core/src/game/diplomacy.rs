use anyhow::{Result, anyhow, ensure};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::effects::Effect;
use super::state::GameState;
use super::{DENARII, ENVOY_COST};

/// Tuning of the envoy success curve. Every number here is configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiplomacyConfig {
    /// Largest share of the total chance reputation alone can contribute.
    pub reputation_cap: f64,
    pub reputation_scale: f64,
    pub relation_cap: f64,
    pub relation_scale: f64,
    pub unlikely_below: f64,
    pub uncertain_below: f64,
    pub envoy_cost: f64,
    pub success_relation_gain: f64,
    pub failure_relation_loss: f64,
    pub success_reputation_gain: f64,
}

const fn default_envoy_cost() -> f64 {
    ENVOY_COST
}

impl Default for DiplomacyConfig {
    fn default() -> Self {
        Self {
            reputation_cap: 0.45,
            reputation_scale: 40.0,
            relation_cap: 0.45,
            relation_scale: 50.0,
            unlikely_below: 0.35,
            uncertain_below: 0.65,
            envoy_cost: default_envoy_cost(),
            success_relation_gain: 10.0,
            failure_relation_loss: 5.0,
            success_reputation_gain: 2.0,
        }
    }
}

impl DiplomacyConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        let values = [
            self.reputation_cap,
            self.reputation_scale,
            self.relation_cap,
            self.relation_scale,
            self.unlikely_below,
            self.uncertain_below,
            self.envoy_cost,
            self.success_relation_gain,
            self.failure_relation_loss,
            self.success_reputation_gain,
        ];
        ensure!(
            values.iter().all(|value| value.is_finite()),
            "diplomacy configuration contains a non-finite value"
        );
        ensure!(
            self.reputation_scale > 0.0 && self.relation_scale > 0.0,
            "diplomacy curve scales must be positive"
        );
        ensure!(
            self.reputation_cap >= 0.0 && self.relation_cap >= 0.0,
            "diplomacy caps must not be negative"
        );
        ensure!(
            (0.0..=1.0).contains(&self.unlikely_below)
                && (0.0..=1.0).contains(&self.uncertain_below)
                && self.unlikely_below <= self.uncertain_below,
            "tier thresholds must satisfy 0 <= unlikely_below <= uncertain_below <= 1"
        );
        ensure!(self.envoy_cost >= 0.0, "envoy cost must not be negative");
        Ok(())
    }

    pub fn tier_for(&self, chance: f64) -> SuccessTier {
        if chance < self.unlikely_below {
            SuccessTier::Unlikely
        } else if chance < self.uncertain_below {
            SuccessTier::Uncertain
        } else {
            SuccessTier::Likely
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessTier {
    Unlikely,
    Uncertain,
    Likely,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SuccessFactors {
    pub reputation_bonus: f64,
    pub relation_bonus: f64,
    pub god_bonus: f64,
    pub total_chance: f64,
    pub tier: SuccessTier,
}

fn saturating_bonus(value: f64, cap: f64, scale: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    cap * (value / scale).tanh()
}

fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Scores an envoy mission. Deterministic: the success draw happens elsewhere.
pub fn calculate_envoy_success_factors(
    reputation: f64,
    relation: f64,
    god_bonus: f64,
    config: &DiplomacyConfig,
) -> SuccessFactors {
    let reputation_bonus =
        saturating_bonus(reputation, config.reputation_cap, config.reputation_scale);
    let relation_bonus = saturating_bonus(relation, config.relation_cap, config.relation_scale);
    let god_bonus = if god_bonus.is_finite() { god_bonus } else { 0.0 };
    let total_chance = clamp01(reputation_bonus + relation_bonus + god_bonus);
    SuccessFactors {
        reputation_bonus,
        relation_bonus,
        god_bonus,
        total_chance,
        tier: config.tier_for(total_chance),
    }
}

pub fn risk_assessment(tier: SuccessTier) -> &'static str {
    match tier {
        SuccessTier::Unlikely => "The envoy will most likely return empty-handed.",
        SuccessTier::Uncertain => "The senator may be swayed, but nothing is assured.",
        SuccessTier::Likely => "The senator is well disposed; success is likely.",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvoyRequest {
    pub target: String,
    pub available_denarii: f64,
    #[serde(default)]
    pub god_bonus: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvoyOutcome {
    pub factors: SuccessFactors,
    pub roll: f64,
    pub success: bool,
    pub effects: Vec<Effect>,
}

/// Scores the mission, draws once against the total chance and returns the
/// effects to apply. The cost is charged whatever the result.
pub fn resolve_envoy<R: Rng + ?Sized>(
    state: &GameState,
    request: &EnvoyRequest,
    config: &DiplomacyConfig,
    rng: &mut R,
) -> Result<EnvoyOutcome> {
    let relation = state
        .relation_of(&request.target)
        .ok_or_else(|| anyhow!("no senator named '{}' to receive an envoy", request.target))?;
    let treasury = state.resource(DENARII).unwrap_or(0.0);
    let budget = request.available_denarii.min(treasury);
    ensure!(
        budget >= config.envoy_cost,
        "an envoy costs {:.0} denarii but only {:.0} are available",
        config.envoy_cost,
        budget
    );

    let factors =
        calculate_envoy_success_factors(state.reputation(), relation, request.god_bonus, config);
    let roll = rng.gen_range(0.0..1.0);
    let success = roll < factors.total_chance;
    debug!(
        senator = %request.target,
        chance = factors.total_chance,
        roll,
        success,
        "envoy resolved"
    );

    let mut effects = vec![Effect::resource(DENARII, -config.envoy_cost)];
    if success {
        effects.push(Effect::relation(
            request.target.as_str(),
            config.success_relation_gain,
        ));
        effects.push(Effect::reputation(config.success_reputation_gain));
    } else {
        effects.push(Effect::relation(
            request.target.as_str(),
            -config.failure_relation_loss,
        ));
    }

    Ok(EnvoyOutcome {
        factors,
        roll,
        success,
        effects,
    })
}
