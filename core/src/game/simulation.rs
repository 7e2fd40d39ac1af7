use std::collections::BTreeMap;

use anyhow::{Result, anyhow, ensure};
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{error, info};

use super::bootstrap::{ConfiguredGraph, GameBootstrap, GameBuilder};
use super::causal::{Forecast, MonteCarlo, Realisation};
use super::config::GameConfig;
use super::diplomacy::{
    DiplomacyConfig, EnvoyOutcome, EnvoyRequest, SuccessFactors, calculate_envoy_success_factors,
    resolve_envoy,
};
use super::effects::{EffectLog, apply};
use super::market::{
    PriceDifferential, TradeOrder, TradeQuote, differentials, quote_trade, trade_routes,
};
use super::senate::{
    ChoicePreview, DisabledEvent, EventStatus, PresentedEvent, Resolution, SenateEngine,
};
use super::state::{GameState, StateProjection};
use crate::time::RoundCalendar;

/// Everything that happened while entering a round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundReport {
    pub round: u32,
    pub calendar: RoundCalendar,
    pub presented: Vec<PresentedEvent>,
    pub log: EffectLog,
    pub disabled: Vec<DisabledEvent>,
    pub rearmed: Vec<String>,
    pub draws: BTreeMap<String, Realisation>,
    pub expired_modifiers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoiceReport {
    pub resolution: Resolution,
    pub log: EffectLog,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvoyReport {
    pub outcome: EnvoyOutcome,
    pub log: EffectLog,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeReport {
    pub quote: TradeQuote,
    pub log: EffectLog,
}

/// Owner of the committed campaign state. Every mutation runs on a copy and
/// is committed only once the copy validates.
pub struct Simulation {
    state: GameState,
    rng: StdRng,
    senate: SenateEngine,
    diplomacy: DiplomacyConfig,
    graphs: BTreeMap<String, ConfiguredGraph>,
    last_report: RoundReport,
}

impl Simulation {
    pub(crate) fn open(bootstrap: GameBootstrap) -> Result<Self> {
        let GameBootstrap {
            rng,
            state,
            senate,
            diplomacy,
            graphs,
            disabled,
        } = bootstrap;
        let mut simulation = Self {
            last_report: empty_report(&state, disabled.clone()),
            state,
            rng,
            senate,
            diplomacy,
            graphs,
        };
        let mut report = simulation.run_round(simulation.state.clone())?;
        let mut opening = disabled;
        opening.append(&mut report.disabled);
        report.disabled = opening;
        simulation.last_report = report;
        Ok(simulation)
    }

    /// Rebuilds a simulation around a saved snapshot. The configuration must
    /// be the one the snapshot was played with; derived prices are recomputed.
    pub fn restore_json(config: GameConfig, json: &str, rng: StdRng) -> Result<Self> {
        let bootstrap = GameBuilder::new(config).with_rng(rng).into_bootstrap()?;
        let mut state = GameState::from_json(json)?;
        let expected: Vec<&str> = bootstrap.state.senators().iter().map(|s| s.id()).collect();
        let found: Vec<&str> = state.senators().iter().map(|s| s.id()).collect();
        ensure!(
            expected == found,
            "snapshot roster {:?} does not match the configured roster {:?}",
            found,
            expected
        );
        let disabled = bootstrap.senate.initialise(&mut state);
        info!(round = state.round(), "campaign restored");
        Ok(Self {
            last_report: empty_report(&state, disabled),
            state,
            rng: bootstrap.rng,
            senate: bootstrap.senate,
            diplomacy: bootstrap.diplomacy,
            graphs: bootstrap.graphs,
        })
    }

    pub fn snapshot_json(&self) -> Result<String> {
        self.state.to_json()
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn projection(&self) -> StateProjection {
        self.state.projection()
    }

    pub fn last_report(&self) -> &RoundReport {
        &self.last_report
    }

    pub fn presented_events(&self) -> Vec<PresentedEvent> {
        self.senate.presented_events(&self.state)
    }

    pub fn event_status(&self, senator: &str, event_id: &str) -> Option<EventStatus> {
        self.senate.event_status(&self.state, senator, event_id)
    }

    /// Moves the campaign to the next round. On failure the previous round
    /// stays committed.
    pub fn advance_round(&mut self) -> Result<RoundReport> {
        let mut next = self.state.clone();
        next.advance_clock();
        let report = self.run_round(next)?;
        self.last_report = report.clone();
        Ok(report)
    }

    /// Per-round pass over `next`: pricing, senate, random draws, then a final
    /// repricing for shocks raised during the round. Commits `next` and the
    /// advanced generator only if the result validates.
    fn run_round(&mut self, mut next: GameState) -> Result<RoundReport> {
        let opening_round = next.round();
        let mut expired_modifiers = next.market_mut().tick(opening_round);

        let round = self.senate.begin_round(next);
        let mut log = round.log;
        let mut state = round.state;

        let mut rng = self.rng.clone();
        let mut draws = BTreeMap::new();
        for (name, configured) in &self.graphs {
            if !configured.draw_each_round {
                continue;
            }
            let realisation = configured.graph.sample(&mut rng);
            let effects: Vec<_> = realisation
                .iter()
                .filter(|(_, happened)| **happened)
                .filter_map(|(node, _)| configured.node_effects.get(node))
                .flatten()
                .cloned()
                .collect();
            if !effects.is_empty() {
                state = log.absorb(apply(state, &effects));
            }
            draws.insert(name.clone(), realisation);
        }

        let current_round = state.round();
        expired_modifiers += state.market_mut().tick(current_round);

        if let Err(err) = state.validate() {
            error!(round = current_round, error = %err, "round discarded");
            return Err(err.context(format!("round {} was discarded", current_round)));
        }

        let report = RoundReport {
            round: current_round,
            calendar: state.calendar(),
            presented: round.presented,
            log,
            disabled: round.disabled,
            rearmed: round.rearmed,
            draws,
            expired_modifiers,
        };
        info!(
            round = current_round,
            calendar = %report.calendar,
            presented = report.presented.len(),
            applied = report.log.applied.len(),
            rejected = report.log.rejected.len(),
            "round committed"
        );
        self.state = state;
        self.rng = rng;
        Ok(report)
    }

    fn commit(&mut self, next: GameState, action: &str) -> Result<()> {
        if let Err(err) = next.validate() {
            error!(action, error = %err, "state change discarded");
            return Err(err.context(format!("{} was discarded", action)));
        }
        self.state = next;
        Ok(())
    }

    pub fn submit_choice(
        &mut self,
        senator: &str,
        event_id: &str,
        choice_index: usize,
    ) -> Result<ChoiceReport> {
        let mut rng = self.rng.clone();
        let submitted =
            self.senate
                .submit_choice(&self.state, senator, event_id, choice_index, &mut rng)?;
        self.commit(submitted.state, "choice")?;
        self.rng = rng;
        info!(
            senator,
            event = event_id,
            outcome = ?submitted.resolution.outcome,
            "choice resolved"
        );
        Ok(ChoiceReport {
            resolution: submitted.resolution,
            log: submitted.log,
            skipped: submitted.skipped,
        })
    }

    pub fn preview_choice(
        &self,
        senator: &str,
        event_id: &str,
        choice_index: usize,
    ) -> Result<ChoicePreview> {
        self.senate
            .preview_choice(&self.state, senator, event_id, choice_index)
    }

    pub fn envoy_preview(&self, target: &str, god_bonus: f64) -> Result<SuccessFactors> {
        let relation = self
            .state
            .relation_of(target)
            .ok_or_else(|| anyhow!("no senator named '{}'", target))?;
        Ok(calculate_envoy_success_factors(
            self.state.reputation(),
            relation,
            god_bonus,
            &self.diplomacy,
        ))
    }

    pub fn send_envoy(&mut self, request: &EnvoyRequest) -> Result<EnvoyReport> {
        let mut rng = self.rng.clone();
        let outcome = resolve_envoy(&self.state, request, &self.diplomacy, &mut rng)?;
        let mut log = EffectLog::default();
        let next = log.absorb(apply(self.state.clone(), &outcome.effects));
        self.commit(next, "envoy")?;
        self.rng = rng;
        info!(senator = %request.target, success = outcome.success, "envoy returned");
        Ok(EnvoyReport { outcome, log })
    }

    pub fn quote_trade(&self, order: &TradeOrder) -> Result<TradeQuote> {
        quote_trade(&self.state, order)
    }

    pub fn execute_trade(&mut self, order: &TradeOrder) -> Result<TradeReport> {
        let quote = quote_trade(&self.state, order)?;
        let mut log = EffectLog::default();
        let next = log.absorb(apply(self.state.clone(), &quote.effects));
        self.commit(next, "trade")?;
        Ok(TradeReport { quote, log })
    }

    pub fn differentials(&self) -> Vec<PriceDifferential> {
        differentials(self.state.market())
    }

    pub fn trade_routes(&self, min_spread_ratio: f64) -> Vec<PriceDifferential> {
        trade_routes(self.state.market(), min_spread_ratio)
    }

    pub fn project_price(&self, city: &str, resource: &str, rounds_ahead: u32) -> Option<f64> {
        self.state
            .market()
            .project(city, resource, self.state.round(), rounds_ahead)
    }

    fn graph(&self, name: &str) -> Result<&ConfiguredGraph> {
        self.graphs
            .get(name)
            .ok_or_else(|| anyhow!("no causal graph named '{}'", name))
    }

    /// Advisory estimate; uses its own seed and never touches the campaign.
    pub fn forecast(&self, graph: &str, samples: usize, seed: u64) -> Result<Forecast> {
        let configured = self.graph(graph)?;
        Ok(MonteCarlo::new(seed)
            .with_samples(samples)
            .estimate(&configured.graph))
    }

    /// One live draw from the campaign generator. Nothing is applied.
    pub fn draw(&mut self, graph: &str) -> Result<Realisation> {
        let mut rng = self.rng.clone();
        let realisation = self.graph(graph)?.graph.sample(&mut rng);
        self.rng = rng;
        Ok(realisation)
    }
}

fn empty_report(state: &GameState, disabled: Vec<DisabledEvent>) -> RoundReport {
    RoundReport {
        round: state.round(),
        calendar: state.calendar(),
        presented: Vec::new(),
        log: EffectLog::default(),
        disabled,
        rearmed: Vec::new(),
        draws: BTreeMap::new(),
        expired_modifiers: 0,
    }
}
