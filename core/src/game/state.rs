use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

use super::market::MarketState;
use super::senate::EventStatus;
use super::{
    MAX_RELATION, MAX_REPUTATION, MAX_SHOCK_MULTIPLIER, MIN_RELATION, MIN_REPUTATION,
    MIN_SHOCK_MULTIPLIER,
};
use crate::time::{RoundCalendar, Season};

/// Inclusive numeric range a stored score must stay within.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub min: f64,
    pub max: f64,
}

impl Bound {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bounds {
    pub relation: Bound,
    pub reputation: Bound,
    pub shock_multiplier: Bound,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            relation: Bound::new(MIN_RELATION, MAX_RELATION),
            reputation: Bound::new(MIN_REPUTATION, MAX_REPUTATION),
            shock_multiplier: Bound::new(MIN_SHOCK_MULTIPLIER, MAX_SHOCK_MULTIPLIER),
        }
    }
}

/// A flag is active through its expiry round and ignored afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagEntry {
    pub set_round: u32,
    pub expiry: Option<u32>,
}

impl FlagEntry {
    pub fn is_active(&self, round: u32) -> bool {
        self.expiry.is_none_or(|expiry| round <= expiry)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenatorState {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) relation: f64,
    pub(crate) cursor: usize,
    #[serde(default)]
    pub(crate) triggered: BTreeSet<String>,
    #[serde(default)]
    pub(crate) statuses: BTreeMap<String, EventStatus>,
}

impl SenatorState {
    pub(crate) fn new(id: String, name: String, relation: f64) -> Self {
        Self {
            id,
            name,
            relation,
            cursor: 0,
            triggered: BTreeSet::new(),
            statuses: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn relation(&self) -> f64 {
        self.relation
    }

    /// Position of the next arc event this senator may reach.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn has_triggered(&self, event_id: &str) -> bool {
        self.triggered.contains(event_id)
    }

    pub fn triggered(&self) -> impl Iterator<Item = &str> {
        self.triggered.iter().map(String::as_str)
    }

    pub fn status_of(&self, event_id: &str) -> Option<EventStatus> {
        self.statuses.get(event_id).copied()
    }
}

/// Root snapshot of a campaign. Everything the simulation owns lives here and
/// the whole value is the unit of persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub(crate) round: u32,
    pub(crate) calendar: RoundCalendar,
    pub(crate) resources: BTreeMap<String, f64>,
    pub(crate) reputation: f64,
    pub(crate) senators: Vec<SenatorState>,
    #[serde(default)]
    pub(crate) flags: BTreeMap<String, FlagEntry>,
    pub(crate) market: MarketState,
    #[serde(default)]
    pub(crate) bounds: Bounds,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationView {
    pub id: String,
    pub name: String,
    pub relation: f64,
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateProjection {
    pub round: u32,
    pub calendar: RoundCalendar,
    pub resources: BTreeMap<String, f64>,
    pub reputation: f64,
    pub relations: Vec<RelationView>,
    pub prices: BTreeMap<String, BTreeMap<String, f64>>,
    pub merchant_reputation: BTreeMap<String, f64>,
    pub active_flags: Vec<String>,
}

impl GameState {
    pub(crate) fn new(
        calendar: RoundCalendar,
        resources: BTreeMap<String, f64>,
        reputation: f64,
        senators: Vec<SenatorState>,
        market: MarketState,
        bounds: Bounds,
    ) -> Self {
        let mut state = Self {
            round: 1,
            calendar,
            resources,
            reputation: bounds.reputation.clamp(reputation),
            senators,
            flags: BTreeMap::new(),
            market,
            bounds,
        };
        state.market.recompute(state.round);
        state
    }

    /// Restores a snapshot produced by [`GameState::to_json`]. Current prices
    /// are never read from the snapshot; they are recomputed from base prices
    /// and the stored modifiers.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut state: GameState = serde_json::from_str(json)
            .map_err(|err| anyhow!("failed to parse game state snapshot: {}", err))?;
        state.market.recompute(state.round);
        state.validate()?;
        Ok(state)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|err| anyhow!("failed to serialise game state: {}", err))
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn calendar(&self) -> RoundCalendar {
        self.calendar
    }

    pub fn season(&self) -> Season {
        self.calendar.season
    }

    pub fn resource(&self, name: &str) -> Option<f64> {
        self.resources.get(name).copied()
    }

    pub fn resources(&self) -> &BTreeMap<String, f64> {
        &self.resources
    }

    pub fn reputation(&self) -> f64 {
        self.reputation
    }

    pub fn senators(&self) -> &[SenatorState] {
        &self.senators
    }

    pub fn senator(&self, id: &str) -> Option<&SenatorState> {
        self.senators.iter().find(|senator| senator.id == id)
    }

    pub(crate) fn senator_mut(&mut self, id: &str) -> Option<&mut SenatorState> {
        self.senators.iter_mut().find(|senator| senator.id == id)
    }

    pub fn relation_of(&self, id: &str) -> Option<f64> {
        self.senator(id).map(SenatorState::relation)
    }

    /// Expired flags are treated as absent even before they are pruned.
    pub fn flag_active(&self, tag: &str) -> bool {
        self.flags
            .get(tag)
            .is_some_and(|entry| entry.is_active(self.round))
    }

    pub fn active_flags(&self) -> impl Iterator<Item = (&str, &FlagEntry)> {
        let round = self.round;
        self.flags
            .iter()
            .filter(move |(_, entry)| entry.is_active(round))
            .map(|(tag, entry)| (tag.as_str(), entry))
    }

    pub fn market(&self) -> &MarketState {
        &self.market
    }

    pub(crate) fn market_mut(&mut self) -> &mut MarketState {
        &mut self.market
    }

    pub fn price(&self, city: &str, resource: &str) -> Option<f64> {
        self.market.price(city, resource)
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub(crate) fn advance_clock(&mut self) {
        self.round = self.round.saturating_add(1);
        self.calendar.advance();
    }

    /// Drops flags whose expiry round has passed. Returns how many were removed.
    pub(crate) fn prune_expired_flags(&mut self) -> usize {
        let round = self.round;
        let before = self.flags.len();
        self.flags.retain(|_, entry| entry.is_active(round));
        before - self.flags.len()
    }

    pub fn projection(&self) -> StateProjection {
        let relations = self
            .senators
            .iter()
            .map(|senator| RelationView {
                id: senator.id.clone(),
                name: senator.name.clone(),
                relation: senator.relation,
            })
            .collect();
        let mut prices = BTreeMap::new();
        let mut merchant_reputation = BTreeMap::new();
        for (city_name, city) in self.market.cities() {
            merchant_reputation.insert(city_name.to_string(), city.merchant_reputation());
            let table = city
                .entries()
                .map(|(resource, entry)| (resource.to_string(), entry.current()))
                .collect();
            prices.insert(city_name.to_string(), table);
        }
        StateProjection {
            round: self.round,
            calendar: self.calendar,
            resources: self.resources.clone(),
            reputation: self.reputation,
            relations,
            prices,
            merchant_reputation,
            active_flags: self.active_flags().map(|(tag, _)| tag.to_string()).collect(),
        }
    }

    /// Checks every stored number against its declared range.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.bounds.relation.is_valid(), "relation bound is invalid");
        ensure!(self.bounds.reputation.is_valid(), "reputation bound is invalid");
        ensure!(
            self.bounds.shock_multiplier.is_valid() && self.bounds.shock_multiplier.min > 0.0,
            "shock multiplier bound is invalid"
        );
        for (name, amount) in &self.resources {
            ensure!(
                amount.is_finite() && *amount >= 0.0,
                "resource '{}' holds invalid amount {}",
                name,
                amount
            );
        }
        ensure!(
            self.reputation.is_finite() && self.bounds.reputation.contains(self.reputation),
            "reputation {} is outside its bound",
            self.reputation
        );
        for senator in &self.senators {
            ensure!(
                senator.relation.is_finite() && self.bounds.relation.contains(senator.relation),
                "relation of senator '{}' is out of bounds: {}",
                senator.id,
                senator.relation
            );
        }
        self.market.validate(&self.bounds)
    }
}
