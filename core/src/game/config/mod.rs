mod loader;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

use super::causal::{CausalGraph, CausalGraphError};
use super::diplomacy::DiplomacyConfig;
use super::effects::Effect;
use super::market::{CityMarket, MarketState, PriceEntry, PricingConfig};
use super::senate::ArcRaw;
use super::state::{Bounds, GameState, SenatorState};
use super::{DEFAULT_START_YEAR, DENARII};
use crate::time::RoundCalendar;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenatorDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub relation: f64,
}

const fn default_stock() -> f64 {
    100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceDefinition {
    pub base: f64,
    #[serde(default = "default_stock")]
    pub supply: f64,
    #[serde(default = "default_stock")]
    pub demand: f64,
}

const fn default_merchant_reputation() -> f64 {
    50.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityDefinition {
    pub name: String,
    #[serde(default = "default_merchant_reputation")]
    pub merchant_reputation: f64,
    pub prices: BTreeMap<String, PriceDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub name: String,
    pub probability: f64,
    /// Applied when the node comes out true in a per-round draw.
    #[serde(default)]
    pub effects: Vec<Effect>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfluenceDefinition {
    pub from: String,
    pub to: String,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalGraphDefinition {
    pub name: String,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub influences: Vec<InfluenceDefinition>,
    /// Draw the graph once at the start of every round and apply node effects.
    #[serde(default)]
    pub draw_each_round: bool,
}

impl CausalGraphDefinition {
    pub fn build(&self) -> Result<CausalGraph, CausalGraphError> {
        let builder = self
            .nodes
            .iter()
            .fold(CausalGraph::builder(), |builder, node| {
                builder.node(node.name.as_str(), node.probability)
            });
        self.influences
            .iter()
            .fold(builder, |builder, influence| {
                builder.influence(influence.from.as_str(), influence.to.as_str(), influence.delta)
            })
            .build()
    }

    pub(crate) fn node_effects(&self) -> BTreeMap<String, Vec<Effect>> {
        self.nodes
            .iter()
            .filter(|node| !node.effects.is_empty())
            .map(|node| (node.name.clone(), node.effects.clone()))
            .collect()
    }
}

const fn default_start_year() -> u16 {
    DEFAULT_START_YEAR
}

const fn default_reputation() -> f64 {
    20.0
}

/// Everything needed to start a campaign. No balance number is hard-coded;
/// sections left out fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    #[serde(default = "default_start_year")]
    pub start_year: u16,
    #[serde(default = "default_reputation")]
    pub reputation: f64,
    #[serde(default)]
    pub bounds: Bounds,
    #[serde(default)]
    pub resources: BTreeMap<String, f64>,
    pub senators: Vec<SenatorDefinition>,
    #[serde(default)]
    pub cities: Vec<CityDefinition>,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub diplomacy: DiplomacyConfig,
    #[serde(default)]
    pub arcs: Vec<ArcRaw>,
    #[serde(default)]
    pub graphs: Vec<CausalGraphDefinition>,
}

impl GameConfig {
    /// The bundled Roman campaign.
    pub fn builtin() -> Result<Self> {
        loader::load_builtin()
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|err| anyhow!("failed to parse YAML game config: {}", err))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|err| anyhow!("failed to parse JSON game config: {}", err))
    }

    pub fn roster(&self) -> Vec<String> {
        self.senators.iter().map(|senator| senator.id.clone()).collect()
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.senators.is_empty(), "the roster must contain at least one senator");
        ensure!(
            self.bounds.relation.is_valid()
                && self.bounds.reputation.is_valid()
                && self.bounds.shock_multiplier.is_valid()
                && self.bounds.shock_multiplier.min > 0.0,
            "bounds must be finite with min <= max"
        );
        ensure!(self.reputation.is_finite(), "starting reputation must be finite");

        let mut ids = BTreeSet::new();
        for senator in &self.senators {
            ensure!(!senator.id.trim().is_empty(), "senator ids must not be empty");
            ensure!(ids.insert(senator.id.as_str()), "senator '{}' is listed twice", senator.id);
            ensure!(
                senator.relation.is_finite(),
                "relation of senator '{}' must be finite",
                senator.id
            );
        }

        for (name, amount) in &self.resources {
            ensure!(
                amount.is_finite() && *amount >= 0.0,
                "starting amount of '{}' must be a non-negative number",
                name
            );
        }

        let mut cities = BTreeSet::new();
        for city in &self.cities {
            ensure!(cities.insert(city.name.as_str()), "city '{}' is listed twice", city.name);
            ensure!(
                city.merchant_reputation.is_finite(),
                "merchant reputation of '{}' must be finite",
                city.name
            );
            for (resource, price) in &city.prices {
                ensure!(
                    price.base.is_finite() && price.base > 0.0,
                    "base price of {} in {} must be positive",
                    resource,
                    city.name
                );
                ensure!(
                    price.supply.is_finite()
                        && price.supply >= 0.0
                        && price.demand.is_finite()
                        && price.demand >= 0.0,
                    "supply and demand of {} in {} must be non-negative",
                    resource,
                    city.name
                );
            }
        }

        self.pricing.validate()?;
        self.diplomacy.validate()?;

        let mut graphs = BTreeSet::new();
        for graph in &self.graphs {
            ensure!(
                graphs.insert(graph.name.as_str()),
                "causal graph '{}' is defined twice",
                graph.name
            );
        }
        Ok(())
    }

    /// Opening state of the campaign. Every traded resource appears in the
    /// player's stores, at zero unless configured.
    pub(crate) fn initial_state(&self) -> GameState {
        let bounds = self.bounds;
        let mut resources = self.resources.clone();
        resources.entry(DENARII.to_string()).or_insert(0.0);
        for city in &self.cities {
            for resource in city.prices.keys() {
                resources.entry(resource.clone()).or_insert(0.0);
            }
        }

        let senators = self
            .senators
            .iter()
            .map(|definition| {
                SenatorState::new(
                    definition.id.clone(),
                    definition.name.clone(),
                    bounds.relation.clamp(definition.relation),
                )
            })
            .collect();

        let cities = self
            .cities
            .iter()
            .map(|city| {
                let entries = city
                    .prices
                    .iter()
                    .map(|(resource, price)| {
                        (
                            resource.clone(),
                            PriceEntry::new(price.base, price.supply, price.demand),
                        )
                    })
                    .collect();
                (
                    city.name.clone(),
                    CityMarket::new(bounds.reputation.clamp(city.merchant_reputation), entries),
                )
            })
            .collect();

        GameState::new(
            RoundCalendar::from_start(self.start_year),
            resources,
            self.reputation,
            senators,
            MarketState::new(self.pricing, cities),
            bounds,
        )
    }
}
