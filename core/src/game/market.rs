use std::collections::BTreeMap;

use anyhow::{Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

use super::DENARII;
use super::effects::Effect;
use super::state::{Bounds, GameState};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Merchant reputation at which the markup is largest.
    pub reputation_floor: f64,
    /// Merchant reputation at which the discount is largest.
    pub reputation_ceiling: f64,
    pub min_factor: f64,
    pub max_factor: f64,
    pub elasticity: f64,
    pub supply_demand_min: f64,
    pub supply_demand_max: f64,
    /// Share of the current price merchants pay when the player sells.
    pub sell_ratio: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            reputation_floor: 0.0,
            reputation_ceiling: 100.0,
            min_factor: 0.8,
            max_factor: 1.2,
            elasticity: 0.5,
            supply_demand_min: 0.5,
            supply_demand_max: 2.0,
            sell_ratio: 0.9,
        }
    }
}

impl PricingConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        let values = [
            self.reputation_floor,
            self.reputation_ceiling,
            self.min_factor,
            self.max_factor,
            self.elasticity,
            self.supply_demand_min,
            self.supply_demand_max,
            self.sell_ratio,
        ];
        ensure!(
            values.iter().all(|value| value.is_finite()),
            "pricing configuration contains a non-finite value"
        );
        ensure!(
            self.reputation_floor < self.reputation_ceiling,
            "reputation_floor must be below reputation_ceiling"
        );
        ensure!(
            self.min_factor > 0.0 && self.min_factor <= self.max_factor,
            "reputation factors must satisfy 0 < min_factor <= max_factor"
        );
        ensure!(
            self.supply_demand_min > 0.0 && self.supply_demand_min <= self.supply_demand_max,
            "supply/demand range must satisfy 0 < min <= max"
        );
        ensure!(
            self.sell_ratio > 0.0 && self.sell_ratio <= 1.0,
            "sell_ratio must be within (0, 1]"
        );
        Ok(())
    }
}

/// Markup applied by a city's merchants. Falls linearly from `max_factor` at
/// the reputation floor to `min_factor` at the ceiling.
pub fn reputation_factor(reputation: f64, config: &PricingConfig) -> f64 {
    let span = config.reputation_ceiling - config.reputation_floor;
    if span <= f64::EPSILON {
        return (config.min_factor + config.max_factor) / 2.0;
    }
    let reputation = if reputation.is_finite() {
        reputation
    } else {
        config.reputation_floor
    };
    let position = ((reputation - config.reputation_floor) / span).clamp(0.0, 1.0);
    config.max_factor - (config.max_factor - config.min_factor) * position
}

/// Timed multiplicative price modifier, active while `round < expires_at`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceModifier {
    pub multiplier: f64,
    pub registered_round: u32,
    pub expires_at: u32,
}

impl PriceModifier {
    pub fn is_active(&self, round: u32) -> bool {
        round < self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    base: f64,
    supply: f64,
    demand: f64,
    #[serde(default)]
    modifiers: Vec<PriceModifier>,
    #[serde(skip)]
    current: f64,
}

impl PriceEntry {
    pub fn new(base: f64, supply: f64, demand: f64) -> Self {
        Self {
            base,
            supply: supply.max(0.0),
            demand: demand.max(0.0),
            modifiers: Vec::new(),
            current: base,
        }
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn supply(&self) -> f64 {
        self.supply
    }

    pub fn demand(&self) -> f64 {
        self.demand
    }

    pub fn modifiers(&self) -> &[PriceModifier] {
        &self.modifiers
    }

    pub fn supply_demand_factor(&self, config: &PricingConfig) -> f64 {
        if self.supply <= f64::EPSILON {
            return config.supply_demand_max;
        }
        (self.demand / self.supply)
            .powf(config.elasticity)
            .max(config.supply_demand_min)
            .min(config.supply_demand_max)
    }

    /// Product of the supply/demand factor and every shock still active at `round`.
    pub fn active_multiplier(&self, round: u32, config: &PricingConfig) -> f64 {
        self.modifiers
            .iter()
            .filter(|modifier| modifier.is_active(round))
            .fold(self.supply_demand_factor(config), |acc, modifier| {
                acc * modifier.multiplier
            })
    }

    fn price_at(&self, round: u32, reputation_factor: f64, config: &PricingConfig) -> f64 {
        self.base * self.active_multiplier(round, config) * reputation_factor
    }

    pub(crate) fn recompute(&mut self, round: u32, reputation_factor: f64, config: &PricingConfig) {
        self.current = self.price_at(round, reputation_factor, config);
    }

    pub(crate) fn prune_expired(&mut self, round: u32) -> usize {
        let before = self.modifiers.len();
        self.modifiers.retain(|modifier| modifier.is_active(round));
        before - self.modifiers.len()
    }

    pub(crate) fn register_shock(&mut self, multiplier: f64, duration: u32, round: u32) {
        self.modifiers.push(PriceModifier {
            multiplier,
            registered_round: round,
            expires_at: round.saturating_add(duration),
        });
    }

    /// Returns the supply before and after; supply never drops below zero.
    pub(crate) fn adjust_supply(&mut self, amount: f64) -> (f64, f64) {
        let before = self.supply;
        self.supply = (before + amount).max(0.0);
        (before, self.supply)
    }

    fn validate(&self, city: &str, resource: &str) -> Result<()> {
        ensure!(
            self.base.is_finite() && self.base > 0.0,
            "base price of {} in {} must be positive",
            resource,
            city
        );
        ensure!(
            self.supply.is_finite() && self.supply >= 0.0,
            "supply of {} in {} is invalid",
            resource,
            city
        );
        ensure!(
            self.demand.is_finite() && self.demand >= 0.0,
            "demand of {} in {} is invalid",
            resource,
            city
        );
        ensure!(
            self.modifiers
                .iter()
                .all(|modifier| modifier.multiplier.is_finite() && modifier.multiplier > 0.0),
            "price modifiers of {} in {} are invalid",
            resource,
            city
        );
        ensure!(
            self.current.is_finite() && self.current > 0.0,
            "current price of {} in {} is invalid: {}",
            resource,
            city,
            self.current
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityMarket {
    merchant_reputation: f64,
    resources: BTreeMap<String, PriceEntry>,
}

impl CityMarket {
    pub fn new(merchant_reputation: f64, resources: BTreeMap<String, PriceEntry>) -> Self {
        Self {
            merchant_reputation,
            resources,
        }
    }

    pub fn merchant_reputation(&self) -> f64 {
        self.merchant_reputation
    }

    pub(crate) fn set_merchant_reputation(&mut self, value: f64) {
        self.merchant_reputation = value;
    }

    pub fn entry(&self, resource: &str) -> Option<&PriceEntry> {
        self.resources.get(resource)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &PriceEntry)> {
        self.resources
            .iter()
            .map(|(resource, entry)| (resource.as_str(), entry))
    }

    fn recompute(&mut self, round: u32, config: &PricingConfig) {
        let factor = reputation_factor(self.merchant_reputation, config);
        for entry in self.resources.values_mut() {
            entry.recompute(round, factor, config);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pricing: PricingConfig,
    cities: BTreeMap<String, CityMarket>,
}

impl MarketState {
    pub fn new(pricing: PricingConfig, cities: BTreeMap<String, CityMarket>) -> Self {
        Self { pricing, cities }
    }

    pub fn pricing(&self) -> &PricingConfig {
        &self.pricing
    }

    pub fn cities(&self) -> impl Iterator<Item = (&str, &CityMarket)> {
        self.cities.iter().map(|(name, city)| (name.as_str(), city))
    }

    pub fn city(&self, name: &str) -> Option<&CityMarket> {
        self.cities.get(name)
    }

    pub(crate) fn city_mut(&mut self, name: &str) -> Option<&mut CityMarket> {
        self.cities.get_mut(name)
    }

    pub fn entry(&self, city: &str, resource: &str) -> Option<&PriceEntry> {
        self.cities.get(city).and_then(|market| market.entry(resource))
    }

    pub(crate) fn entry_mut(&mut self, city: &str, resource: &str) -> Option<&mut PriceEntry> {
        self.cities
            .get_mut(city)
            .and_then(|market| market.resources.get_mut(resource))
    }

    pub fn price(&self, city: &str, resource: &str) -> Option<f64> {
        self.entry(city, resource).map(PriceEntry::current)
    }

    /// Per-round pricing pass: expired modifiers are removed first, then every
    /// current price is derived again from its base. Returns the number of
    /// modifiers that expired.
    pub(crate) fn tick(&mut self, round: u32) -> usize {
        let expired = self
            .cities
            .values_mut()
            .flat_map(|city| city.resources.values_mut())
            .map(|entry| entry.prune_expired(round))
            .sum();
        self.recompute(round);
        expired
    }

    pub(crate) fn recompute(&mut self, round: u32) {
        let pricing = self.pricing;
        for city in self.cities.values_mut() {
            city.recompute(round, &pricing);
        }
    }

    pub(crate) fn recompute_city(&mut self, city: &str, round: u32) {
        let pricing = self.pricing;
        if let Some(market) = self.cities.get_mut(city) {
            market.recompute(round, &pricing);
        }
    }

    /// Price once `rounds_ahead` more rounds have passed with no new shocks.
    pub fn project(
        &self,
        city: &str,
        resource: &str,
        round: u32,
        rounds_ahead: u32,
    ) -> Option<f64> {
        let market = self.cities.get(city)?;
        let entry = market.entry(resource)?;
        let factor = reputation_factor(market.merchant_reputation, &self.pricing);
        Some(entry.price_at(round.saturating_add(rounds_ahead), factor, &self.pricing))
    }

    pub(crate) fn validate(&self, bounds: &Bounds) -> Result<()> {
        self.pricing.validate()?;
        for (city_name, city) in &self.cities {
            ensure!(
                city.merchant_reputation.is_finite()
                    && bounds.reputation.contains(city.merchant_reputation),
                "merchant reputation of {} is out of bounds: {}",
                city_name,
                city.merchant_reputation
            );
            for (resource, entry) in &city.resources {
                entry.validate(city_name, resource)?;
            }
        }
        Ok(())
    }
}

/// Cheapest and dearest market for one resource, derived from current prices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceDifferential {
    pub resource: String,
    pub cheapest_city: String,
    pub cheapest_price: f64,
    pub dearest_city: String,
    pub dearest_price: f64,
}

impl PriceDifferential {
    pub fn spread(&self) -> f64 {
        self.dearest_price - self.cheapest_price
    }

    pub fn spread_ratio(&self) -> f64 {
        if self.cheapest_price <= f64::EPSILON {
            0.0
        } else {
            self.dearest_price / self.cheapest_price - 1.0
        }
    }
}

pub fn differentials(market: &MarketState) -> Vec<PriceDifferential> {
    let mut by_resource: BTreeMap<&str, Vec<(&str, f64)>> = BTreeMap::new();
    for (city_name, city) in market.cities() {
        for (resource, entry) in city.entries() {
            by_resource
                .entry(resource)
                .or_default()
                .push((city_name, entry.current()));
        }
    }

    by_resource
        .into_iter()
        .filter(|(_, quotes)| quotes.len() >= 2)
        .filter_map(|(resource, quotes)| {
            let cheapest = quotes
                .iter()
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .copied()?;
            let dearest = quotes
                .iter()
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .copied()?;
            Some(PriceDifferential {
                resource: resource.to_string(),
                cheapest_city: cheapest.0.to_string(),
                cheapest_price: cheapest.1,
                dearest_city: dearest.0.to_string(),
                dearest_price: dearest.1,
            })
        })
        .collect()
}

/// Differentials whose spread ratio reaches `min_spread_ratio`, best first.
pub fn trade_routes(market: &MarketState, min_spread_ratio: f64) -> Vec<PriceDifferential> {
    let mut routes: Vec<PriceDifferential> = differentials(market)
        .into_iter()
        .filter(|route| route.spread_ratio() >= min_spread_ratio)
        .collect();
    routes.sort_by(|a, b| b.spread_ratio().total_cmp(&a.spread_ratio()));
    routes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOrder {
    pub city: String,
    pub resource: String,
    pub quantity: f64,
    pub side: TradeSide,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeQuote {
    pub order: TradeOrder,
    pub unit_price: f64,
    pub total: f64,
    pub effects: Vec<Effect>,
}

/// Prices a trade at current prices and returns the effects that settle it.
pub fn quote_trade(state: &GameState, order: &TradeOrder) -> Result<TradeQuote> {
    ensure!(
        order.quantity.is_finite() && order.quantity > 0.0,
        "trade quantity must be a positive number"
    );
    let entry = state
        .market()
        .entry(&order.city, &order.resource)
        .ok_or_else(|| anyhow!("{} does not trade {}", order.city, order.resource))?;
    let pricing = state.market().pricing();

    let (unit_price, effects) = match order.side {
        TradeSide::Buy => {
            let unit_price = entry.current();
            let total = unit_price * order.quantity;
            let treasury = state.resource(DENARII).unwrap_or(0.0);
            ensure!(
                treasury >= total,
                "purchase costs {:.1} denarii but only {:.1} are available",
                total,
                treasury
            );
            (
                unit_price,
                vec![
                    Effect::resource(DENARII, -total),
                    Effect::resource(order.resource.as_str(), order.quantity),
                    Effect::supply(order.city.as_str(), order.resource.as_str(), -order.quantity),
                ],
            )
        }
        TradeSide::Sell => {
            let unit_price = entry.current() * pricing.sell_ratio;
            let held = state.resource(&order.resource).unwrap_or(0.0);
            ensure!(
                held >= order.quantity,
                "cannot sell {:.1} {} while holding {:.1}",
                order.quantity,
                order.resource,
                held
            );
            (
                unit_price,
                vec![
                    Effect::resource(order.resource.as_str(), -order.quantity),
                    Effect::resource(DENARII, unit_price * order.quantity),
                    Effect::supply(order.city.as_str(), order.resource.as_str(), order.quantity),
                ],
            )
        }
    };

    Ok(TradeQuote {
        order: order.clone(),
        unit_price,
        total: unit_price * order.quantity,
        effects,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::effects::apply;
    use crate::game::state::fixtures::sample_state;

    const TOLERANCE: f64 = 1e-9;

    #[test]
    fn reputation_factor_is_bounded_and_decreasing() {
        let config = PricingConfig::default();
        assert!((reputation_factor(0.0, &config) - 1.2).abs() < TOLERANCE);
        assert!((reputation_factor(100.0, &config) - 0.8).abs() < TOLERANCE);
        assert!((reputation_factor(-40.0, &config) - 1.2).abs() < TOLERANCE);
        assert!((reputation_factor(250.0, &config) - 0.8).abs() < TOLERANCE);
        let mut previous = reputation_factor(0.0, &config);
        for step in 1..=20 {
            let factor = reputation_factor(step as f64 * 5.0, &config);
            assert!(factor <= previous);
            previous = factor;
        }
    }

    #[test]
    fn shocks_compose_multiplicatively_and_expire() {
        let state = sample_state();
        let factor = reputation_factor(50.0, state.market().pricing());
        let base = state.market().entry("roma", "grain").expect("grain").base();

        let outcome = apply(
            state,
            &[
                Effect::price_shock("roma", "grain", 1.2, 2),
                Effect::price_shock("roma", "grain", 1.1, 3),
            ],
        );
        let mut state = outcome.state;
        let shocked = state.price("roma", "grain").expect("price");
        assert!((shocked - base * 1.32 * factor).abs() < TOLERANCE);

        state.advance_clock();
        state.market.tick(state.round);
        let one_left = state.price("roma", "grain").expect("price");
        assert!((one_left - base * 1.32 * factor).abs() < TOLERANCE);

        state.advance_clock();
        state.market.tick(state.round);
        let after_first = state.price("roma", "grain").expect("price");
        assert!((after_first - base * 1.1 * factor).abs() < TOLERANCE);

        state.advance_clock();
        state.market.tick(state.round);
        let settled = state.price("roma", "grain").expect("price");
        assert_eq!(settled, base * 1.0 * factor);
        assert!(state.market().entry("roma", "grain").expect("grain").modifiers().is_empty());
    }

    #[test]
    fn projection_drops_shocks_that_will_have_expired() {
        let state = sample_state();
        let outcome = apply(state, &[Effect::price_shock("ostia", "wine", 1.5, 2)]);
        let state = outcome.state;
        let round = state.round();
        let now = state.market().project("ostia", "wine", round, 0).expect("now");
        let later = state.market().project("ostia", "wine", round, 2).expect("later");
        assert_eq!(Some(now), state.price("ostia", "wine"));
        assert!(later < now);
    }

    #[test]
    fn scarcity_raises_price_within_range() {
        let config = PricingConfig::default();
        let mut entry = PriceEntry::new(10.0, 100.0, 100.0);
        assert_eq!(entry.supply_demand_factor(&config), 1.0);
        entry.adjust_supply(-75.0);
        assert!((entry.supply_demand_factor(&config) - 2.0).abs() < TOLERANCE);
        entry.adjust_supply(-500.0);
        assert_eq!(entry.supply(), 0.0);
        assert_eq!(entry.supply_demand_factor(&config), config.supply_demand_max);
    }

    #[test]
    fn differentials_follow_current_prices() {
        let state = sample_state();
        let routes = differentials(state.market());
        assert_eq!(routes.len(), 2);
        let grain = routes.iter().find(|r| r.resource == "grain").expect("grain");
        assert_eq!(grain.cheapest_city, "ostia");
        assert_eq!(grain.dearest_city, "roma");

        let outcome = apply(state, &[Effect::price_shock("ostia", "grain", 2.0, 1)]);
        let routes = differentials(outcome.state.market());
        let grain = routes.iter().find(|r| r.resource == "grain").expect("grain");
        assert_eq!(grain.cheapest_city, "roma");
    }

    #[test]
    fn trade_routes_filter_by_spread() {
        let state = sample_state();
        let routes = trade_routes(state.market(), 0.3);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].resource, "grain");
        assert!(trade_routes(state.market(), 1.0).is_empty());
    }

    #[test]
    fn quote_trade_builds_settlement_effects() {
        let state = sample_state();
        let order = TradeOrder {
            city: "ostia".to_string(),
            resource: "grain".to_string(),
            quantity: 10.0,
            side: TradeSide::Buy,
        };
        let quote = quote_trade(&state, &order).expect("quote");
        let price = state.price("ostia", "grain").expect("price");
        assert!((quote.total - price * 10.0).abs() < TOLERANCE);

        let before = state.resource(DENARII).expect("denarii");
        let outcome = apply(state, &quote.effects);
        assert!(outcome.rejected.is_empty());
        let after = outcome.state.resource(DENARII).expect("denarii");
        assert!((before - after - quote.total).abs() < TOLERANCE);
        assert_eq!(outcome.state.resource("grain"), Some(50.0));
        assert!(outcome.state.price("ostia", "grain").expect("price") > price);
    }

    #[test]
    fn quote_trade_rejects_unaffordable_and_unknown_orders() {
        let state = sample_state();
        let too_big = TradeOrder {
            city: "roma".to_string(),
            resource: "wine".to_string(),
            quantity: 1_000.0,
            side: TradeSide::Buy,
        };
        assert!(quote_trade(&state, &too_big).is_err());

        let unsold = TradeOrder {
            city: "roma".to_string(),
            resource: "wine".to_string(),
            quantity: 1.0,
            side: TradeSide::Sell,
        };
        assert!(quote_trade(&state, &unsold).is_err());

        let nowhere = TradeOrder {
            city: "carthago".to_string(),
            resource: "grain".to_string(),
            quantity: 1.0,
            side: TradeSide::Buy,
        };
        let err = quote_trade(&state, &nowhere).expect_err("unknown city");
        assert!(err.to_string().contains("carthago"));
    }
}
