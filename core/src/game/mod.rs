mod bootstrap;
mod causal;
mod config;
mod constants;
pub(crate) use constants::*;
mod diplomacy;
mod effects;
mod market;
mod senate;
mod simulation;
mod state;

pub use bootstrap::GameBuilder;
pub use causal::{
    CausalGraph, CausalGraphBuilder, CausalGraphError, ChanceSpec, Forecast, MonteCarlo,
    Realisation, linear_chance,
};
pub use config::{
    CausalGraphDefinition, CityDefinition, GameConfig, InfluenceDefinition, NodeDefinition,
    PriceDefinition, SenatorDefinition,
};
pub use constants::{DENARII, ENVOY_COST};
pub use diplomacy::{
    DiplomacyConfig, EnvoyOutcome, EnvoyRequest, SuccessFactors, SuccessTier,
    calculate_envoy_success_factors, resolve_envoy, risk_assessment,
};
pub use effects::{
    AppliedEffect, ApplyOutcome, Effect, EffectLog, Rejection, RejectionKind, apply, preview,
};
pub use market::{
    CityMarket, MarketState, PriceDifferential, PriceEntry, PriceModifier, PricingConfig,
    TradeOrder, TradeQuote, TradeSide, differentials, quote_trade, reputation_factor,
    trade_routes,
};
pub use senate::{
    ArcRaw, ChanceGate, ChoicePreview, ChoiceRaw, ChoiceView, DisabledEvent, EventStatus,
    Outcome, PresentedEvent, Resolution, SenateEventRaw, Transition,
};
pub use simulation::{ChoiceReport, EnvoyReport, RoundReport, Simulation, TradeReport};
pub use state::{
    Bound, Bounds, FlagEntry, GameState, RelationView, SenatorState, StateProjection,
};
