/// Resource key holding the player's treasury.
pub const DENARII: &str = "denarii";
/// Default fee for sending an envoy, in denarii.
pub const ENVOY_COST: f64 = 100.0;

pub(crate) const DEFAULT_START_YEAR: u16 = 666;
pub(crate) const MIN_RELATION: f64 = -100.0;
pub(crate) const MAX_RELATION: f64 = 100.0;
pub(crate) const MIN_REPUTATION: f64 = 0.0;
pub(crate) const MAX_REPUTATION: f64 = 100.0;
pub(crate) const MIN_SHOCK_MULTIPLIER: f64 = 0.1;
pub(crate) const MAX_SHOCK_MULTIPLIER: f64 = 10.0;
pub(crate) const DEFAULT_MONTE_CARLO_SAMPLES: usize = 2_000;
