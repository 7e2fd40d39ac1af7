use anyhow::{Result, anyhow};
use serde::de::DeserializeOwned;

use super::GameConfig;
use crate::game::senate::ArcRaw;

const BUILTIN_WORLD: ConfigSource =
    ConfigSource::Yaml("world.yaml", include_str!("../../../config/world.yaml"));

const BUILTIN_ARCS: &[ConfigSource] = &[
    ConfigSource::Yaml("sulla.yaml", include_str!("../../../config/events/sulla.yaml")),
    ConfigSource::Json("crassus.json", include_str!("../../../config/events/crassus.json")),
    ConfigSource::Yaml("pompey.yaml", include_str!("../../../config/events/pompey.yaml")),
    ConfigSource::Yaml("cicero.yaml", include_str!("../../../config/events/cicero.yaml")),
];

#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    Yaml(&'static str, &'static str),
    Json(&'static str, &'static str),
}

impl ConfigSource {
    fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            ConfigSource::Yaml(name, body) => serde_yaml::from_str(body)
                .map_err(|err| anyhow!("failed to parse YAML source {}: {}", name, err)),
            ConfigSource::Json(name, body) => serde_json::from_str(body)
                .map_err(|err| anyhow!("failed to parse JSON source {}: {}", name, err)),
        }
    }
}

pub(super) fn load_builtin() -> Result<GameConfig> {
    load_from_sources(&BUILTIN_WORLD, BUILTIN_ARCS)
}

/// The world file carries everything but the senate arcs, which come one
/// senator per source and are appended in source order.
fn load_from_sources(world: &ConfigSource, arcs: &[ConfigSource]) -> Result<GameConfig> {
    let mut config: GameConfig = world.parse()?;
    for source in arcs {
        let arc: ArcRaw = source.parse()?;
        config.arcs.push(arc);
    }
    Ok(config)
}
