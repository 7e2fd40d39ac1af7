use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::{Result, anyhow, bail, ensure};
use serde::{Deserialize, Serialize};

use super::condition::{ConditionEvaluator, parse_condition};
use crate::game::causal::ChanceSpec;
use crate::game::effects::Effect;

fn default_condition() -> String {
    "true".to_string()
}

/// One senator's event definitions: the ordered arc plus unordered side events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcRaw {
    pub senator: String,
    #[serde(default)]
    pub events: Vec<SenateEventRaw>,
    #[serde(default)]
    pub side_events: Vec<SenateEventRaw>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenateEventRaw {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub narrative: String,
    #[serde(default = "default_condition")]
    pub condition: String,
    #[serde(default)]
    pub urgent: bool,
    #[serde(default)]
    pub rearm_flag: Option<String>,
    #[serde(default)]
    pub on_present: Vec<Effect>,
    pub choices: Vec<ChoiceRaw>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceRaw {
    pub label: String,
    #[serde(default)]
    pub effects: Vec<Effect>,
    #[serde(default)]
    pub gate: Option<ChanceGate>,
    #[serde(default)]
    pub advance_to: Option<String>,
}

/// Probability gate on a choice: `effects` on success, `failure` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChanceGate {
    pub chance: ChanceSpec,
    #[serde(default)]
    pub failure: Vec<Effect>,
}

pub(crate) enum Predicate {
    Compiled(Box<dyn ConditionEvaluator>),
    /// Kept so the event can be reported and disabled instead of failing the load.
    Malformed(String),
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compiled(_) => f.write_str("Compiled(..)"),
            Predicate::Malformed(reason) => f.debug_tuple("Malformed").field(reason).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledChoice {
    pub(crate) label: String,
    pub(crate) effects: Vec<Effect>,
    pub(crate) gate: Option<ChanceGate>,
    pub(crate) advance_to: Option<String>,
}

pub(crate) struct CompiledSenateEvent {
    pub(crate) id: String,
    pub(crate) senator: String,
    pub(crate) title: String,
    pub(crate) narrative: String,
    pub(crate) condition: Predicate,
    pub(crate) urgent: bool,
    pub(crate) arc_position: Option<usize>,
    pub(crate) rearm_flag: Option<String>,
    pub(crate) on_present: Vec<Effect>,
    pub(crate) choices: Vec<CompiledChoice>,
    /// Position in the catalog, the last selection tie-break.
    pub(crate) insertion: usize,
}

impl fmt::Debug for CompiledSenateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSenateEvent")
            .field("id", &self.id)
            .field("senator", &self.senator)
            .field("condition", &self.condition)
            .field("urgent", &self.urgent)
            .field("arc_position", &self.arc_position)
            .field("rearm_flag", &self.rearm_flag)
            .field("choices", &self.choices.len())
            .finish()
    }
}

impl CompiledSenateEvent {
    fn new(
        raw: SenateEventRaw,
        senator: &str,
        arc_position: Option<usize>,
        insertion: usize,
    ) -> Result<Self> {
        ensure!(!raw.id.trim().is_empty(), "event id must not be empty");
        ensure!(!raw.choices.is_empty(), "event '{}' has no choices", raw.id);
        let condition = match parse_condition(&raw.condition) {
            Ok(evaluator) => Predicate::Compiled(evaluator),
            Err(err) => Predicate::Malformed(format!("{:#}", err)),
        };
        let mut choices = Vec::with_capacity(raw.choices.len());
        for (index, choice) in raw.choices.into_iter().enumerate() {
            if let Some(gate) = &choice.gate {
                ensure!(
                    gate.chance.is_valid(),
                    "choice {} of '{}' has an invalid chance window",
                    index,
                    raw.id
                );
            }
            choices.push(CompiledChoice {
                label: choice.label,
                effects: choice.effects,
                gate: choice.gate,
                advance_to: choice.advance_to,
            });
        }
        Ok(Self {
            id: raw.id,
            senator: senator.to_string(),
            title: raw.title,
            narrative: raw.narrative,
            condition,
            urgent: raw.urgent,
            arc_position,
            rearm_flag: raw.rearm_flag,
            on_present: raw.on_present,
            choices,
            insertion,
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct SenateCatalog {
    events: Vec<CompiledSenateEvent>,
}

impl SenateCatalog {
    pub(crate) fn events(&self) -> impl Iterator<Item = &CompiledSenateEvent> {
        self.events.iter()
    }

    pub(crate) fn for_senator<'a>(
        &'a self,
        senator: &'a str,
    ) -> impl Iterator<Item = &'a CompiledSenateEvent> + 'a {
        self.events.iter().filter(move |event| event.senator == senator)
    }

    pub(crate) fn find(&self, senator: &str, event_id: &str) -> Option<&CompiledSenateEvent> {
        self.events
            .iter()
            .find(|event| event.senator == senator && event.id == event_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }
}

/// Compiles every arc against the roster. Structural mistakes are errors;
/// unparsable conditions only mark their event as malformed.
pub(crate) fn compile_catalog(arcs: Vec<ArcRaw>, roster: &[String]) -> Result<SenateCatalog> {
    let known: BTreeSet<&str> = roster.iter().map(String::as_str).collect();
    let mut seen = BTreeSet::new();
    let mut events = Vec::new();
    let mut arc_positions: BTreeMap<(String, String), usize> = BTreeMap::new();

    for arc in arcs {
        ensure!(
            known.contains(arc.senator.as_str()),
            "event arc refers to unknown senator '{}'",
            arc.senator
        );
        let ordered = arc.events.into_iter().enumerate().map(|(p, raw)| (Some(p), raw));
        let side = arc.side_events.into_iter().map(|raw| (None, raw));
        for (arc_position, raw) in ordered.chain(side) {
            if !seen.insert(raw.id.clone()) {
                bail!("senate event id '{}' is defined twice", raw.id);
            }
            let insertion = events.len();
            let id = raw.id.clone();
            let event = CompiledSenateEvent::new(raw, &arc.senator, arc_position, insertion)
                .map_err(|err| anyhow!("failed to compile senate event '{}': {}", id, err))?;
            if let Some(position) = arc_position {
                arc_positions.insert((arc.senator.clone(), event.id.clone()), position);
            }
            events.push(event);
        }
    }

    for event in &events {
        for choice in &event.choices {
            let Some(target) = &choice.advance_to else {
                continue;
            };
            let target_position = arc_positions
                .get(&(event.senator.clone(), target.clone()))
                .ok_or_else(|| {
                    anyhow!(
                        "choice '{}' of '{}' advances to '{}', which is not in {}'s arc",
                        choice.label,
                        event.id,
                        target,
                        event.senator
                    )
                })?;
            let Some(position) = event.arc_position else {
                bail!("side event '{}' cannot branch the arc", event.id);
            };
            ensure!(
                *target_position > position,
                "choice '{}' of '{}' must advance forward in the arc",
                choice.label,
                event.id
            );
        }
    }

    Ok(SenateCatalog { events })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn event(id: &str, condition: &str) -> SenateEventRaw {
        SenateEventRaw {
            id: id.to_string(),
            title: id.to_string(),
            narrative: String::new(),
            condition: condition.to_string(),
            urgent: false,
            rearm_flag: None,
            on_present: Vec::new(),
            choices: vec![ChoiceRaw {
                label: "Accept".to_string(),
                effects: Vec::new(),
                gate: None,
                advance_to: None,
            }],
        }
    }

    fn roster() -> Vec<String> {
        vec!["sulla".to_string(), "crassus".to_string()]
    }

    #[test]
    fn assigns_arc_positions_and_insertion_order() {
        let arcs = vec![ArcRaw {
            senator: "sulla".to_string(),
            events: vec![event("a", "true"), event("b", "relation > 10")],
            side_events: vec![event("c", "true")],
        }];
        let catalog = compile_catalog(arcs, &roster()).expect("catalog");
        let positions: Vec<_> = catalog
            .events()
            .map(|e| (e.id.as_str(), e.arc_position, e.insertion))
            .collect();
        assert_eq!(positions, vec![("a", Some(0), 0), ("b", Some(1), 1), ("c", None, 2)]);
    }

    #[test]
    fn malformed_conditions_do_not_fail_compilation() {
        let arcs = vec![ArcRaw {
            senator: "crassus".to_string(),
            events: vec![event("broken", "wealth >>> 3")],
            side_events: Vec::new(),
        }];
        let catalog = compile_catalog(arcs, &roster()).expect("catalog");
        let broken = catalog.find("crassus", "broken").expect("event");
        assert!(matches!(broken.condition, Predicate::Malformed(_)));
    }

    #[test]
    fn rejects_structural_mistakes() {
        let unknown = vec![ArcRaw {
            senator: "cato".to_string(),
            events: vec![event("a", "true")],
            side_events: Vec::new(),
        }];
        assert!(compile_catalog(unknown, &roster()).is_err());

        let duplicate = vec![ArcRaw {
            senator: "sulla".to_string(),
            events: vec![event("a", "true")],
            side_events: vec![event("a", "true")],
        }];
        let err = compile_catalog(duplicate, &roster()).expect_err("duplicate");
        assert!(err.to_string().contains("defined twice"));

        let mut backwards = event("b", "true");
        backwards.choices[0].advance_to = Some("a".to_string());
        let arcs = vec![ArcRaw {
            senator: "sulla".to_string(),
            events: vec![event("a", "true"), backwards],
            side_events: Vec::new(),
        }];
        assert!(compile_catalog(arcs, &roster()).is_err());

        let mut no_choices = event("a", "true");
        no_choices.choices.clear();
        let arcs = vec![ArcRaw {
            senator: "sulla".to_string(),
            events: vec![no_choices],
            side_events: Vec::new(),
        }];
        assert!(compile_catalog(arcs, &roster()).is_err());
    }
}
