mod compiler;
mod condition;
mod engine;
mod evaluator;
mod formatter;
mod status;

pub use compiler::{ArcRaw, ChanceGate, ChoiceRaw, SenateEventRaw};
pub use engine::{ChoicePreview, ChoiceView, DisabledEvent, PresentedEvent};
pub use evaluator::{Outcome, Resolution};
pub use status::{EventStatus, Transition};

pub(crate) use compiler::compile_catalog;
pub(crate) use engine::SenateEngine;
