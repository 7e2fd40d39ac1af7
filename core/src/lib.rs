mod game;
mod time;

pub use game::*;
pub use time::{RoundCalendar, Season};
