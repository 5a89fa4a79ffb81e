mod reclaimer;

pub use reclaimer::{StaleConnectionReclaimer, SweepReport};
