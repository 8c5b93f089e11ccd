//! Process enforcement: periodic sampling, decisions and termination.

mod enforcer;

pub use enforcer::{EnforcerState, ProcessEnforcer};
