//! Policy model and the pure parts of the decision engine: lifecycle
//! transitions, condition evaluation and deny-overrides combination.
//! Everything here is free of I/O; `storage` and `decision` wire it to the
//! database.

pub mod condition;
pub mod engine;
pub mod lifecycle;
pub mod types;
