//! Background workers.

pub mod maturity_sweep;

pub use maturity_sweep::{MaturitySweep, MaturitySweepWorker, SweepError, SweepReport};
