//! Concurrent availability checks with persisted up/down state.
//!
//! A run locks the record store, probes every target at once, reconciles each
//! verdict against the stored state and, for targets that changed state,
//! sends a notification and runs the operator's trigger command.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod lock;
pub mod notify;
pub mod probe;
pub mod record;
pub mod store;
pub mod trigger;
pub mod worker;

pub use engine::{CheckEngine, RunOptions, RunReport};
pub use error::{Error, LockError};
pub use record::{Outcome, ProbeOutcome, ProbeResult, Reconciled, State, TargetRecord};
pub use store::RecordStore;
