pub mod config;
pub mod dedup;
pub mod error;
pub mod events;
pub mod format;
pub mod module;
pub mod modules;
pub mod queues;
pub mod report;
pub mod routes;
pub mod scan;
pub mod scope;
pub mod workers;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(test)]
mod scenario_tests;

pub use config::ScanConfig;
pub use dedup::{EventRecord, EventState};
pub use error::{EngineError, Result};
pub use events::{EmitRequest, Event, event_type};
pub use format::{format_duration, format_failure_summary};
pub use module::{FilterVerdict, Module, ModuleContext};
pub use report::{ScanOutcome, ScanRecord, ScanReport, ScanStatus};
pub use scan::Scan;
pub use scope::{ScopeCalculator, ScopeVerdict, Target};
