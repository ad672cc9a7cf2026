//! Device access and schedule execution for atmolog.
//!
//! This crate talks to Memmert incubators through their AtmoWEB HTTP
//! interface and decides which scheduled setpoint changes to apply.
//!
//! # Features
//!
//! - **Device abstraction**: [`DeviceInterface`] over named channels, each of
//!   which may be independently unavailable
//! - **AtmoWEB adapter**: [`AtmoWebClient`] with a parser that tolerates the
//!   controller's malformed JSON
//! - **Sampling**: [`sample_reading`] turns one poll into a
//!   [`Reading`](atmolog_types::Reading), never failing the cycle
//! - **Scheduling**: [`ScheduleMatcher`] applies due entries at most once,
//!   validating each channel against the device's declared range
//! - **Testing**: [`MockDevice`] with failure injection
//!
//! # Quick Start
//!
//! ```no_run
//! use std::collections::BTreeSet;
//! use std::time::Duration;
//!
//! use atmolog_core::{AtmoWebClient, SampleChannels, ScheduleMatcher, sample_reading};
//! use time::OffsetDateTime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let device = AtmoWebClient::new("192.168.100.100", 80, Duration::from_secs(5))?;
//!     let now = OffsetDateTime::now_utc();
//!
//!     let reading = sample_reading(&device, &SampleChannels::default(), now).await;
//!     println!("mode: {}", reading.mode);
//!
//!     let mut executed = BTreeSet::new();
//!     let report = ScheduleMatcher::default().run(&device, &[], &mut executed, now).await?;
//!     println!("{} entries applied", report.executed.len());
//!     Ok(())
//! }
//! ```

pub mod atmoweb;
pub mod error;
pub mod mock;
pub mod parser;
pub mod retry;
pub mod sampling;
pub mod schedule;
pub mod traits;

pub use atmoweb::AtmoWebClient;
pub use error::{Error, Result};
pub use mock::MockDevice;
pub use retry::{RetryConfig, with_retry};
pub use sampling::{SampleChannels, sample_reading};
pub use schedule::{
    DEFAULT_TOLERANCE, EntryExecution, EntryState, ExecutionLog, MatchReport, ScheduleMatcher,
    ScheduleSummary,
};
pub use traits::DeviceInterface;

// Re-export the data model so dependents need only one import path.
pub use atmolog_types;
