//! Logging, scheduling and sync cycle for AtmoWEB incubators.
//!
//! Every invocation of the `atmolog` binary runs one [`Cycle`]:
//!
//! 1. sample the device into a [`Reading`](atmolog_types::Reading)
//! 2. append it to the rolling history and evict what aged out
//! 3. apply schedule entries that are due, recording each in the ledger
//! 4. publish history and ledger to the git remote
//!
//! A failing stage is logged and reported; later stages still run when they
//! can. Device and remote failures are retried on the next invocation and
//! never change the exit code.
//!
//! # Configuration
//!
//! The service reads `~/.config/atmolog/atmolog.toml`:
//!
//! ```toml
//! [device]
//! address = "192.168.100.100"
//! timeout_secs = 5
//!
//! [history]
//! path = "data/log/incubator_history.json"
//! max_age_hours = 3.0
//!
//! [schedule]
//! path = "data/schedules/setpoint_schedule.json"
//! tolerance_secs = 60
//!
//! [sync]
//! repo_path = "/home/pi/lab-data"
//! remote = "origin"
//! branch = "main"
//! ssh_key = "/home/pi/.ssh/lab_deploy"
//! ```

pub mod config;
pub mod orchestrator;
pub mod runner;
pub mod status;

pub use config::{
    Config, ConfigError, DeviceConfig, HistoryConfig, LockConfig, ScheduleConfig, SyncSection,
    ValidationError, default_config_path,
};
pub use orchestrator::{Cycle, CycleReport, RunOptions, Stage, StageOutcome, Task};
pub use runner::run_every;
pub use status::StatusReport;
