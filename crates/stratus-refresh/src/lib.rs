//! Background refresh scheduling for Stratus
//!
//! Learns when the app tends to be opened and keeps a single background
//! refresh job pending for shortly before the next likely use.

pub mod job;
pub mod planner;
pub mod scheduler;
pub mod settings;
pub mod usage;

pub use job::{
    JobContext, JobHandle, JobHandler, JobOutcome, JobRequest, JobScheduler, TokioJobScheduler,
    REFRESH_JOB_ID,
};
pub use planner::{HourlyConfidence, PlannerConfig, RefreshPlan, RefreshPlanner, RefreshWindow};
pub use scheduler::{RefreshScheduler, SchedulerState};
pub use settings::{RefreshSettings, SettingsStore};
pub use usage::{UsagePattern, UsageStore};
