//! Trellis Kernel
//!
//! Scenario-tree test harness with a two-phase design:
//! 1. **Build phase**: create scenarios, groups, test cases and references
//! 2. **Execution phase**: supervise the test case processes and fold their
//!    outcomes into group status
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use trellis_kernel::prelude::*;
//!
//! let mut harness = Harness::new();
//! let root = harness.create_scenario(Some("smoke"), true);
//! let login = harness.add_test_case(root, Some("login"), true)?;
//! harness.set_test_case_exec(login, "./login --fast")?;
//! harness.set_max_time_limit(login, Duration::from_secs(5))?;
//!
//! let report = harness.execute(root).await?;
//! assert!(report.passed());
//!
//! harness.delete_scenario(root)?;
//! ```

pub mod config;
pub mod deadline;
pub mod error;
pub mod executor;
pub mod gc;
pub mod handle;
pub mod identity;
pub mod process;
pub mod status;
pub mod types;

mod reference;
mod scenario;

pub use error::*;
pub use handle::Harness;
pub use types::*;

pub mod prelude {
    pub use crate::config::{load_document, EntryDocument, HarnessConfig, ScenarioDocument};
    pub use crate::deadline::{DeadlineCallback, DeadlineScheduler, DeadlineToken, TokioDeadlines};
    pub use crate::error::{ConfigError, DeadlineError, LaunchError, ScenarioError};
    pub use crate::executor::{RunReport, Supervisor, TestCaseReport};
    pub use crate::gc::TeardownReport;
    pub use crate::handle::Harness;
    pub use crate::identity::{NodeId, AUTO_ID_BASE};
    pub use crate::process::{ProcessExit, ProcessHandle, ProcessLauncher, TokioLauncher};
    pub use crate::status::Status;
    pub use crate::types::{NodeHandle, NodeRole, RunOutcome, ScenarioId, TERMINATED_EXIT_CODE};
    pub use std::time::Duration;
    pub use trellis_profile::{ProfileContext, ProfileLog};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
