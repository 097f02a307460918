//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function. Exit codes:
//!
//! | code | meaning |
//! |------|---------|
//! | 0    | every target done or skipped |
//! | 1    | at least one target failed, or an unexpected error |
//! | 2    | usage or configuration error |
//! | 3    | authorization failure |
//! | 130  | interrupted |

pub mod fetch;
pub mod reset;
pub mod status;

use crate::error::IngestError;
use crate::framework::stats::RunReport;

pub const EXIT_OK: i32 = 0;
pub const EXIT_TARGET_FAILED: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_AUTH: i32 = 3;
pub const EXIT_INTERRUPTED: i32 = 130;

/// Exit code for a finished run
pub fn exit_code(report: &RunReport) -> i32 {
    if report.auth_failure.is_some() {
        EXIT_AUTH
    } else if report.cancelled {
        EXIT_INTERRUPTED
    } else if report.has_failures() {
        EXIT_TARGET_FAILED
    } else {
        EXIT_OK
    }
}

/// Exit code for a command that failed before or outside a run
pub fn error_exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<IngestError>() {
        Some(IngestError::Config(_) | IngestError::Input(_)) => EXIT_USAGE,
        Some(IngestError::Auth(_)) => EXIT_AUTH,
        Some(IngestError::Cancelled) => EXIT_INTERRUPTED,
        _ => EXIT_TARGET_FAILED,
    }
}
