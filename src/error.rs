//! # Error taxonomy
//!
//! Components return `anyhow` errors with context; each lifecycle phase
//! classifies its outcome into one of these variants before returning to
//! `main`, which maps the variant to a process exit code.

use thiserror::Error;

use crate::constants::{DEFAULT_BUILD_FAILURE_EXIT_CODE, DEFAULT_SYSTEM_FAILURE_EXIT_CODE};

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Missing image, unparseable resource quantity, unsupported shell:
    /// fatal before any side effect.
    #[error("configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Create/Delete failures that are not `AlreadyExists`/`NotFound`.
    #[error("cluster error: {0}")]
    Cluster(anyhow::Error),

    /// More than one VM matches the `id` label in the configured namespace.
    #[error("ambiguous job id {id}: {count} matching VMs found")]
    Ambiguous { id: String, count: usize },

    /// Non-zero remote shell exit during `run`.
    #[error("build failed with remote exit code {0}")]
    BuildFailure(i32),
}

impl ExecutorError {
    /// Exit code this error should terminate the process with, honoring
    /// the `BUILD_FAILURE_EXIT_CODE` / `SYSTEM_FAILURE_EXIT_CODE`
    /// environment overrides.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecutorError::BuildFailure(_) => env_override(
                "BUILD_FAILURE_EXIT_CODE",
                DEFAULT_BUILD_FAILURE_EXIT_CODE,
            ),
            ExecutorError::Config(_) | ExecutorError::Cluster(_) | ExecutorError::Ambiguous { .. } => {
                env_override("SYSTEM_FAILURE_EXIT_CODE", DEFAULT_SYSTEM_FAILURE_EXIT_CODE)
            }
        }
    }
}

fn env_override(var: &str, default: i32) -> i32 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<i32>().ok())
        .unwrap_or(default)
}

/// True if a `kube::Error` represents an HTTP 404 from the API server.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/// True if a `kube::Error` represents an HTTP 409 "already exists" from
/// the API server.
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_failure_exit_code_defaults_to_one() {
        std::env::remove_var("BUILD_FAILURE_EXIT_CODE");
        assert_eq!(ExecutorError::BuildFailure(5).exit_code(), 1);
    }

    #[test]
    fn system_failure_exit_code_defaults_to_two() {
        std::env::remove_var("SYSTEM_FAILURE_EXIT_CODE");
        let err = ExecutorError::Ambiguous {
            id: "deadbeef".into(),
            count: 2,
        };
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn exit_code_overrides_from_env() {
        std::env::set_var("BUILD_FAILURE_EXIT_CODE", "42");
        assert_eq!(ExecutorError::BuildFailure(1).exit_code(), 42);
        std::env::remove_var("BUILD_FAILURE_EXIT_CODE");
    }
}
