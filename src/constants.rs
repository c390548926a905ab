//! # Constants
//!
//! Shared constants used throughout the executor.
//!
//! These values represent reasonable defaults and can be overridden via
//! CLI flags or `CUSTOM_ENV_*` variables where applicable.

/// Label/annotation prefix used for every object this executor writes.
pub const LABEL_PREFIX: &str = "io.kubevirt.gitlab-runner";

/// Annotation key holding the JSON-encoded `RunConfig`.
pub const RUN_CONFIG_ANNOTATION_KEY: &str = "io.kubevirt.gitlab-runner/run-config";

/// Annotation key prefix for provenance (project/job identity) data.
pub const PROJECT_ANNOTATION_KEY: &str = "project.runner.gitlab.com/id";
pub const JOB_ANNOTATION_ID_KEY: &str = "job.runner.gitlab.com/id";
pub const JOB_ANNOTATION_NAME_KEY: &str = "job.runner.gitlab.com/name";
pub const JOB_ANNOTATION_REF_KEY: &str = "job.runner.gitlab.com/ref";
pub const JOB_ANNOTATION_SHA_KEY: &str = "job.runner.gitlab.com/sha";
pub const JOB_ANNOTATION_BEFORE_SHA_KEY: &str = "job.runner.gitlab.com/before-sha";
pub const JOB_ANNOTATION_URL_KEY: &str = "job.runner.gitlab.com/url";

/// Default Kubernetes namespace for all objects this executor manages.
pub const DEFAULT_NAMESPACE: &str = "gitlab-runner";

/// Default VM time-to-live, used by `prepare` (label written at creation)
/// and by `gc` (fallback when the label is missing/unparseable).
pub const DEFAULT_VM_TTL: &str = "3h";

/// Default overall deadline for `prepare`'s watch + SSH-dial sequence, and
/// for `cleanup`'s watch-for-delete sequence.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60 * 60;

/// Default per-attempt SSH dial timeout.
pub const DEFAULT_DIAL_TIMEOUT_SECS: u64 = 10;

/// Default `gc --max-age` fallback when a VM's `created-at` label parses
/// but it carries no `ttl` label.
pub const DEFAULT_MAX_AGE: &str = "3h";

/// Default timezone applied to the VM clock device.
pub const DEFAULT_TIMEZONE: &str = "Etc/UTC";

/// Default SSH port for the executor's guest credential lookups.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default exit code for a build (job script) failure, overridable via
/// `BUILD_FAILURE_EXIT_CODE`.
pub const DEFAULT_BUILD_FAILURE_EXIT_CODE: i32 = 1;

/// Default exit code for a system (transport/cluster) failure, overridable
/// via `SYSTEM_FAILURE_EXIT_CODE`.
pub const DEFAULT_SYSTEM_FAILURE_EXIT_CODE: i32 = 2;
