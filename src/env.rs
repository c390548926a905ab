//! # Environment ingestion
//!
//! Assembles the per-invocation `JobContext` from `CUSTOM_ENV_*` variables
//! propagated by the host runner. This module only reads environment;
//! merging CLI-flag defaults happens in `phases::prepare`.

use std::collections::HashMap;
use std::env;

/// The per-invocation bundle assembled from environment variables.
#[derive(Debug, Clone, Default)]
pub struct JobContext {
    pub id: String,
    pub base_name: String,
    pub namespace: String,
    pub image: String,
    pub image_pull_policy: String,
    pub image_pull_secret: String,
    pub machine_type: String,
    pub architecture: String,
    pub timezone: String,
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,
    pub ephemeral_storage_request: String,
    pub ephemeral_storage_limit: String,
    pub runner_id: String,
    pub project_id: String,
    pub concurrent_id: String,
    pub gitlab_job_id: String,
    pub job_name: String,
    pub job_ref: String,
    pub job_sha: String,
    pub job_before_sha: String,
    pub job_url: String,
    pub created_at: String,
    pub ttl: String,
}

/// Reads every `CUSTOM_ENV_*` variable into a flat map, for components
/// that only care about presence/raw values (e.g. forwarding to the
/// guest is explicitly out of scope, but tests exercise this ingestion
/// path independently of the full `JobContext`).
pub fn custom_env_vars() -> HashMap<String, String> {
    env::vars()
        .filter(|(k, _)| k.starts_with("CUSTOM_ENV_"))
        .collect()
}

fn get(vars: &HashMap<String, String>, key: &str) -> String {
    vars.get(key).cloned().unwrap_or_default()
}

impl JobContext {
    /// Builds the identity and job-provenance fields of a `JobContext`
    /// from the host runner's environment. Resource/image/timezone
    /// defaults are merged in separately by `prepare` since only that
    /// phase knows the CLI-flag defaults.
    ///
    /// `timestamp_ns` is a parameter of `identity::job_id`, but every
    /// call site in this crate passes `0`: the id must be derivable
    /// identically by `prepare`, `run`, `cleanup` and `gc`, which are
    /// separate process invocations with no shared memory, so it is
    /// pinned to the stable runner/project/concurrent/job identifiers
    /// alone (see DESIGN.md).
    pub fn from_env(timestamp_ns: i64) -> Self {
        let vars = custom_env_vars();

        let runner_id = get(&vars, "CUSTOM_ENV_CI_RUNNER_ID");
        let project_id = get(&vars, "CUSTOM_ENV_CI_PROJECT_ID");
        let concurrent_id = get(&vars, "CUSTOM_ENV_CI_CONCURRENT_PROJECT_ID");
        let gitlab_job_id = get(&vars, "CUSTOM_ENV_CI_JOB_ID");

        let id = crate::identity::job_id(
            &runner_id,
            &project_id,
            &concurrent_id,
            &gitlab_job_id,
            timestamp_ns,
        );
        let base_name = crate::identity::base_name(&runner_id, &project_id, &concurrent_id);

        JobContext {
            id,
            base_name,
            image: get(&vars, "CUSTOM_ENV_CI_JOB_IMAGE"),
            machine_type: get(&vars, "CUSTOM_ENV_VM_MACHINE_TYPE"),
            architecture: get(&vars, "CUSTOM_ENV_VM_ARCHITECTURE"),
            ttl: get(&vars, "CUSTOM_ENV_VM_TTL"),
            cpu_request: get(&vars, "CUSTOM_ENV_VM_CPU_REQUEST"),
            cpu_limit: get(&vars, "CUSTOM_ENV_VM_CPU_LIMIT"),
            memory_request: get(&vars, "CUSTOM_ENV_VM_MEMORY_REQUEST"),
            memory_limit: get(&vars, "CUSTOM_ENV_VM_MEMORY_LIMIT"),
            ephemeral_storage_request: get(&vars, "CUSTOM_ENV_VM_STORAGE_REQUEST"),
            ephemeral_storage_limit: get(&vars, "CUSTOM_ENV_VM_STORAGE_LIMIT"),
            timezone: get(&vars, "CUSTOM_ENV_VM_TIMEZONE"),
            job_name: get(&vars, "CUSTOM_ENV_CI_JOB_NAME"),
            job_ref: get(&vars, "CUSTOM_ENV_CI_COMMIT_REF_NAME"),
            job_sha: get(&vars, "CUSTOM_ENV_CI_COMMIT_SHA"),
            job_before_sha: get(&vars, "CUSTOM_ENV_CI_COMMIT_BEFORE_SHA"),
            job_url: get(&vars, "CUSTOM_ENV_CI_JOB_URL"),
            runner_id,
            project_id,
            concurrent_id,
            gitlab_job_id,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_derives_id_and_base_name() {
        std::env::set_var("CUSTOM_ENV_CI_RUNNER_ID", "r1");
        std::env::set_var("CUSTOM_ENV_CI_PROJECT_ID", "p7");
        std::env::set_var("CUSTOM_ENV_CI_CONCURRENT_PROJECT_ID", "0");
        std::env::set_var("CUSTOM_ENV_CI_JOB_ID", "42");
        std::env::set_var("CUSTOM_ENV_CI_JOB_IMAGE", "registry/runner:1");

        let ctx = JobContext::from_env(1_700_000_000_000_000_000);
        assert_eq!(ctx.base_name, "runner-r1-project-p7-concurrent-0");
        assert_eq!(ctx.image, "registry/runner:1");
        assert_eq!(ctx.id.len(), 40);

        std::env::remove_var("CUSTOM_ENV_CI_RUNNER_ID");
        std::env::remove_var("CUSTOM_ENV_CI_PROJECT_ID");
        std::env::remove_var("CUSTOM_ENV_CI_CONCURRENT_PROJECT_ID");
        std::env::remove_var("CUSTOM_ENV_CI_JOB_ID");
        std::env::remove_var("CUSTOM_ENV_CI_JOB_IMAGE");
    }
}
