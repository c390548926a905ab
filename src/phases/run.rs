//! `run` — locates the job's VM, dials SSH to its primary IP, streams
//! the job's shell script, and propagates the remote exit status as the
//! local exit status.
//!
//! SSH transport errors while streaming are *system failures* (exit 2
//! unless overridden); a non-zero remote exit is a *build failure*
//! (exit 1 unless overridden).

use anyhow::{bail, Context, Result};
use kube::Client;

use crate::cli::RunArgs;
use crate::error::ExecutorError;
use crate::k8s::find_job_vm;
use crate::secrets::SecretStore;
use crate::ssh::{dial, run_script};
use crate::vm::RunConfig;

use std::time::Duration;

pub async fn run(client: Client, namespace: &str, job_id: &str, args: &RunArgs) -> Result<()> {
    let vm = find_job_vm(client.clone(), namespace, job_id)
        .await?
        .ok_or_else(|| ExecutorError::Cluster(anyhow::anyhow!("no VM found for job id {job_id}")))?;

    let ip = vm
        .status
        .as_ref()
        .and_then(|s| s.primary_ip())
        .context("VM has no primary IP")?
        .to_string();

    let run_config_json = vm
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(crate::constants::RUN_CONFIG_ANNOTATION_KEY))
        .context("VM is missing its RunConfig annotation")?;
    let run_config: RunConfig =
        serde_json::from_str(run_config_json).context("parsing RunConfig annotation")?;

    let secrets = SecretStore::new(client, namespace);
    let creds = secrets.get(&run_config.ssh.secret_ref).await?;

    let script = std::fs::read_to_string(&args.script)
        .with_context(|| format!("reading job script at {}", args.script))?;

    let user = creds.user.clone();
    let password = creds.password.clone();
    let port = creds.port;
    let ip_for_dial = ip.clone();

    let exit_status = tokio::task::spawn_blocking(move || -> Result<i32> {
        let session = dial(&ip_for_dial, port, &user, &password, Duration::from_secs(10))
            .map_err(|e| anyhow::anyhow!("system failure dialing VM: {e}"))?;
        let result = run_script(&session, &script)
            .map_err(|e| anyhow::anyhow!("system failure streaming job script: {e}"))?;
        Ok(result.exit_status)
    })
    .await
    .context("SSH streaming task panicked")??;

    if exit_status != 0 {
        bail!(ExecutorError::BuildFailure(exit_status));
    }

    Ok(())
}
