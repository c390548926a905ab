//! `prepare` — provisions credentials and a VM for this job, then proves
//! the VM is reachable.
//!
//! `Secret.Create` happens-before `VM.Create`.
//! `VM.Create` failure triggers `Secret.Delete` before returning; a
//! failure in that rollback delete is swallowed because GC will reap the
//! orphaned Secret by label eventually.

use anyhow::{Context, Result};
use futures::StreamExt;
use kube::api::{Api, PostParams, WatchParams};
use kube::Client;

use crate::cli::PrepareArgs;
use crate::credentials::{generate_password, generate_user_data, Shell};
use crate::duration::parse_duration;
use crate::env::JobContext;
use crate::error::ExecutorError;
use crate::secrets::SecretStore;
use crate::ssh::dial;
use crate::vm::{create_vm, RunConfig, SshRunConfig, VirtualMachineInstance};
use crate::watcher::{id_selector, watch, OnEventOutcome};

fn merge_defaults(mut ctx: JobContext, args: &PrepareArgs, namespace: &str, created_at: String) -> JobContext {
    ctx.namespace = namespace.to_string();
    ctx.created_at = created_at;
    if ctx.ttl.is_empty() {
        ctx.ttl = args.vm_ttl.clone();
    }
    if ctx.image.is_empty() {
        ctx.image = args.default_image.clone();
    }
    ctx.image_pull_policy = args.default_image_pull_policy.clone();
    ctx.image_pull_secret = args.default_image_pull_secret.clone();
    if ctx.machine_type.is_empty() {
        ctx.machine_type = args.default_machine_type.clone();
    }
    if ctx.architecture.is_empty() {
        ctx.architecture = args.default_architecture.clone();
    }
    if ctx.cpu_request.is_empty() {
        ctx.cpu_request = args.default_cpu_request.clone();
    }
    if ctx.cpu_limit.is_empty() {
        ctx.cpu_limit = args.default_cpu_limit.clone();
    }
    if ctx.memory_request.is_empty() {
        ctx.memory_request = args.default_memory_request.clone();
    }
    if ctx.memory_limit.is_empty() {
        ctx.memory_limit = args.default_memory_limit.clone();
    }
    if ctx.ephemeral_storage_request.is_empty() {
        ctx.ephemeral_storage_request = args.default_ephemeral_storage_request.clone();
    }
    if ctx.ephemeral_storage_limit.is_empty() {
        ctx.ephemeral_storage_limit = args.default_ephemeral_storage_limit.clone();
    }
    if ctx.timezone.is_empty() {
        ctx.timezone = args.default_timezone.clone();
    }
    ctx
}

pub async fn run(client: Client, ctx: JobContext, args: &PrepareArgs, namespace: &str) -> Result<()> {
    let created_at = chrono::Utc::now().to_rfc3339();
    let ctx = merge_defaults(ctx, args, namespace, created_at);

    let shell = Shell::parse(&args.shell)?;
    let timeout = parse_duration(&args.timeout)?;
    let dial_timeout = parse_duration(&args.dial_timeout)?;

    let secrets = SecretStore::new(client.clone(), namespace);
    let password = generate_password(32)?;
    let userdata = generate_user_data(shell, &args.ssh_user, &password)?;

    let secret = secrets
        .create(&ctx.id, &args.ssh_user, &password, &userdata)
        .await?;
    let secret_name = secret
        .metadata
        .name
        .clone()
        .context("created Secret is missing a name")?;

    let run_config = RunConfig {
        shell: args.shell.clone(),
        ssh: SshRunConfig {
            user: args.ssh_user.clone(),
            password: String::new(),
            secret_ref: secret_name.clone(),
        },
    };

    let vmi = create_vm(&ctx, &run_config, &secret_name)?;
    let vm_api: Api<VirtualMachineInstance> = Api::namespaced(client.clone(), namespace);

    let created = match vm_api.create(&PostParams::default(), &vmi).await {
        Ok(vm) => vm,
        Err(e) => {
            // Rollback: the VM never existed, so only the Secret needs
            // cleanup. Swallow rollback failures; GC reaps by label.
            let _ = secrets.delete(&secret_name).await;
            return Err(ExecutorError::Cluster(anyhow::Error::new(e).context("creating VM")).into());
        }
    };

    let vm_name = created
        .metadata
        .name
        .clone()
        .context("created VM is missing a name")?;
    let job_id = ctx.id.clone();
    let ssh_user = args.ssh_user.clone();

    // Readiness watch, IP re-fetch and SSH dial all share the one overall
    // deadline: an unreachable guest must not hang `prepare` past `timeout`.
    tokio::time::timeout(timeout, async move {
        wait_ready(vm_api.clone(), &job_id).await?;

        let ip = vm_api
            .get(&vm_name)
            .await
            .context("re-fetching VM after readiness")?
            .status
            .and_then(|s| s.primary_ip().map(str::to_string))
            .context("VM reported ready but has no primary IP")?;

        tokio::task::spawn_blocking(move || {
            dial(&ip, 22, &ssh_user, password.as_str(), dial_timeout).map(|_session| ())
        })
        .await
        .context("SSH dial task panicked")?
    })
    .await
    .context("timed out waiting for VM readiness and SSH reachability")??;

    Ok(())
}

async fn wait_ready(vm_api: Api<VirtualMachineInstance>, job_id: &str) -> Result<()> {
    let selector = id_selector(job_id);
    watch(
        "",
        |resource_version| {
            let vm_api = vm_api.clone();
            let selector = selector.clone();
            async move {
                let wp = WatchParams::default().labels(&selector);
                vm_api
                    .watch(&wp, &resource_version)
                    .await
                    .map(|s| s.boxed())
                    .context("opening VM watch stream")
            }
        },
        |event| async move {
            match event {
                Some((_kind, ref vm)) if vm.status.as_ref().map(|s| s.is_ready()).unwrap_or(false) => {
                    Ok(OnEventOutcome::Done)
                }
                _ => Ok(OnEventOutcome::Continue),
            }
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> PrepareArgs {
        PrepareArgs {
            vm_ttl: "3h".to_string(),
            default_image: "registry/runner:1".to_string(),
            default_image_pull_policy: "IfNotPresent".to_string(),
            default_image_pull_secret: String::new(),
            default_machine_type: String::new(),
            default_architecture: String::new(),
            default_cpu_request: String::new(),
            default_cpu_limit: String::new(),
            default_memory_request: String::new(),
            default_memory_limit: String::new(),
            default_ephemeral_storage_request: String::new(),
            default_ephemeral_storage_limit: String::new(),
            default_timezone: "Etc/UTC".to_string(),
            timeout: "1h".to_string(),
            dial_timeout: "10s".to_string(),
            shell: "bash".to_string(),
            ssh_user: "runner".to_string(),
        }
    }

    #[test]
    fn merge_defaults_fills_blank_fields_only() {
        let mut ctx = JobContext::default();
        ctx.cpu_request = "500m".to_string();
        let args = base_args();
        let merged = merge_defaults(ctx, &args, "gitlab-runner", "2026-08-01T00:00:00Z".to_string());

        assert_eq!(merged.image, "registry/runner:1");
        assert_eq!(merged.cpu_request, "500m");
        assert_eq!(merged.ttl, "3h");
        assert_eq!(merged.namespace, "gitlab-runner");
    }
}
