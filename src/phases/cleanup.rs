//! `cleanup` — tears down the job's VM and its credentials Secret.
//!
//! `Secret.Delete` happens-before `VM.Delete`. If
//! `Secret.Delete` fails, `VM.Delete` is still attempted — the VM's
//! deletion is what removes the live workload. The closing watch
//! abandons on the first `Error` event rather than looping, because the
//! VM may have already vanished and looping would block forever.

use anyhow::{Context, Result};
use futures::StreamExt;
use kube::api::{Api, DeleteParams, WatchParams};
use kube::Client;

use crate::cli::CleanupArgs;
use crate::duration::parse_duration;
use crate::error::{is_not_found, ExecutorError};
use crate::k8s::find_job_vm;
use crate::secrets::SecretStore;
use crate::skip_if::{parse_list, should_skip};
use crate::vm::{RunConfig, VirtualMachineInstance};
use crate::watcher::{id_selector, watch, EventKind, OnEventOutcome};

pub async fn run(client: Client, namespace: &str, job_id: &str, args: &CleanupArgs) -> Result<()> {
    let Some(vm) = find_job_vm(client.clone(), namespace, job_id).await? else {
        eprintln!("VM for job id {job_id} not found, treating as already cleaned up");
        return Ok(());
    };

    let phase = vm.status.as_ref().map(|s| s.phase.as_str()).unwrap_or("");
    let skip_entries = parse_list(&args.skip_if);
    if should_skip(&skip_entries, phase) {
        eprintln!("skip-if matched VM phase {phase:?}, leaving VM in place");
        return Ok(());
    }

    let secret_ref = vm
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(crate::constants::RUN_CONFIG_ANNOTATION_KEY))
        .and_then(|json| serde_json::from_str::<RunConfig>(json).ok())
        .map(|rc| rc.ssh.secret_ref);

    if let Some(secret_name) = secret_ref {
        let secrets = SecretStore::new(client.clone(), namespace);
        if let Err(e) = secrets.delete(&secret_name).await {
            eprintln!("warning: failed to delete credentials Secret {secret_name}: {e}");
        }
    }

    let vm_api: Api<VirtualMachineInstance> = Api::namespaced(client.clone(), namespace);
    let vm_name = vm.metadata.name.context("VM is missing a name")?;

    match vm_api.delete(&vm_name, &DeleteParams::default()).await {
        Ok(_) => {}
        Err(e) if is_not_found(&e) => return Ok(()),
        Err(e) => return Err(ExecutorError::Cluster(anyhow::Error::new(e).context("deleting VM")).into()),
    }

    let timeout = parse_duration(&args.timeout)?;
    let selector = id_selector(job_id);
    let wait = watch(
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
                // Error event: abandon rather than loop, the VM may
                // already be gone.
                None => Ok(OnEventOutcome::Done),
                Some((EventKind::Deleted, _)) => Ok(OnEventOutcome::Done),
                Some(_) => Ok(OnEventOutcome::Continue),
            }
        },
    );

    let _ = tokio::time::timeout(timeout, wait).await;
    Ok(())
}
