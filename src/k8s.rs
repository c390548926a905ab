//! # Cluster client
//!
//! In-cluster config when available, otherwise a kubeconfig file (via
//! `KUBECONFIG` or `~/.kube/config`). Also hosts `find_job_vm`, the
//! canonical id-label lookup used by every phase after `prepare`.

use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use kube::{Client, Config};

use crate::error::ExecutorError;
use crate::vm::VirtualMachineInstance;
use crate::watcher::id_selector;

/// Builds a cluster client, preferring in-cluster config and falling
/// back to a kubeconfig file. Logs which path was taken so operators can
/// tell at a glance which cluster an invocation targeted.
pub async fn client() -> Result<Client> {
    match Config::incluster() {
        Ok(config) => {
            tracing::info!("using in-cluster Kubernetes config");
            Client::try_from(config).context("building in-cluster client")
        }
        Err(_) => {
            tracing::info!("no in-cluster config found, falling back to kubeconfig");
            let config = Config::infer()
                .await
                .context("inferring kubeconfig (KUBECONFIG or ~/.kube/config)")?;
            Client::try_from(config).context("building kubeconfig client")
        }
    }
}

/// Locates the single VM matching `<prefix>/id=<job_id>` in `namespace`.
/// Returns `Ok(None)` if no VM matches (cleanup treats this as "already
/// gone"); returns `ExecutorError::Ambiguous` if more than one matches.
pub async fn find_job_vm(
    client: Client,
    namespace: &str,
    job_id: &str,
) -> Result<Option<VirtualMachineInstance>> {
    let api: Api<VirtualMachineInstance> = Api::namespaced(client, namespace);
    let lp = ListParams::default().labels(&id_selector(job_id));
    let list = api.list(&lp).await.context("listing VMs by id label")?;

    match list.items.len() {
        0 => Ok(None),
        1 => Ok(list.items.into_iter().next()),
        count => Err(ExecutorError::Ambiguous {
            id: job_id.to_string(),
            count,
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matches_expected_label() {
        assert_eq!(id_selector("xyz"), "io.kubevirt.gitlab-runner/id=xyz");
    }
}
