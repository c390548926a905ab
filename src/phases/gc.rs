//! `gc` — stateless fleet sweep for expired VMs.
//!
//! Per-VM order is `Secret.Delete` then `VM.Delete`; iteration order
//! across VMs is unspecified. GC never touches VMs without the id label
//! and never deletes orphan Secrets whose VM is already gone — those are
//! covered by the VM's own cleanup path, not GC.

use chrono::{DateTime, Utc};
use kube::api::{Api, DeleteParams, ListParams};
use kube::Client;

use crate::cli::GcArgs;
use crate::constants::LABEL_PREFIX;
use crate::duration::parse_duration;
use crate::secrets::SecretStore;
use crate::vm::{RunConfig, VirtualMachineInstance};

/// Typed outcome of a GC sweep, so `gc::run` is unit-testable without
/// capturing stdout/stderr.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcReport {
    pub deleted: usize,
    pub skipped: usize,
    pub errored: usize,
}

pub async fn run(client: Client, namespace: &str, args: &GcArgs) -> anyhow::Result<GcReport> {
    let vm_api: Api<VirtualMachineInstance> = Api::namespaced(client.clone(), namespace);
    let lp = ListParams::default().labels(&format!("{LABEL_PREFIX}/id"));
    let list = vm_api.list(&lp).await?;

    let fallback_max_age = parse_duration(&args.max_age)?;
    let now = Utc::now();
    let mut report = GcReport::default();

    for vm in list.items {
        let Some(labels) = vm.metadata.labels.as_ref() else {
            report.skipped += 1;
            continue;
        };

        let Some(created_at_raw) = labels.get(&format!("{LABEL_PREFIX}/created-at")) else {
            eprintln!("skipping VM with missing created-at label");
            report.skipped += 1;
            continue;
        };

        let Ok(created_at) = DateTime::parse_from_rfc3339(created_at_raw) else {
            eprintln!("skipping VM with unparseable created-at label {created_at_raw:?}");
            report.skipped += 1;
            continue;
        };
        let created_at: DateTime<Utc> = created_at.with_timezone(&Utc);

        let ttl = labels
            .get(&format!("{LABEL_PREFIX}/ttl"))
            .and_then(|raw| parse_duration(raw).ok())
            .unwrap_or(fallback_max_age);

        let age = now.signed_duration_since(created_at);
        let ttl_chrono = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());

        if age <= ttl_chrono {
            let remaining = ttl_chrono - age;
            eprintln!(
                "VM {} still valid, {}s remaining",
                vm.metadata.name.as_deref().unwrap_or("<unnamed>"),
                remaining.num_seconds()
            );
            report.skipped += 1;
            continue;
        }

        let name = vm.metadata.name.clone().unwrap_or_default();

        if args.dry_run {
            eprintln!("would delete VM {name} (age {}s exceeds ttl)", age.num_seconds());
            report.deleted += 1;
            continue;
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

        match vm_api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => report.deleted += 1,
            Err(e) => {
                eprintln!("warning: failed to delete VM {name}: {e}");
                report.errored += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Expiry arithmetic alone, independent of the cluster calls above.
    // created_at = now - 4h, no ttl label -> selected when
    // max-age=3h, ignored when max-age=5h.
    #[test]
    fn expiry_arithmetic() {
        let now = Utc::now();
        let created_at = now - chrono::Duration::hours(4);
        let age = now.signed_duration_since(created_at);

        let max_age_3h = chrono::Duration::from_std(parse_duration("3h").unwrap()).unwrap();
        let max_age_5h = chrono::Duration::from_std(parse_duration("5h").unwrap()).unwrap();

        assert!(age > max_age_3h);
        assert!(age <= max_age_5h);
    }
}
