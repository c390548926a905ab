//! # VMFactory
//!
//! Composes the KubeVirt `VirtualMachineInstance` object: resource
//! requests/limits, machine type, optional CPU model, a
//! container-disk root volume, a cloud-init NoCloud volume referencing
//! the credentials Secret, labels carrying `id`/`created-at`/`ttl`, and
//! annotations carrying the `RunConfig` JSON plus provenance.
//!
//! Type shapes are modeled the way KubeVirt's own `VirtualMachine`/`VMI`
//! CRDs are typically mirrored in Rust clients: `Default` + `Serialize` +
//! `Deserialize` + `JsonSchema`, with `skip_serializing_if` on every
//! optional field so unset values never reach the API server.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_TIMEZONE, JOB_ANNOTATION_BEFORE_SHA_KEY, JOB_ANNOTATION_ID_KEY,
    JOB_ANNOTATION_NAME_KEY, JOB_ANNOTATION_REF_KEY, JOB_ANNOTATION_SHA_KEY,
    JOB_ANNOTATION_URL_KEY, LABEL_PREFIX, PROJECT_ANNOTATION_KEY, RUN_CONFIG_ANNOTATION_KEY,
};
use crate::env::JobContext;
use crate::error::ExecutorError;

/// `kubevirt.io/v1` `VirtualMachineInstance`, the cluster-side object
/// representing a live guest.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachineInstance",
    plural = "virtualmachineinstances",
    namespaced,
    status = "VirtualMachineInstanceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceSpec {
    pub domain: DomainSpec,
    pub volumes: Vec<Volume>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    pub resources: ResourcesSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine: Option<MachineSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuSpec>,
    pub clock: ClockSpec,
    pub devices: DevicesSpec,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    #[serde(rename = "type")]
    pub machine_type: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CpuSpec {
    pub model: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClockSpec {
    pub timezone: String,
    pub timer: TimerSpec,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimerSpec {
    pub hyperv: HypervTimer,
    pub rtc: RtcTimer,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct HypervTimer {}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RtcTimer {
    pub tick_policy: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DevicesSpec {
    pub disks: Vec<Disk>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub name: String,
    pub disk: DiskTarget,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskTarget {
    pub bus: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_disk: Option<ContainerDiskSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_init_no_cloud: Option<CloudInitNoCloud>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDiskSource {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudInitNoCloud {
    pub user_data_secret_ref: SecretRef,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceStatus {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub interfaces: Vec<InterfaceStatus>,
    #[serde(default)]
    pub conditions: Vec<VmCondition>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceStatus {
    #[serde(default)]
    pub ip_address: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
}

impl VirtualMachineInstanceStatus {
    /// True once `interfaces[0].ip` is non-empty and a `Ready=True`
    /// condition is present.
    pub fn is_ready(&self) -> bool {
        let has_ip = self
            .interfaces
            .first()
            .is_some_and(|i| !i.ip_address.is_empty());
        let ready = self
            .conditions
            .iter()
            .any(|c| c.condition_type == "Ready" && c.status == "True");
        has_ip && ready
    }

    pub fn primary_ip(&self) -> Option<&str> {
        self.interfaces
            .first()
            .map(|i| i.ip_address.as_str())
            .filter(|ip| !ip.is_empty())
    }
}

/// JSON serialized into the `RunConfigKey` annotation at provisioning.
/// `ssh.password` is never persisted here; it is always reachable via
/// `secretRef`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    pub shell: String,
    pub ssh: SshRunConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SshRunConfig {
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub secret_ref: String,
}

/// Composes the `VirtualMachineInstance` object from job context,
/// run config, and the name of the credentials Secret to reference.
pub fn create_vm(ctx: &JobContext, run_config: &RunConfig, secret_name: &str) -> Result<VirtualMachineInstance> {
    if ctx.image.is_empty() {
        return Err(ExecutorError::Config(anyhow!("image must not be empty")).into());
    }

    let resources = parse_resources(ctx)?;

    let machine = non_empty(&ctx.machine_type).map(|t| MachineSpec { machine_type: t.to_string() });
    let cpu = non_empty(&ctx.architecture).map(|_| CpuSpec {
        model: "host-passthrough".to_string(),
    });

    let timezone = if ctx.timezone.is_empty() {
        DEFAULT_TIMEZONE.to_string()
    } else {
        ctx.timezone.clone()
    };

    let run_config_json =
        serde_json::to_string(run_config).context("marshaling RunConfig to JSON")?;

    let mut labels = BTreeMap::new();
    labels.insert(format!("{LABEL_PREFIX}/id"), ctx.id.clone());
    labels.insert(format!("{LABEL_PREFIX}/created-at"), ctx.created_at.clone());
    labels.insert(format!("{LABEL_PREFIX}/ttl"), ctx.ttl.clone());

    let mut annotations = BTreeMap::new();
    annotations.insert(RUN_CONFIG_ANNOTATION_KEY.to_string(), run_config_json);
    annotations.insert(PROJECT_ANNOTATION_KEY.to_string(), ctx.project_id.clone());
    annotations.insert(JOB_ANNOTATION_ID_KEY.to_string(), ctx.gitlab_job_id.clone());
    annotations.insert(JOB_ANNOTATION_NAME_KEY.to_string(), ctx.job_name.clone());
    annotations.insert(JOB_ANNOTATION_REF_KEY.to_string(), ctx.job_ref.clone());
    annotations.insert(JOB_ANNOTATION_SHA_KEY.to_string(), ctx.job_sha.clone());
    annotations.insert(
        JOB_ANNOTATION_BEFORE_SHA_KEY.to_string(),
        ctx.job_before_sha.clone(),
    );
    annotations.insert(JOB_ANNOTATION_URL_KEY.to_string(), ctx.job_url.clone());

    let spec = VirtualMachineInstanceSpec {
        domain: DomainSpec {
            resources,
            machine,
            cpu,
            clock: ClockSpec {
                timezone,
                timer: TimerSpec {
                    hyperv: HypervTimer {},
                    rtc: RtcTimer {
                        tick_policy: "catchup".to_string(),
                    },
                },
            },
            devices: DevicesSpec {
                disks: vec![
                    Disk {
                        name: "root".to_string(),
                        disk: DiskTarget {
                            bus: "virtio".to_string(),
                        },
                    },
                    Disk {
                        name: "cloudinit".to_string(),
                        disk: DiskTarget {
                            bus: "virtio".to_string(),
                        },
                    },
                ],
            },
        },
        volumes: vec![
            Volume {
                name: "root".to_string(),
                container_disk: Some(ContainerDiskSource {
                    image: ctx.image.clone(),
                    image_pull_policy: non_empty(&ctx.image_pull_policy).map(str::to_string),
                    image_pull_secret: non_empty(&ctx.image_pull_secret).map(str::to_string),
                }),
                cloud_init_no_cloud: None,
            },
            Volume {
                name: "cloudinit".to_string(),
                container_disk: None,
                cloud_init_no_cloud: Some(CloudInitNoCloud {
                    user_data_secret_ref: SecretRef {
                        name: secret_name.to_string(),
                    },
                }),
            },
        ],
    };

    let mut vmi = VirtualMachineInstance::new(&ctx.base_name, spec);
    vmi.metadata = ObjectMeta {
        generate_name: Some(ctx.base_name.clone()),
        namespace: Some(ctx.namespace.clone()),
        labels: Some(labels),
        annotations: Some(annotations),
        ..Default::default()
    };
    Ok(vmi)
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Parses resource quantities; empty strings are omitted, not treated as
/// zero. Parse failure (i.e. a non-empty value k8s would reject) is
/// fatal before any I/O; here we only validate it is non-whitespace.
fn parse_resources(ctx: &JobContext) -> Result<ResourcesSpec> {
    let mut requests = BTreeMap::new();
    let mut limits = BTreeMap::new();

    insert_quantity(&mut requests, "cpu", &ctx.cpu_request)?;
    insert_quantity(&mut limits, "cpu", &ctx.cpu_limit)?;
    insert_quantity(&mut requests, "memory", &ctx.memory_request)?;
    insert_quantity(&mut limits, "memory", &ctx.memory_limit)?;
    insert_quantity(
        &mut requests,
        "ephemeral-storage",
        &ctx.ephemeral_storage_request,
    )?;
    insert_quantity(
        &mut limits,
        "ephemeral-storage",
        &ctx.ephemeral_storage_limit,
    )?;

    Ok(ResourcesSpec {
        requests: if requests.is_empty() { None } else { Some(requests) },
        limits: if limits.is_empty() { None } else { Some(limits) },
    })
}

fn insert_quantity(map: &mut BTreeMap<String, String>, key: &str, raw: &str) -> Result<()> {
    if raw.is_empty() {
        return Ok(());
    }
    if raw.trim().is_empty() {
        return Err(ExecutorError::Config(anyhow!("invalid resource quantity for {key}: {raw:?}")).into());
    }
    map.insert(key.to_string(), raw.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_ctx() -> JobContext {
        JobContext {
            id: "a".repeat(40),
            base_name: "runner-r1-project-p7-concurrent-0".to_string(),
            namespace: "gitlab-runner".to_string(),
            image: "registry/runner:1".to_string(),
            created_at: "2026-08-01T00:00:00Z".to_string(),
            ttl: "3h".to_string(),
            ..Default::default()
        }
    }

    fn base_run_config() -> RunConfig {
        RunConfig {
            shell: "bash".to_string(),
            ssh: SshRunConfig {
                user: "runner".to_string(),
                password: String::new(),
                secret_ref: "vm-creds-abc".to_string(),
            },
        }
    }

    #[test]
    fn empty_image_is_fatal() {
        let mut ctx = base_ctx();
        ctx.image.clear();
        let err = create_vm(&ctx, &base_run_config(), "vm-creds-abc").unwrap_err();
        assert!(err.to_string().contains("image"));
    }

    #[test]
    fn omits_unset_resource_quantities() {
        let ctx = base_ctx();
        let vmi = create_vm(&ctx, &base_run_config(), "vm-creds-abc").unwrap();
        assert!(vmi.spec.domain.resources.requests.is_none());
        assert!(vmi.spec.domain.resources.limits.is_none());
    }

    #[test]
    fn sets_cpu_model_only_when_architecture_present() {
        let mut ctx = base_ctx();
        ctx.architecture = "arm64".to_string();
        let vmi = create_vm(&ctx, &base_run_config(), "vm-creds-abc").unwrap();
        assert_eq!(vmi.spec.domain.cpu.unwrap().model, "host-passthrough");

        let ctx_no_arch = base_ctx();
        let vmi = create_vm(&ctx_no_arch, &base_run_config(), "vm-creds-abc").unwrap();
        assert!(vmi.spec.domain.cpu.is_none());
    }

    #[test]
    fn cloud_init_never_inlines_userdata() {
        let ctx = base_ctx();
        let vmi = create_vm(&ctx, &base_run_config(), "vm-creds-abc").unwrap();
        let serialized = serde_json::to_string(&vmi.spec.volumes).unwrap();
        assert!(serialized.contains("vm-creds-abc"));
        assert!(!serialized.contains("userdata"));
    }

    #[test]
    fn status_ready_requires_ip_and_condition() {
        let mut status = VirtualMachineInstanceStatus::default();
        assert!(!status.is_ready());
        status.interfaces.push(InterfaceStatus {
            ip_address: "10.0.0.5".to_string(),
        });
        assert!(!status.is_ready());
        status.conditions.push(VmCondition {
            condition_type: "Ready".to_string(),
            status: "True".to_string(),
        });
        assert!(status.is_ready());
    }
}
