//! # CLI surface
//!
//! Subcommands `config`, `prepare`, `run`, `cleanup`, `gc`: a global
//! `Cli` struct carrying options shared across subcommands plus one flag
//! struct per subcommand.

use clap::{Args, Parser, Subcommand};

use crate::constants::{DEFAULT_MAX_AGE, DEFAULT_NAMESPACE, DEFAULT_TIMEZONE, DEFAULT_VM_TTL};

#[derive(Parser, Debug)]
#[command(name = "kubevirt-executor", about = "KubeVirt-backed CI executor plugin")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Kubernetes namespace for all objects this invocation manages.
    #[arg(long, global = true, env = "KUBEVIRT_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Emit an empty JSON config document on stdout and exit 0.
    Config,
    /// Provision credentials and a VM for this job, and wait for it to
    /// become reachable.
    Prepare(PrepareArgs),
    /// Stream the job's shell script to the VM and propagate its exit
    /// status.
    Run(RunArgs),
    /// Tear down the job's VM and its credentials Secret.
    Cleanup(CleanupArgs),
    /// Sweep the namespace for expired VMs.
    Gc(GcArgs),
}

#[derive(Args, Debug)]
pub struct PrepareArgs {
    #[arg(long, default_value = DEFAULT_VM_TTL)]
    pub vm_ttl: String,

    #[arg(long)]
    pub default_image: String,
    #[arg(long, default_value = "IfNotPresent")]
    pub default_image_pull_policy: String,
    #[arg(long, default_value = "")]
    pub default_image_pull_secret: String,
    #[arg(long, default_value = "")]
    pub default_machine_type: String,
    #[arg(long, default_value = "")]
    pub default_architecture: String,
    #[arg(long, default_value = "")]
    pub default_cpu_request: String,
    #[arg(long, default_value = "")]
    pub default_cpu_limit: String,
    #[arg(long, default_value = "")]
    pub default_memory_request: String,
    #[arg(long, default_value = "")]
    pub default_memory_limit: String,
    #[arg(long, default_value = "")]
    pub default_ephemeral_storage_request: String,
    #[arg(long, default_value = "")]
    pub default_ephemeral_storage_limit: String,
    #[arg(long, default_value = DEFAULT_TIMEZONE)]
    pub default_timezone: String,

    #[arg(long, default_value = "1h")]
    pub timeout: String,
    #[arg(long, default_value = "10s")]
    pub dial_timeout: String,

    #[arg(long)]
    pub shell: String,
    #[arg(long)]
    pub ssh_user: String,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the job's shell script to stream to the guest.
    #[arg(long)]
    pub script: String,
}

#[derive(Args, Debug)]
pub struct CleanupArgs {
    #[arg(long, default_value = "1h")]
    pub timeout: String,

    /// Comma-separated `Phase` or `!Phase` entries; any match short-
    /// circuits cleanup to a no-op.
    #[arg(long, default_value = "")]
    pub skip_if: String,
}

#[derive(Args, Debug)]
pub struct GcArgs {
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
    #[arg(long, default_value = DEFAULT_MAX_AGE)]
    pub max_age: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prepare_subcommand() {
        let cli = Cli::parse_from([
            "kubevirt-executor",
            "prepare",
            "--default-image",
            "registry/runner:1",
            "--shell",
            "bash",
            "--ssh-user",
            "runner",
        ]);
        match cli.command {
            Commands::Prepare(args) => {
                assert_eq!(args.default_image, "registry/runner:1");
                assert_eq!(args.shell, "bash");
            }
            other => panic!("expected Prepare, got {other:?}"),
        }
    }

    #[test]
    fn namespace_defaults_and_is_global() {
        let cli = Cli::parse_from(["kubevirt-executor", "config"]);
        assert_eq!(cli.namespace, DEFAULT_NAMESPACE);

        let cli = Cli::parse_from(["kubevirt-executor", "--namespace", "custom", "gc"]);
        assert_eq!(cli.namespace, "custom");
    }
}
