//! # Watcher
//!
//! Resumable long-poll over VM events filtered by the `id` label.
//! Reconnects on channel close or `Error` events; feeds a
//! caller-supplied predicate; terminates when the predicate signals done.
//!
//! The stream-opening step is injected as a closure so the reconnect
//! state machine can be unit tested against a scripted event sequence
//! without a live apiserver.

use anyhow::{anyhow, Result};
use futures::{Stream, StreamExt};
use kube::api::WatchEvent;

use crate::constants::LABEL_PREFIX;
use crate::vm::VirtualMachineInstance;

/// One step of the caller's reaction to a watch event.
pub enum OnEventOutcome {
    /// Keep watching.
    Continue,
    /// Stop watching successfully.
    Done,
}

/// Which kind of event carried a VM payload, so callers that care about
/// the distinction (e.g. `cleanup` waiting specifically for `Deleted`)
/// don't have to inspect the raw `kube::api::WatchEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

/// Label selector used by every watch/list against VMs for this job.
pub fn id_selector(job_id: &str) -> String {
    format!("{LABEL_PREFIX}/id={job_id}")
}

/// Runs the resumable watch loop. `open_stream(resource_version)` opens a
/// fresh event stream starting from the given resource version (`""` or
/// `"0"` for "from now"/"from the start" depending on the caller's
/// semantics, mirroring `kube`'s watch API). It returns a future because
/// opening a real watch against the API server is itself an async call.
/// `on_event` is the caller's predicate; returning `OnEventOutcome::Done`
/// ends the watch successfully. On an `Error` event, `on_event` is
/// invoked with `None` first so the caller may veto the reconnect by
/// itself returning `Done`.
pub async fn watch<S, O, OFut, F, Fut>(
    initial_resource_version: &str,
    mut open_stream: O,
    mut on_event: F,
) -> Result<()>
where
    S: Stream<Item = Result<WatchEvent<VirtualMachineInstance>, kube::Error>> + Unpin,
    O: FnMut(String) -> OFut,
    OFut: std::future::Future<Output = Result<S>>,
    F: FnMut(Option<(EventKind, VirtualMachineInstance)>) -> Fut,
    Fut: std::future::Future<Output = Result<OnEventOutcome>>,
{
    let mut resource_version = initial_resource_version.to_string();
    let mut stream = open_stream(resource_version.clone()).await?;

    loop {
        match stream.next().await {
            None => {
                // Closed channel: reopen silently.
                stream = open_stream(resource_version.clone()).await?;
                continue;
            }
            Some(Err(e)) => {
                return Err(anyhow!(e).context("watch stream transport error"));
            }
            Some(Ok(event)) => match event {
                WatchEvent::Added(vm) => {
                    resource_version = resource_version_of(&vm).unwrap_or(resource_version);
                    match on_event(Some((EventKind::Added, vm))).await? {
                        OnEventOutcome::Done => return Ok(()),
                        OnEventOutcome::Continue => {}
                    }
                }
                WatchEvent::Modified(vm) => {
                    resource_version = resource_version_of(&vm).unwrap_or(resource_version);
                    match on_event(Some((EventKind::Modified, vm))).await? {
                        OnEventOutcome::Done => return Ok(()),
                        OnEventOutcome::Continue => {}
                    }
                }
                WatchEvent::Deleted(vm) => {
                    resource_version = resource_version_of(&vm).unwrap_or(resource_version);
                    match on_event(Some((EventKind::Deleted, vm))).await? {
                        OnEventOutcome::Done => return Ok(()),
                        OnEventOutcome::Continue => {}
                    }
                }
                WatchEvent::Error(status) => {
                    match on_event(None).await? {
                        OnEventOutcome::Done => return Ok(()),
                        OnEventOutcome::Continue => {}
                    }
                    tracing::warn!(?status, "watch stream reported Error event, reconnecting");
                    resource_version = "0".to_string();
                    stream = open_stream(resource_version.clone()).await?;
                }
                WatchEvent::Bookmark(_) => {
                    // No application-visible content; keep watching.
                }
            },
        }
    }
}

fn resource_version_of(vm: &VirtualMachineInstance) -> Option<String> {
    vm.metadata.resource_version.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use kube::core::ErrorResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn vm_with_ip(ip: &str) -> VirtualMachineInstance {
        use crate::vm::{InterfaceStatus, VirtualMachineInstanceStatus, VmCondition};
        let mut vm = VirtualMachineInstance::new("test-vm", Default::default());
        vm.status = Some(VirtualMachineInstanceStatus {
            phase: "Running".to_string(),
            interfaces: if ip.is_empty() {
                vec![]
            } else {
                vec![InterfaceStatus {
                    ip_address: ip.to_string(),
                }]
            },
            conditions: if ip.is_empty() {
                vec![]
            } else {
                vec![VmCondition {
                    condition_type: "Ready".to_string(),
                    status: "True".to_string(),
                }]
            },
        });
        vm
    }

    // A scripted [Modified(no ip), Error, Modified(ready)] sequence
    // reconnects exactly once and then terminates on the sentinel.
    #[tokio::test]
    async fn resume_after_error_event_reconnects_once() {
        let reconnects = Arc::new(AtomicUsize::new(0));
        let reconnects_clone = reconnects.clone();

        let open_stream = move |_rv: String| {
            let attempt = reconnects_clone.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt == 1 {
                    Ok(stream::iter(vec![
                        Ok(WatchEvent::Modified(vm_with_ip(""))),
                        Ok(WatchEvent::Error(ErrorResponse {
                            status: String::new(),
                            message: String::new(),
                            reason: String::new(),
                            code: 0,
                        })),
                    ])
                    .boxed())
                } else {
                    Ok(stream::iter(vec![Ok(WatchEvent::Modified(vm_with_ip("10.0.0.5")))]).boxed())
                }
            }
        };

        let result = watch("", open_stream, |event| async move {
            match event {
                None => Ok(OnEventOutcome::Continue),
                Some((_kind, vm)) => {
                    if vm.status.map(|s| s.is_ready()).unwrap_or(false) {
                        Ok(OnEventOutcome::Done)
                    } else {
                        Ok(OnEventOutcome::Continue)
                    }
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(reconnects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sentinel_terminates_without_reconnect() {
        let reconnects = Arc::new(AtomicUsize::new(0));
        let reconnects_clone = reconnects.clone();

        let open_stream = move |_rv: String| {
            reconnects_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(stream::iter(vec![Ok(WatchEvent::Modified(vm_with_ip("10.0.0.5")))]).boxed())
            }
        };

        watch("", open_stream, |_vm| async { Ok(OnEventOutcome::Done) })
            .await
            .unwrap();

        assert_eq!(reconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deleted_event_is_distinguishable_from_modified() {
        let open_stream = move |_rv: String| async move {
            Ok(stream::iter(vec![
                Ok(WatchEvent::Modified(vm_with_ip("10.0.0.5"))),
                Ok(WatchEvent::Deleted(vm_with_ip("10.0.0.5"))),
            ])
            .boxed())
        };

        let mut saw_deleted = false;
        watch("", open_stream, |event| {
            if let Some((EventKind::Deleted, _)) = event {
                saw_deleted = true;
                return futures::future::ready(Ok(OnEventOutcome::Done));
            }
            futures::future::ready(Ok(OnEventOutcome::Continue))
        })
        .await
        .unwrap();

        assert!(saw_deleted);
    }

    #[test]
    fn id_selector_format() {
        assert_eq!(
            id_selector("abc123"),
            "io.kubevirt.gitlab-runner/id=abc123"
        );
    }
}
