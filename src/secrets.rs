//! # SecretStore
//!
//! Creates / reads / deletes a single Kubernetes Secret per job holding
//! `user`, `password`, `userdata`. Labeled for correlation and cleanup;
//! delete is idempotent because GC and cleanup may race to remove the
//! same object.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;

use crate::constants::{DEFAULT_SSH_PORT, LABEL_PREFIX};
use crate::credentials::Password;
use crate::error::{is_already_exists, is_not_found, ExecutorError};

/// Guest SSH credentials fetched back out of a Secret by `run`.
pub struct GuestCredentials {
    pub user: String,
    pub password: String,
    pub port: u16,
}

pub struct SecretStore {
    api: Api<Secret>,
}

impl SecretStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }

    /// `vm-creds-<id>`, labeled `<prefix>/id=<id>`, `<prefix>/type=vm-credentials`.
    pub fn secret_name(job_id: &str) -> String {
        format!("vm-creds-{job_id}")
    }

    pub async fn create(
        &self,
        job_id: &str,
        user: &str,
        password: &Password,
        userdata: &str,
    ) -> Result<Secret> {
        let mut labels = BTreeMap::new();
        labels.insert(format!("{LABEL_PREFIX}/id"), job_id.to_string());
        labels.insert(format!("{LABEL_PREFIX}/type"), "vm-credentials".to_string());

        let mut string_data = BTreeMap::new();
        string_data.insert("user".to_string(), user.to_string());
        string_data.insert("password".to_string(), password.as_str().to_string());
        string_data.insert("userdata".to_string(), userdata.to_string());

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(Self::secret_name(job_id)),
                labels: Some(labels),
                ..Default::default()
            },
            string_data: Some(string_data),
            ..Default::default()
        };

        // The id label makes the name deterministic, so a retried
        // `prepare` for the same job can race its own earlier attempt
        // here. Fetch and return the existing Secret instead of failing.
        match self.api.create(&PostParams::default(), &secret).await {
            Ok(s) => Ok(s),
            Err(e) if is_already_exists(&e) => match self.api.get(&Self::secret_name(job_id)).await {
                Ok(s) => Ok(s),
                Err(e) => Err(ExecutorError::Cluster(
                    anyhow::Error::new(e).context("fetching existing credentials Secret after AlreadyExists"),
                )
                .into()),
            },
            Err(e) => Err(ExecutorError::Cluster(anyhow::Error::new(e).context("creating credentials Secret")).into()),
        }
    }

    pub async fn get(&self, name: &str) -> Result<GuestCredentials> {
        let secret = self.api.get(name).await.context("fetching credentials Secret")?;
        let data = secret.data.unwrap_or_default();
        Ok(GuestCredentials {
            user: decode_field(&data, "user")?,
            password: decode_field(&data, "password")?,
            port: DEFAULT_SSH_PORT,
        })
    }

    /// Idempotent: a *not-found* error is swallowed; all other errors
    /// propagate.
    pub async fn delete(&self, name: &str) -> Result<()> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(ExecutorError::Cluster(anyhow::Error::new(e).context("deleting credentials Secret")).into()),
        }
    }
}

fn decode_field(data: &BTreeMap<String, ByteString>, key: &str) -> Result<String> {
    let bytes = data
        .get(key)
        .ok_or_else(|| anyhow::anyhow!("credentials Secret missing field {key:?}"))?;
    String::from_utf8(bytes.0.clone()).with_context(|| format!("field {key:?} is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_name_format() {
        assert_eq!(SecretStore::secret_name("abc123"), "vm-creds-abc123");
    }

    #[test]
    fn decode_field_reports_missing_key() {
        let data = BTreeMap::new();
        let err = decode_field(&data, "password").unwrap_err();
        assert!(err.to_string().contains("password"));
    }
}
