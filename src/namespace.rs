//! Namespace lookup
//!
//! The webhook reads the namespace of every admitted pod to evaluate the
//! namespace-level opt-in label. Lookups go through [`NamespaceReader`] so the
//! handler can be exercised without a cluster.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{Api, Client};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::Error;

/// Read-only access to namespace labels
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NamespaceReader: Send + Sync {
    /// Labels of the named namespace, `None` when it does not exist
    async fn namespace_labels(
        &self,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error>;
}

/// [`NamespaceReader`] backed by the Kubernetes API
pub struct KubeNamespaceReader {
    client: Client,
}

impl KubeNamespaceReader {
    /// Create a new reader wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NamespaceReader for KubeNamespaceReader {
    async fn namespace_labels(
        &self,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get_opt(name).await? {
            Some(ns) => Ok(Some(ns.metadata.labels.unwrap_or_default())),
            None => {
                debug!(namespace = %name, "namespace not found");
                Ok(None)
            }
        }
    }
}
