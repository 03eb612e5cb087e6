//! Kubernetes Scale Target Adapter
//!
//! Implements the `ScaleTarget` port over the `scale` subresource of a
//! Deployment or StatefulSet.
//!
//! Writes carry the `resourceVersion` of the last read, so a replica change
//! made by someone else between read and write fails with HTTP 409 and
//! surfaces as `Error::WriteConflict`.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::autoscaling::v1::{Scale, ScaleSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::Client;
use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::crd::{ScaleTargetKind, ScaleTargetRef};
use crate::domain::ports::ScaleTarget;
use crate::error::{Error, Result};

enum WorkloadApi {
    Deployment(Api<Deployment>),
    StatefulSet(Api<StatefulSet>),
}

impl WorkloadApi {
    async fn get_scale(&self, name: &str) -> kube::Result<Scale> {
        match self {
            WorkloadApi::Deployment(api) => api.get_scale(name).await,
            WorkloadApi::StatefulSet(api) => api.get_scale(name).await,
        }
    }

    async fn replace_scale(&self, name: &str, body: Vec<u8>) -> kube::Result<Scale> {
        let pp = PostParams::default();
        match self {
            WorkloadApi::Deployment(api) => api.replace_scale(name, &pp, body).await,
            WorkloadApi::StatefulSet(api) => api.replace_scale(name, &pp, body).await,
        }
    }
}

/// Scale subresource of one namespaced workload
pub struct KubeScaleTarget {
    api: WorkloadApi,
    namespace: String,
    target: ScaleTargetRef,
    resource_version: Mutex<Option<String>>,
}

impl KubeScaleTarget {
    pub fn new(client: Client, namespace: &str, target: ScaleTargetRef) -> Self {
        let api = match target.kind {
            ScaleTargetKind::Deployment => {
                WorkloadApi::Deployment(Api::namespaced(client, namespace))
            }
            ScaleTargetKind::StatefulSet => {
                WorkloadApi::StatefulSet(Api::namespaced(client, namespace))
            }
        };

        Self {
            api,
            namespace: namespace.to_string(),
            target,
            resource_version: Mutex::new(None),
        }
    }

    fn classify(&self, err: kube::Error) -> Error {
        classify_error(&self.namespace, &self.target, err)
    }

    async fn read(&self) -> Result<u32> {
        let scale = self
            .api
            .get_scale(&self.target.name)
            .await
            .map_err(|e| self.classify(e))?;

        *self.resource_version.lock() = scale.metadata.resource_version.clone();
        Ok(spec_replicas(&scale))
    }
}

impl std::fmt::Debug for KubeScaleTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeScaleTarget")
            .field("namespace", &self.namespace)
            .field("target", &self.target)
            .finish()
    }
}

#[async_trait]
impl ScaleTarget for KubeScaleTarget {
    #[instrument(skip(self), fields(scale_target = %self.id()))]
    async fn get_replicas(&self) -> Result<u32> {
        self.read().await
    }

    #[instrument(skip(self), fields(scale_target = %self.id()))]
    async fn set_replicas(&self, replicas: u32) -> Result<()> {
        let resource_version = self.resource_version.lock().clone();
        let resource_version = match resource_version {
            Some(rv) => Some(rv),
            None => {
                self.read().await?;
                self.resource_version.lock().clone()
            }
        };

        let body = scale_body(
            &self.target.name,
            &self.namespace,
            resource_version,
            replicas,
        );
        let bytes = serde_json::to_vec(&body)
            .map_err(|e| Error::Internal(format!("Failed to encode scale: {}", e)))?;

        let updated = self
            .api
            .replace_scale(&self.target.name, bytes)
            .await
            .map_err(|e| self.classify(e))?;

        *self.resource_version.lock() = updated.metadata.resource_version.clone();
        debug!(replicas, "Replaced scale subresource");
        Ok(())
    }

    fn id(&self) -> String {
        format!(
            "{}/{}/{}",
            self.namespace, self.target.kind, self.target.name
        )
    }
}

/// Desired replicas from a scale object; absent means 0.
fn spec_replicas(scale: &Scale) -> u32 {
    scale
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .map(|r| r.max(0) as u32)
        .unwrap_or(0)
}

fn scale_body(
    name: &str,
    namespace: &str,
    resource_version: Option<String>,
    replicas: u32,
) -> Scale {
    Scale {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version,
            ..Default::default()
        },
        spec: Some(ScaleSpec {
            replicas: Some(replicas.min(i32::MAX as u32) as i32),
        }),
        status: None,
    }
}

fn classify_error(namespace: &str, target: &ScaleTargetRef, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(e) if e.code == 409 => Error::WriteConflict {
            target: format!("{}/{}/{}", namespace, target.kind, target.name),
        },
        kube::Error::Api(e) if e.code == 404 => Error::ScaleTargetNotFound {
            kind: target.kind.to_string(),
            name: format!("{}/{}", namespace, target.name),
        },
        other => Error::Kube(other),
    }
}
