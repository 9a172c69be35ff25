use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

use super::{ClusterApi, JobConfig, JobHandle, JobStatus};
use crate::error::{OrchestratorError, Result};

/// Pod security context applied to every scan job.
const JOB_RUN_AS: i64 = 10001;

/// How to reach one Kubernetes API server.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KubeContext {
    pub api_url: String,
    /// Bearer token; takes precedence over `token_path`.
    pub token: Option<String>,
    pub token_path: Option<PathBuf>,
    pub ca_cert_path: Option<PathBuf>,
    pub accept_invalid_certs: bool,
}

impl Default for KubeContext {
    fn default() -> Self {
        Self {
            api_url: "https://kubernetes.default.svc".to_string(),
            token: None,
            token_path: Some(PathBuf::from(
                "/var/run/secrets/kubernetes.io/serviceaccount/token",
            )),
            ca_cert_path: Some(PathBuf::from(
                "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt",
            )),
            accept_invalid_certs: false,
        }
    }
}

/// The in-cluster connection plus any named contexts job templates refer to.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct KubeClientConfig {
    pub in_cluster: KubeContext,
    pub contexts: BTreeMap<String, KubeContext>,
}

struct Connection {
    base: Url,
    http: reqwest::Client,
    token: Option<String>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("base", &self.base.as_str())
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

fn read_optional(path: &Path, what: &str) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no kubernetes {what} found");
            Ok(None)
        }
        Err(err) => Err(OrchestratorError::Cluster(format!(
            "failed to read kubernetes {what} {}: {err}",
            path.display()
        ))),
    }
}

impl Connection {
    fn new(context: &KubeContext) -> Result<Self> {
        let mut raw = context.api_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base = Url::parse(&raw).map_err(|e| {
            OrchestratorError::Cluster(format!(
                "invalid kubernetes api url {}: {e}",
                context.api_url
            ))
        })?;

        let token = match (&context.token, &context.token_path) {
            (Some(token), _) => Some(token.clone()),
            (None, Some(path)) => read_optional(path, "token")?
                .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string()),
            (None, None) => None,
        };

        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(context.accept_invalid_certs);
        if let Some(path) = &context.ca_cert_path {
            if let Some(pem) = read_optional(path, "CA certificate")? {
                builder =
                    builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
            }
        }

        Ok(Self {
            base,
            http: builder.build()?,
            token,
        })
    }

    fn jobs_url(&self, namespace: &str) -> Result<Url> {
        self.base
            .join(&format!("apis/batch/v1/namespaces/{namespace}/jobs"))
            .map_err(|e| {
                OrchestratorError::Cluster(format!(
                    "invalid jobs url for namespace {namespace}: {e}"
                ))
            })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// [`ClusterApi`] over the Kubernetes `batch/v1` REST API.
pub struct KubeClusterClient {
    in_cluster: Connection,
    contexts: BTreeMap<String, Connection>,
}

impl fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeClusterClient")
            .field("in_cluster", &self.in_cluster)
            .field("contexts", &self.contexts.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl KubeClusterClient {
    pub fn new(config: &KubeClientConfig) -> Result<Self> {
        let in_cluster = Connection::new(&config.in_cluster)?;
        let contexts = config
            .contexts
            .iter()
            .map(|(name, context)| Ok((name.clone(), Connection::new(context)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self {
            in_cluster,
            contexts,
        })
    }

    fn connection(&self, context_name: Option<&str>) -> Result<&Connection> {
        match context_name {
            None => Ok(&self.in_cluster),
            Some(name) => self.contexts.get(name).ok_or_else(|| {
                OrchestratorError::Cluster(format!(
                    "unknown kubernetes context {name}"
                ))
            }),
        }
    }
}

/// `batch/v1` Job manifest for `config`.
pub fn job_manifest(config: &JobConfig) -> Value {
    let env: Vec<Value> = config
        .env
        .iter()
        .map(|(name, value)| json!({"name": name, "value": value}))
        .collect();
    let volume_mounts: Vec<Value> = config
        .volume_mounts
        .iter()
        .map(|mount| json!({"name": mount.name, "mountPath": mount.mount_path}))
        .collect();
    let volumes: Vec<Value> = config
        .secrets
        .iter()
        .map(|secret| {
            json!({"name": secret.name, "secret": {"secretName": secret.secret_name}})
        })
        .collect();

    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {"name": config.name},
        "spec": {
            "backoffLimit": config.backoff_limit,
            "template": {
                "metadata": {"labels": {}},
                "spec": {
                    "restartPolicy": "Never",
                    "serviceAccountName": config.service_account_name,
                    "securityContext": {
                        "runAsUser": JOB_RUN_AS,
                        "runAsGroup": JOB_RUN_AS,
                    },
                    "containers": [{
                        "name": config.name,
                        "image": config.image_name,
                        "imagePullPolicy": "IfNotPresent",
                        "args": config.args,
                        "env": env,
                        "volumeMounts": volume_mounts,
                    }],
                    "volumes": volumes,
                },
            },
        },
    })
}

#[derive(Debug, Deserialize)]
struct KubeJobList {
    #[serde(default)]
    items: Vec<KubeJob>,
}

#[derive(Debug, Deserialize)]
struct KubeJob {
    metadata: KubeMeta,
    #[serde(default)]
    spec: Option<KubeJobSpec>,
    #[serde(default)]
    status: Option<KubeJobStatus>,
}

#[derive(Debug, Deserialize)]
struct KubeMeta {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KubeJobSpec {
    template: KubePodTemplate,
}

#[derive(Debug, Deserialize)]
struct KubePodTemplate {
    spec: KubePodSpec,
}

#[derive(Debug, Deserialize)]
struct KubePodSpec {
    #[serde(default)]
    containers: Vec<KubeContainer>,
}

#[derive(Debug, Deserialize)]
struct KubeContainer {
    #[serde(default)]
    env: Vec<KubeEnvVar>,
}

#[derive(Debug, Deserialize)]
struct KubeEnvVar {
    name: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct KubeJobStatus {
    #[serde(default)]
    active: Option<i32>,
    #[serde(default)]
    succeeded: Option<i32>,
    #[serde(default)]
    failed: Option<i32>,
}

impl KubeJob {
    fn into_handle(self, context_name: Option<&str>, namespace: &str) -> JobHandle {
        let env = self
            .spec
            .and_then(|spec| spec.template.spec.containers.into_iter().next())
            .map(|container| {
                container
                    .env
                    .into_iter()
                    .filter_map(|var| Some((var.name, var.value?)))
                    .collect()
            })
            .unwrap_or_default();
        let status = self.status.unwrap_or_default();

        JobHandle {
            context_name: context_name.map(str::to_string),
            namespace: self.metadata.namespace.unwrap_or_else(|| namespace.to_string()),
            name: self.metadata.name,
            status: JobStatus {
                active: status.active.unwrap_or(0),
                succeeded: status.succeeded.unwrap_or(0),
                failed: status.failed.unwrap_or(0),
            },
            env,
        }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterClient {
    async fn create_job(&self, config: &JobConfig) -> Result<JobHandle> {
        let connection = self.connection(config.context_name.as_deref())?;
        let url = connection.jobs_url(&config.namespace)?;

        let response = connection
            .authorize(connection.http.post(url))
            .json(&job_manifest(config))
            .send()
            .await
            .map_err(|e| OrchestratorError::JobCreation {
                job_name: config.name.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(job_name = %config.name, %status, "kubernetes rejected job");
            return Err(OrchestratorError::JobCreation {
                job_name: config.name.clone(),
                reason: format!("{status}: {body}"),
            });
        }

        let job: KubeJob = response.json().await?;
        Ok(job.into_handle(config.context_name.as_deref(), &config.namespace))
    }

    async fn read_job(
        &self,
        context_name: Option<&str>,
        namespace: &str,
        name: &str,
    ) -> Result<JobHandle> {
        let connection = self.connection(context_name)?;
        let mut url = connection.jobs_url(namespace)?;
        url.query_pairs_mut()
            .append_pair("labelSelector", &format!("job-name={name}"));

        let response = connection
            .authorize(connection.http.get(url))
            .send()
            .await?
            .error_for_status()?;
        let list: KubeJobList = response.json().await?;

        list.items
            .into_iter()
            .next()
            .map(|job| job.into_handle(context_name, namespace))
            .ok_or_else(|| {
                OrchestratorError::Cluster(format!(
                    "no job labelled job-name={name} in {namespace}"
                ))
            })
    }
}
