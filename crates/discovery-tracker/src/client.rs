//! Kubernetes cluster connection management.

use kube::{
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tracing::instrument;

use crate::config::ClusterConfig;

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("no context named `{0}` was found. Please check your $KUBECONFIG")]
	ContextNotFound(String),

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// Build a client from the user's kubeconfig.
#[instrument(skip_all, fields(context = cluster.context.as_deref()))]
pub async fn connect(cluster: &ClusterConfig) -> Result<Client, ConnectionError> {
	let kubeconfig = Kubeconfig::read()?;
	connect_with_kubeconfig(cluster, kubeconfig).await
}

/// Build a client from a provided kubeconfig.
///
/// When `cluster.context` is set it must name a context in `kubeconfig`;
/// otherwise the kubeconfig's current context is used.
#[instrument(skip_all, fields(context = cluster.context.as_deref()))]
pub async fn connect_with_kubeconfig(
	cluster: &ClusterConfig,
	kubeconfig: Kubeconfig,
) -> Result<Client, ConnectionError> {
	if let Some(context) = &cluster.context {
		if !kubeconfig.contexts.iter().any(|c| &c.name == context) {
			return Err(ConnectionError::ContextNotFound(context.clone()));
		}
		tracing::debug!(context = %context, "using context");
	}

	let mut config = Config::from_custom_kubeconfig(
		kubeconfig,
		&KubeConfigOptions {
			context: cluster.context.clone(),
			..Default::default()
		},
	)
	.await?;

	config.read_timeout = Some(cluster.timeout);
	Ok(Client::try_from(config)?)
}
