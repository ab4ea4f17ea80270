//! Error types for the tracker.

use thiserror::Error;

pub use crate::{client::ConnectionError, config::ConfigError};

/// Errors surfaced by [`Tracker`](crate::Tracker) operations.
#[derive(Debug, Error)]
pub enum TrackerError {
	/// No collection has completed yet; retry once the tracker has converged.
	#[error("API resource tracker has not completed its first discovery yet")]
	NotStarted,

	/// The definition watch could not be established.
	#[error("failed to establish CustomResourceDefinition watch")]
	Watch(#[source] kube::runtime::watcher::Error),

	#[error(transparent)]
	Discovery(#[from] DiscoveryError),

	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Connection(#[from] ConnectionError),
}

/// Errors that can occur while querying the discovery API.
#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("listing core API versions")]
	ListVersions(#[source] kube::Error),

	#[error("listing API groups")]
	ListGroups(#[source] kube::Error),

	#[error("discovering resources for {group_version}")]
	GroupVersion {
		group_version: String,
		#[source]
		source: kube::Error,
	},

	#[error("discovery failed for all {0} group versions")]
	AllGroupVersionsFailed(usize),

	#[error("listing CustomResourceDefinitions")]
	ListDefinitions(#[source] kube::Error),

	#[error("discovery task panicked")]
	TaskPanicked(#[source] tokio::task::JoinError),
}
