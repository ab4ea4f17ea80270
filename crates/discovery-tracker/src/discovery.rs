//! Queries against the API server's discovery endpoints.
//!
//! Every query returns fresh data; nothing here touches the shared snapshot.
//! Callers decide what to do with the results.

use std::{collections::BTreeSet, sync::Arc};

use k8s_openapi::{
	apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
	apimachinery::pkg::apis::meta::v1::APIResourceList,
};
use kube::{
	api::{Api, ListParams},
	Client,
};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, instrument, warn};

use crate::{
	error::DiscoveryError,
	snapshot::{ApiResourceDescriptor, Snapshot},
};

/// Thin wrapper over a kube client issuing discovery requests.
#[derive(Clone)]
pub struct DiscoveryClient {
	client: Client,
	max_concurrent: usize,
}

impl DiscoveryClient {
	pub fn new(client: Client, max_concurrent: usize) -> Self {
		Self {
			client,
			max_concurrent: max_concurrent.max(1),
		}
	}

	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Fetch the resources served under a single group-version.
	///
	/// Returns `Ok(None)` when the server does not serve `group_version` at all.
	#[instrument(skip(self))]
	pub async fn group_version(
		&self,
		group_version: &str,
	) -> Result<Option<Vec<ApiResourceDescriptor>>, DiscoveryError> {
		match fetch_resource_list(&self.client, group_version).await {
			Ok(list) => Ok(Some(Snapshot::descriptors_from_list(&list))),
			Err(kube::Error::Api(ref err)) if err.code == 404 => {
				debug!("group version not served");
				Ok(None)
			}
			Err(source) => Err(DiscoveryError::GroupVersion {
				group_version: group_version.to_string(),
				source,
			}),
		}
	}

	/// Enumerate every served group-version and build a complete snapshot.
	///
	/// Group-versions are fetched concurrently. If some of them fail, their
	/// entries are carried over from `previous` (when present) so a single
	/// unavailable API does not erase its resources. A group-version answering
	/// 404 is omitted. The call only fails when the version/group listing fails
	/// or every group-version fails.
	#[instrument(skip_all)]
	pub async fn collect(&self, previous: Option<&Snapshot>) -> Result<Snapshot, DiscoveryError> {
		let group_versions = self.served_group_versions().await?;
		let total = group_versions.len();

		let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
		let mut join_set = JoinSet::new();

		for group_version in group_versions {
			let client = self.client.clone();
			let sem = Arc::clone(&semaphore);

			join_set.spawn(async move {
				// The semaphore is never closed.
				let _permit = sem.acquire_owned().await.ok();
				let result = fetch_resource_list(&client, &group_version).await;
				(group_version, result)
			});
		}

		let mut snapshot = Snapshot::new();
		let mut failures = 0;

		while let Some(joined) = join_set.join_next().await {
			let (group_version, result) = joined.map_err(DiscoveryError::TaskPanicked)?;
			match result {
				Ok(list) => {
					snapshot.insert(group_version, Snapshot::descriptors_from_list(&list));
				}
				// Advertised but already gone, e.g. a definition removed mid-cycle.
				Err(kube::Error::Api(ref err)) if err.code == 404 => {
					debug!(group_version = %group_version, "group version not served");
				}
				Err(e) => {
					failures += 1;
					let carried = previous.and_then(|p| p.get(&group_version));
					warn!(
						group_version = %group_version,
						error = %e,
						carried_over = carried.is_some(),
						"failed to discover group version"
					);
					if let Some(resources) = carried {
						snapshot.insert(group_version, resources.to_vec());
					}
				}
			}
		}

		if total > 0 && failures == total {
			return Err(DiscoveryError::AllGroupVersionsFailed(total));
		}

		debug!(
			group_versions = snapshot.len(),
			resources = snapshot.resource_count(),
			failures,
			"full discovery complete"
		);
		Ok(snapshot)
	}

	/// List every group-version the server advertises.
	async fn served_group_versions(&self) -> Result<BTreeSet<String>, DiscoveryError> {
		let core = self
			.client
			.list_core_api_versions()
			.await
			.map_err(DiscoveryError::ListVersions)?;
		let groups = self
			.client
			.list_api_groups()
			.await
			.map_err(DiscoveryError::ListGroups)?;

		let mut group_versions: BTreeSet<String> = core.versions.into_iter().collect();
		for group in groups.groups {
			group_versions.extend(group.versions.into_iter().map(|v| v.group_version));
		}
		Ok(group_versions)
	}

	/// List the UIDs of every CustomResourceDefinition currently in the cluster.
	#[instrument(skip_all)]
	pub async fn live_definition_uids(&self) -> Result<Vec<String>, DiscoveryError> {
		let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
		let list = api
			.list(&ListParams::default())
			.await
			.map_err(DiscoveryError::ListDefinitions)?;
		Ok(list
			.items
			.into_iter()
			.filter_map(|crd| crd.metadata.uid)
			.collect())
	}
}

/// Fetch `/api/<version>` or `/apis/<group>/<version>`.
async fn fetch_resource_list(
	client: &Client,
	group_version: &str,
) -> Result<APIResourceList, kube::Error> {
	if group_version.contains('/') {
		client.list_api_group_resources(group_version).await
	} else {
		client.list_core_api_resources(group_version).await
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use k8s_mock::{HttpMockK8sServer, MockCrd, RunningHttpMockK8sServer};

	use super::*;
	use crate::{client::connect_with_kubeconfig, config::ClusterConfig};

	async fn discovery_for(server: &RunningHttpMockK8sServer) -> DiscoveryClient {
		let client = connect_with_kubeconfig(&ClusterConfig::default(), server.kubeconfig())
			.await
			.unwrap();
		DiscoveryClient::new(client, 4)
	}

	fn widget_crd() -> MockCrd {
		MockCrd::namespaced("example.com", "v1", "widgets", "Widget")
	}

	#[tokio::test]
	async fn test_group_version_not_served() {
		let server = HttpMockK8sServer::builder().build().start().await;
		let discovery = discovery_for(&server).await;

		assert_matches!(discovery.group_version("example.com/v1").await, Ok(None));
		let core = discovery.group_version("v1").await.unwrap().unwrap();
		assert!(core.iter().any(|r| r.name == "pods/log"));
	}

	#[tokio::test]
	async fn test_collect_omits_group_version_answering_not_found() {
		let server = HttpMockK8sServer::builder()
			.crds(vec![widget_crd()])
			.build()
			.start()
			.await;
		let discovery = discovery_for(&server).await;
		let previous = discovery.collect(None).await.unwrap();
		assert!(previous.contains("example.com/v1"));

		// Still listed in /apis, but fetching it answers 404.
		server.withhold_group_version("example.com/v1");
		let snapshot = discovery.collect(Some(&previous)).await.unwrap();

		assert!(!snapshot.contains("example.com/v1"));
		assert!(snapshot.contains("apps/v1"));
		assert!(snapshot.contains("v1"));
	}
}
