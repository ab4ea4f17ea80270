//! HTTP-based mock Kubernetes server using wiremock.
//!
//! This provides a real HTTP server that can be used with actual kubeconfig-based
//! connections. Discovery documents and the CustomResourceDefinition listing are
//! computed per request from shared cluster state, so tests can create, terminate
//! and remove definitions while a client is talking to the server.
//!
//! Watch requests answer with whatever events were queued since the previous
//! watch request, or with an empty body after [`WATCH_POLL`] when none were.
//! Clients re-watch when a response ends, so queued events reach a running
//! watcher within one poll.

use std::{
	collections::{BTreeMap, BTreeSet, VecDeque},
	sync::{Arc, PoisonError, RwLock},
	time::Duration,
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use tracing::{debug, trace};
use wiremock::{
	matchers::{method, path},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::discovery::{MockApiResource, MockCrd, MockDiscovery};

const CRD_PATH: &str = "/apis/apiextensions.k8s.io/v1/customresourcedefinitions";

/// How long an idle watch request is held open before the server ends it.
pub const WATCH_POLL: Duration = Duration::from_millis(200);

/// Watch event types as they appear on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEventType {
	Added,
	Modified,
	Deleted,
}

impl WatchEventType {
	fn as_str(self) -> &'static str {
		match self {
			WatchEventType::Added => "ADDED",
			WatchEventType::Modified => "MODIFIED",
			WatchEventType::Deleted => "DELETED",
		}
	}
}

/// Mutable state behind the mock server.
#[derive(Default)]
struct MockCluster {
	discovery: MockDiscovery,
	crds: BTreeMap<String, MockCrd>,
	/// Advertised in `/apis` but answering 404.
	withheld: BTreeSet<String>,
	/// Serialized watch events not yet delivered.
	watch_events: VecDeque<serde_json::Value>,
	discovery_failure: bool,
	definitions_failure: bool,
}

/// Type alias for the shared mutable cluster state.
type SharedCluster = Arc<RwLock<MockCluster>>;

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	/// CustomResourceDefinitions present when the server starts.
	#[builder(default)]
	crds: Vec<MockCrd>,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	cluster: SharedCluster,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured definitions.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		debug!(uri = %server.uri(), "Started mock K8s server");

		let mut cluster = MockCluster::default();
		for crd in self.crds {
			trace!(name = %crd.name(), "Registered CRD");
			cluster.crds.insert(crd.name(), crd);
		}
		let cluster = Arc::new(RwLock::new(cluster));

		mount_version(&server).await;
		mount_api(&server, &cluster).await;

		RunningHttpMockK8sServer { server, cluster }
	}
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}

	/// Create or replace a definition.
	pub fn apply_crd(&self, crd: MockCrd) {
		let mut cluster = self.cluster.write().unwrap_or_else(PoisonError::into_inner);
		cluster.crds.insert(crd.name(), crd);
	}

	/// Remove a definition by object name (`<plural>.<group>`), as if its
	/// finalizers completed, without telling watchers. Returns whether it existed.
	pub fn remove_crd(&self, name: &str) -> bool {
		let mut cluster = self.cluster.write().unwrap_or_else(PoisonError::into_inner);
		cluster.crds.remove(name).is_some()
	}

	/// Remove a definition and queue the matching `DELETED` watch event.
	/// Returns whether it existed.
	pub fn delete_crd(&self, name: &str) -> bool {
		let mut cluster = self.cluster.write().unwrap_or_else(PoisonError::into_inner);
		let Some(crd) = cluster.crds.remove(name) else {
			return false;
		};
		cluster
			.watch_events
			.push_back(watch_event(WatchEventType::Deleted, &crd));
		true
	}

	/// Queue a watch event for `crd`. Cluster state is not changed; pair it
	/// with [`apply_crd`](Self::apply_crd) or [`remove_crd`](Self::remove_crd)
	/// as needed.
	pub fn push_watch_event(&self, event_type: WatchEventType, crd: &MockCrd) {
		let mut cluster = self.cluster.write().unwrap_or_else(PoisonError::into_inner);
		cluster.watch_events.push_back(watch_event(event_type, crd));
	}

	/// Keep advertising `group_version` in `/apis` but answer 404 when it is
	/// fetched, as the server does while a definition is being removed.
	pub fn withhold_group_version(&self, group_version: &str) {
		let mut cluster = self.cluster.write().unwrap_or_else(PoisonError::into_inner);
		cluster.withheld.insert(group_version.to_string());
	}

	/// Make every discovery endpoint answer 503.
	pub fn set_discovery_failure(&self, fail: bool) {
		let mut cluster = self.cluster.write().unwrap_or_else(PoisonError::into_inner);
		cluster.discovery_failure = fail;
	}

	/// Make listing CustomResourceDefinitions answer 503.
	pub fn set_definitions_failure(&self, fail: bool) {
		let mut cluster = self.cluster.write().unwrap_or_else(PoisonError::into_inner);
		cluster.definitions_failure = fail;
	}
}

async fn mount_version(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"major": "1",
			"minor": "28",
			"gitVersion": "v1.28.0",
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-01-01T00:00:00Z",
			"goVersion": "go1.21.0",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

/// Mount a single GET responder that routes on the request path.
async fn mount_api(server: &MockServer, cluster: &SharedCluster) {
	let cluster = Arc::clone(cluster);

	Mock::given(method("GET"))
		.respond_with(move |req: &Request| {
			let mut cluster = cluster.write().unwrap_or_else(PoisonError::into_inner);
			let path = req.url.path().trim_end_matches('/');
			let is_watch = req
				.url
				.query_pairs()
				.any(|(key, value)| key == "watch" && (value == "true" || value == "1"));

			trace!(path = %path, watch = is_watch, "mock request");

			if path == CRD_PATH {
				return definitions_response(&mut cluster, is_watch);
			}
			if cluster.discovery_failure {
				return status_response(503, "ServiceUnavailable", "discovery unavailable");
			}

			match path {
				"/api" => ResponseTemplate::new(200).set_body_json(serde_json::json!({
					"kind": "APIVersions",
					"versions": ["v1"],
					"serverAddressByClientCIDRs": []
				})),
				"/api/v1" => resource_list_response("v1", &cluster.discovery.core_resources),
				"/apis" => group_list_response(&cluster),
				_ => match path.strip_prefix("/apis/") {
					Some(group_version) if cluster.withheld.contains(group_version) => {
						status_response(404, "NotFound", "the server could not find the requested resource")
					}
					Some(group_version) if group_version.matches('/').count() == 1 => {
						match served_group_versions(&cluster).get(group_version) {
							Some(resources) => resource_list_response(group_version, resources),
							None => status_response(404, "NotFound", "the server could not find the requested resource"),
						}
					}
					_ => status_response(404, "NotFound", "not found"),
				},
			}
		})
		.mount(server)
		.await;
}

/// Every group-version currently served: built-in groups plus served CRD versions.
fn served_group_versions(cluster: &MockCluster) -> BTreeMap<String, Vec<MockApiResource>> {
	let mut served = cluster.discovery.group_resources.clone();
	for crd in cluster.crds.values() {
		for (group_version, resources) in crd.served_resources() {
			served.entry(group_version).or_default().extend(resources);
		}
	}
	served
}

fn group_list_response(cluster: &MockCluster) -> ResponseTemplate {
	let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
	for group_version in served_group_versions(cluster).into_keys() {
		if let Some((group, _)) = group_version.split_once('/') {
			groups
				.entry(group.to_string())
				.or_default()
				.push(group_version);
		}
	}

	let groups: Vec<_> = groups
		.into_iter()
		.map(|(group, group_versions)| {
			let versions: Vec<_> = group_versions
				.iter()
				.map(|gv| {
					let version = gv.split_once('/').map_or(gv.as_str(), |(_, v)| v);
					serde_json::json!({"groupVersion": gv, "version": version})
				})
				.collect();
			serde_json::json!({
				"name": group,
				"versions": versions,
				"preferredVersion": versions[0],
			})
		})
		.collect();

	ResponseTemplate::new(200).set_body_json(serde_json::json!({
		"kind": "APIGroupList",
		"apiVersion": "v1",
		"groups": groups
	}))
}

fn resource_list_response(group_version: &str, resources: &[MockApiResource]) -> ResponseTemplate {
	let resources: Vec<_> = resources.iter().map(MockApiResource::to_json).collect();
	ResponseTemplate::new(200).set_body_json(serde_json::json!({
		"kind": "APIResourceList",
		"apiVersion": "v1",
		"groupVersion": group_version,
		"resources": resources
	}))
}

fn definitions_response(cluster: &mut MockCluster, is_watch: bool) -> ResponseTemplate {
	if cluster.definitions_failure {
		return status_response(503, "ServiceUnavailable", "definitions unavailable");
	}
	if is_watch {
		let body: String = cluster
			.watch_events
			.drain(..)
			.map(|event| format!("{event}\n"))
			.collect();
		let idle = body.is_empty();
		let response = ResponseTemplate::new(200).set_body_raw(body, "application/json");
		return if idle {
			response.set_delay(WATCH_POLL)
		} else {
			response
		};
	}

	let items: Vec<_> = cluster.crds.values().map(MockCrd::manifest).collect();
	ResponseTemplate::new(200).set_body_json(serde_json::json!({
		"kind": "CustomResourceDefinitionList",
		"apiVersion": "apiextensions.k8s.io/v1",
		"metadata": {"resourceVersion": "1"},
		"items": items
	}))
}

fn status_response(code: u16, reason: &str, message: &str) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(serde_json::json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	}))
}

fn watch_event(event_type: WatchEventType, crd: &MockCrd) -> serde_json::Value {
	serde_json::json!({
		"type": event_type.as_str(),
		"object": crd.manifest(),
	})
}
