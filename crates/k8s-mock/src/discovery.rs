//! Mock Kubernetes API discovery types.

use std::collections::BTreeMap;

const RESOURCE_VERBS: [&str; 8] = [
	"create",
	"delete",
	"deletecollection",
	"get",
	"list",
	"patch",
	"update",
	"watch",
];

const STATUS_VERBS: [&str; 3] = ["get", "patch", "update"];

/// Built-in resources served regardless of which CRDs exist.
pub struct MockDiscovery {
	pub core_resources: Vec<MockApiResource>,
	pub group_resources: BTreeMap<String, Vec<MockApiResource>>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		Self {
			core_resources: vec![
				MockApiResource::namespaced("configmaps", "ConfigMap"),
				MockApiResource::namespaced("secrets", "Secret"),
				MockApiResource::namespaced("services", "Service"),
				MockApiResource::namespaced("pods", "Pod"),
				MockApiResource::subresource("pods/log", "Pod", true, &["get"]),
				MockApiResource::cluster_scoped("namespaces", "Namespace"),
			],
			group_resources: BTreeMap::from([
				(
					"apps/v1".to_string(),
					vec![
						MockApiResource::namespaced("deployments", "Deployment"),
						MockApiResource::namespaced("statefulsets", "StatefulSet"),
						MockApiResource::namespaced("daemonsets", "DaemonSet"),
					],
				),
				(
					"apiextensions.k8s.io/v1".to_string(),
					vec![
						MockApiResource::cluster_scoped(
							"customresourcedefinitions",
							"CustomResourceDefinition",
						),
						MockApiResource::subresource(
							"customresourcedefinitions/status",
							"CustomResourceDefinition",
							false,
							&STATUS_VERBS,
						),
					],
				),
			]),
		}
	}
}

/// A mock API resource definition.
#[derive(Clone, Debug)]
pub struct MockApiResource {
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

impl MockApiResource {
	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self::subresource(name, kind, true, &RESOURCE_VERBS)
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self::subresource(name, kind, false, &RESOURCE_VERBS)
	}

	pub fn subresource(name: &str, kind: &str, namespaced: bool, verbs: &[&str]) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced,
			verbs: verbs.iter().map(|v| (*v).to_string()).collect(),
		}
	}

	pub(crate) fn to_json(&self) -> serde_json::Value {
		serde_json::json!({
			"name": self.name,
			"singularName": "",
			"namespaced": self.namespaced,
			"kind": self.kind,
			"verbs": self.verbs,
		})
	}
}

/// A CustomResourceDefinition living in the mock cluster.
///
/// While present (including while terminating) each served version makes the
/// resource and its `status` subresource discoverable.
#[derive(Clone, Debug)]
pub struct MockCrd {
	pub group: String,
	pub plural: String,
	pub kind: String,
	pub namespaced: bool,
	/// Version names with their `served` flag.
	pub versions: Vec<(String, bool)>,
	pub uid: String,
	pub terminating: bool,
}

impl MockCrd {
	pub fn namespaced(group: &str, version: &str, plural: &str, kind: &str) -> Self {
		Self::new(group, version, plural, kind, true)
	}

	pub fn cluster_scoped(group: &str, version: &str, plural: &str, kind: &str) -> Self {
		Self::new(group, version, plural, kind, false)
	}

	fn new(group: &str, version: &str, plural: &str, kind: &str, namespaced: bool) -> Self {
		Self {
			group: group.to_string(),
			plural: plural.to_string(),
			kind: kind.to_string(),
			namespaced,
			versions: vec![(version.to_string(), true)],
			uid: format!("{plural}.{group}-uid"),
			terminating: false,
		}
	}

	pub fn uid(mut self, uid: &str) -> Self {
		self.uid = uid.to_string();
		self
	}

	/// Add a version, or change whether an existing one is served.
	pub fn version(mut self, name: &str, served: bool) -> Self {
		match self.versions.iter_mut().find(|(v, _)| v == name) {
			Some(existing) => existing.1 = served,
			None => self.versions.push((name.to_string(), served)),
		}
		self
	}

	/// Mark as deleted with a finalizer still pending.
	pub fn terminating(mut self) -> Self {
		self.terminating = true;
		self
	}

	/// Object name, `<plural>.<group>`.
	pub fn name(&self) -> String {
		format!("{}.{}", self.plural, self.group)
	}

	/// Resources this definition serves, keyed by group-version.
	pub fn served_resources(&self) -> impl Iterator<Item = (String, [MockApiResource; 2])> + '_ {
		self.versions
			.iter()
			.filter(|(_, served)| *served)
			.map(|(version, _)| {
				(
					format!("{}/{}", self.group, version),
					[
						MockApiResource::subresource(
							&self.plural,
							&self.kind,
							self.namespaced,
							&RESOURCE_VERBS,
						),
						MockApiResource::subresource(
							&format!("{}/status", self.plural),
							&self.kind,
							self.namespaced,
							&STATUS_VERBS,
						),
					],
				)
			})
	}

	/// The definition as the API server would return it.
	pub fn manifest(&self) -> serde_json::Value {
		let mut metadata = serde_json::json!({
			"name": self.name(),
			"uid": self.uid,
			"resourceVersion": "1",
		});
		if self.terminating {
			metadata["deletionTimestamp"] = "2024-01-01T00:00:00Z".into();
			metadata["finalizers"] = serde_json::json!(["customresourcecleanup.apiextensions.k8s.io"]);
		}

		let versions: Vec<_> = self
			.versions
			.iter()
			.enumerate()
			.map(|(i, (name, served))| {
				serde_json::json!({
					"name": name,
					"served": served,
					"storage": i == 0,
					"schema": {
						"openAPIV3Schema": {
							"type": "object",
							"x-kubernetes-preserve-unknown-fields": true
						}
					},
					"subresources": {"status": {}}
				})
			})
			.collect();

		serde_json::json!({
			"apiVersion": "apiextensions.k8s.io/v1",
			"kind": "CustomResourceDefinition",
			"metadata": metadata,
			"spec": {
				"group": self.group,
				"names": {
					"plural": self.plural,
					"singular": self.kind.to_lowercase(),
					"kind": self.kind,
					"listKind": format!("{}List", self.kind),
				},
				"scope": if self.namespaced { "Namespaced" } else { "Cluster" },
				"versions": versions,
			}
		})
	}
}
