//! Discovery snapshot data model.
//!
//! A [`Snapshot`] maps a group-version key (`group/version`, or just `version`
//! for the core group) to the resource types the API server serves under it.
//! Equality is defined over sets: neither the order of resources within a
//! group-version nor the order of verbs within a resource is significant.

use std::collections::{btree_map, BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIResource, APIResourceList};
use serde::Serialize;

/// Build a group-version key from an API group and version.
///
/// The core group has an empty name and is keyed by version alone.
pub fn group_version_key(group: &str, version: &str) -> String {
	if group.is_empty() {
		version.to_string()
	} else {
		format!("{group}/{version}")
	}
}

/// Metadata describing a single served resource type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ApiResourceDescriptor {
	/// Plural resource name, e.g. `deployments` or `pods/log` for subresources.
	pub name: String,
	pub namespaced: bool,
	pub kind: String,
	/// Supported verbs. Stored as a set, so order never affects equality.
	pub verbs: BTreeSet<String>,
}

impl ApiResourceDescriptor {
	pub fn new<V>(name: &str, namespaced: bool, kind: &str, verbs: V) -> Self
	where
		V: IntoIterator,
		V::Item: Into<String>,
	{
		Self {
			name: name.to_string(),
			namespaced,
			kind: kind.to_string(),
			verbs: verbs.into_iter().map(Into::into).collect(),
		}
	}

	/// Whether this descriptor is a subresource (`parent/sub`).
	pub fn is_subresource(&self) -> bool {
		self.name.contains('/')
	}

	/// Whether this descriptor was contributed by the resource `plural`,
	/// either as the resource itself or as one of its subresources.
	pub(crate) fn belongs_to(&self, plural: &str) -> bool {
		match self.name.split_once('/') {
			Some((parent, _)) => parent == plural,
			None => self.name == plural,
		}
	}
}

impl From<&APIResource> for ApiResourceDescriptor {
	fn from(resource: &APIResource) -> Self {
		Self {
			name: resource.name.clone(),
			namespaced: resource.namespaced,
			kind: resource.kind.clone(),
			verbs: resource.verbs.iter().cloned().collect(),
		}
	}
}

/// Point-in-time view of every served resource type, keyed by group-version.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Snapshot {
	group_versions: BTreeMap<String, Vec<ApiResourceDescriptor>>,
}

impl Snapshot {
	pub fn new() -> Self {
		Self::default()
	}

	/// Build the resource list for one group-version from a discovery document.
	pub fn descriptors_from_list(list: &APIResourceList) -> Vec<ApiResourceDescriptor> {
		list.resources.iter().map(ApiResourceDescriptor::from).collect()
	}

	/// Set the resources served under `group_version`, returning the previous list.
	pub fn insert(
		&mut self,
		group_version: impl Into<String>,
		resources: Vec<ApiResourceDescriptor>,
	) -> Option<Vec<ApiResourceDescriptor>> {
		self.group_versions.insert(group_version.into(), resources)
	}

	pub fn remove(&mut self, group_version: &str) -> Option<Vec<ApiResourceDescriptor>> {
		self.group_versions.remove(group_version)
	}

	pub fn get(&self, group_version: &str) -> Option<&[ApiResourceDescriptor]> {
		self.group_versions.get(group_version).map(Vec::as_slice)
	}

	pub fn get_mut(&mut self, group_version: &str) -> Option<&mut Vec<ApiResourceDescriptor>> {
		self.group_versions.get_mut(group_version)
	}

	pub fn contains(&self, group_version: &str) -> bool {
		self.group_versions.contains_key(group_version)
	}

	/// Find a resource by group-version and plural name.
	pub fn resource(&self, group_version: &str, name: &str) -> Option<&ApiResourceDescriptor> {
		self.get(group_version)?.iter().find(|r| r.name == name)
	}

	pub fn group_versions(&self) -> impl Iterator<Item = &str> {
		self.group_versions.keys().map(String::as_str)
	}

	pub fn iter(&self) -> btree_map::Iter<'_, String, Vec<ApiResourceDescriptor>> {
		self.group_versions.iter()
	}

	/// Number of group-versions.
	pub fn len(&self) -> usize {
		self.group_versions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.group_versions.is_empty()
	}

	/// Total number of resource descriptors across all group-versions.
	pub fn resource_count(&self) -> usize {
		self.group_versions.values().map(Vec::len).sum()
	}

	/// Remove every descriptor contributed by resource `plural` from
	/// `group_version`, dropping the key when nothing is left under it.
	///
	/// Returns `true` if anything was removed.
	pub(crate) fn remove_resource(&mut self, group_version: &str, plural: &str) -> bool {
		let Some(resources) = self.group_versions.get_mut(group_version) else {
			return false;
		};
		let before = resources.len();
		resources.retain(|r| !r.belongs_to(plural));
		let removed = resources.len() != before;
		if resources.is_empty() {
			self.group_versions.remove(group_version);
		}
		removed
	}
}

impl PartialEq for Snapshot {
	fn eq(&self, other: &Self) -> bool {
		if self.group_versions.len() != other.group_versions.len() {
			return false;
		}
		self.group_versions.iter().all(|(key, ours)| {
			other
				.group_versions
				.get(key)
				.is_some_and(|theirs| same_resources(ours, theirs))
		})
	}
}

impl Eq for Snapshot {}

/// Compare two resource lists as sets of descriptors.
fn same_resources(a: &[ApiResourceDescriptor], b: &[ApiResourceDescriptor]) -> bool {
	a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

impl FromIterator<(String, Vec<ApiResourceDescriptor>)> for Snapshot {
	fn from_iter<T: IntoIterator<Item = (String, Vec<ApiResourceDescriptor>)>>(iter: T) -> Self {
		Self {
			group_versions: iter.into_iter().collect(),
		}
	}
}

impl IntoIterator for Snapshot {
	type Item = (String, Vec<ApiResourceDescriptor>);
	type IntoIter = btree_map::IntoIter<String, Vec<ApiResourceDescriptor>>;

	fn into_iter(self) -> Self::IntoIter {
		self.group_versions.into_iter()
	}
}

impl<'a> IntoIterator for &'a Snapshot {
	type Item = (&'a String, &'a Vec<ApiResourceDescriptor>);
	type IntoIter = btree_map::Iter<'a, String, Vec<ApiResourceDescriptor>>;

	fn into_iter(self) -> Self::IntoIter {
		self.group_versions.iter()
	}
}
