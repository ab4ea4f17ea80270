//! Event-driven collection from the CustomResourceDefinition watch.
//!
//! Added and Modified events for a definition that carries a deletion
//! timestamp are skipped: while finalizers run, the API server keeps serving
//! the definition's resources and the update churn carries no new type
//! information. Deleted events are always processed, so the resources go
//! away exactly once the definition is really gone.

use std::{collections::VecDeque, sync::Arc};

use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::runtime::watcher;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
	reconciler::Cycle,
	snapshot::{group_version_key, ApiResourceDescriptor},
	tracker::{DefinitionEvents, Shared},
};

/// Lifecycle event kinds for a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrdEventKind {
	Added,
	Modified,
	Deleted,
}

/// Whether the definition is marked for deletion.
pub fn is_terminating(crd: &CustomResourceDefinition) -> bool {
	crd.metadata.deletion_timestamp.is_some()
}

/// Whether an event must not trigger recomputation.
pub fn should_skip(kind: CrdEventKind, crd: &CustomResourceDefinition) -> bool {
	match kind {
		CrdEventKind::Added | CrdEventKind::Modified => is_terminating(crd),
		CrdEventKind::Deleted => false,
	}
}

/// Group-version keys of every version a definition declares, with its
/// `served` flag.
fn definition_group_versions(crd: &CustomResourceDefinition) -> Vec<(String, bool)> {
	crd.spec
		.versions
		.iter()
		.map(|v| (group_version_key(&crd.spec.group, &v.name), v.served))
		.collect()
}

fn definition_name(crd: &CustomResourceDefinition) -> &str {
	crd.metadata.name.as_deref().unwrap_or("<unnamed>")
}

/// Recomputed state of one group-version.
enum GroupVersionUpdate {
	/// The server serves these resources under the key.
	Served(String, Vec<ApiResourceDescriptor>),
	/// The server does not serve the key at all.
	Gone(String),
	/// This definition no longer serves the key; others may.
	Withdrawn(String),
}

impl Shared {
	pub(crate) async fn run_event_loop(
		self: Arc<Self>,
		pending: Vec<watcher::Event<CustomResourceDefinition>>,
		mut events: DefinitionEvents,
		shutdown: CancellationToken,
	) {
		let mut next: VecDeque<_> = pending.into();
		'events: loop {
			while let Some(event) = next.pop_front() {
				tokio::select! {
					() = shutdown.cancelled() => break 'events,
					() = self.handle_watch_event(event) => {}
				}
			}

			let item = tokio::select! {
				() = shutdown.cancelled() => break,
				item = events.next() => item,
			};
			match item {
				Some(Ok(event)) => next.push_back(event),
				Some(Err(e)) => warn!(error = %e, "definition watch failed, retrying"),
				None => {
					warn!("definition watch stream ended");
					break;
				}
			}
		}
		debug!("event loop stopped");
	}

	pub(crate) async fn handle_watch_event(&self, event: watcher::Event<CustomResourceDefinition>) {
		match event {
			watcher::Event::Init => debug!("listing definitions"),
			watcher::Event::InitApply(crd) | watcher::Event::Apply(crd) => {
				let kind = self.observe_definition(&crd);
				self.handle_definition_event(kind, &crd).await;
			}
			watcher::Event::InitDone => {
				if let Err(e) = self.run_cycle(Cycle::Relist).await {
					warn!(error = %e, "discovery after definition listing failed");
				}
			}
			watcher::Event::Delete(crd) => {
				self.handle_definition_event(CrdEventKind::Deleted, &crd)
					.await;
			}
		}
	}

	/// Record the definition's UID, classifying the event as Added for a
	/// previously unseen UID and Modified otherwise.
	pub(crate) fn observe_definition(&self, crd: &CustomResourceDefinition) -> CrdEventKind {
		let Some(uid) = crd.metadata.uid.as_deref() else {
			return CrdEventKind::Modified;
		};
		if self.ledger().add(uid) {
			CrdEventKind::Added
		} else {
			CrdEventKind::Modified
		}
	}

	/// Apply one definition event to the snapshot, returning whether it changed.
	pub(crate) async fn handle_definition_event(
		&self,
		kind: CrdEventKind,
		crd: &CustomResourceDefinition,
	) -> bool {
		let name = definition_name(crd);
		if should_skip(kind, crd) {
			debug!(definition = name, ?kind, "skipping terminating definition");
			return false;
		}

		let changed = match kind {
			CrdEventKind::Deleted => self.remove_definition(crd),
			CrdEventKind::Added | CrdEventKind::Modified => {
				let updates = self.recompute(crd).await;
				self.store.update(|snapshot| {
					for update in updates {
						match update {
							GroupVersionUpdate::Served(key, resources) => {
								snapshot.insert(key, resources);
							}
							GroupVersionUpdate::Gone(key) => {
								snapshot.remove(&key);
							}
							GroupVersionUpdate::Withdrawn(key) => {
								snapshot.remove_resource(&key, &crd.spec.names.plural);
							}
						}
					}
				})
			}
		};

		if changed {
			info!(definition = name, ?kind, "API resources changed");
			self.notifier.notify();
		} else {
			debug!(definition = name, ?kind, "API resources unchanged");
		}
		changed
	}

	/// Query discovery for every version of `crd`. Nothing is locked while
	/// the queries run.
	async fn recompute(&self, crd: &CustomResourceDefinition) -> Vec<GroupVersionUpdate> {
		let mut updates = Vec::new();
		for (key, served) in definition_group_versions(crd) {
			if !served {
				updates.push(GroupVersionUpdate::Withdrawn(key));
				continue;
			}
			match self.discovery.group_version(&key).await {
				Ok(Some(resources)) => updates.push(GroupVersionUpdate::Served(key, resources)),
				Ok(None) => updates.push(GroupVersionUpdate::Gone(key)),
				Err(e) => {
					warn!(group_version = %key, error = %e, "failed to recompute group version");
				}
			}
		}
		updates
	}

	/// Drop everything the deleted definition contributed.
	fn remove_definition(&self, crd: &CustomResourceDefinition) -> bool {
		let plural = &crd.spec.names.plural;
		self.store.update(|snapshot| {
			for (key, _) in definition_group_versions(crd) {
				snapshot.remove_resource(&key, plural);
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use k8s_mock::{HttpMockK8sServer, MockCrd};

	use super::*;
	use crate::{
		client::connect_with_kubeconfig,
		config::{ClusterConfig, TrackerConfig},
		Tracker,
	};

	fn widget_crd() -> MockCrd {
		MockCrd::namespaced("example.com", "v1", "widgets", "Widget").uid("widget-uid-1")
	}

	fn to_definition(crd: &MockCrd) -> CustomResourceDefinition {
		serde_json::from_value(crd.manifest()).unwrap()
	}

	fn terminating_widget() -> CustomResourceDefinition {
		to_definition(&widget_crd().terminating())
	}

	async fn ready_tracker(server: &k8s_mock::RunningHttpMockK8sServer) -> Tracker {
		let client = connect_with_kubeconfig(&ClusterConfig::default(), server.kubeconfig())
			.await
			.unwrap();
		let tracker = Tracker::new(client, TrackerConfig::default());
		tracker.shared().run_cycle(Cycle::Resync).await.unwrap();
		tracker
	}

	#[test]
	fn test_should_skip_live_definition() {
		let crd = to_definition(&widget_crd());
		assert!(!should_skip(CrdEventKind::Added, &crd));
		assert!(!should_skip(CrdEventKind::Modified, &crd));
		assert!(!should_skip(CrdEventKind::Deleted, &crd));
	}

	#[test]
	fn test_should_skip_terminating_definition() {
		let crd = terminating_widget();
		assert!(is_terminating(&crd));
		assert!(should_skip(CrdEventKind::Added, &crd));
		assert!(should_skip(CrdEventKind::Modified, &crd));
		assert!(!should_skip(CrdEventKind::Deleted, &crd));
	}

	#[test]
	fn test_definition_group_versions() {
		let crd = to_definition(
			&MockCrd::namespaced("example.com", "v1", "widgets", "Widget")
				.version("v2", true)
				.version("v1alpha1", false),
		);
		assert_eq!(
			definition_group_versions(&crd),
			vec![
				("example.com/v1".to_string(), true),
				("example.com/v2".to_string(), true),
				("example.com/v1alpha1".to_string(), false),
			]
		);
	}

	#[tokio::test]
	async fn test_observe_definition_classifies_by_uid() {
		let server = HttpMockK8sServer::builder().build().start().await;
		let tracker = ready_tracker(&server).await;
		let crd = to_definition(&widget_crd());

		assert_eq!(tracker.shared().observe_definition(&crd), CrdEventKind::Added);
		assert_eq!(tracker.shared().observe_definition(&crd), CrdEventKind::Modified);
		assert_eq!(tracker.known_definitions(), 1);
	}

	#[tokio::test]
	async fn test_added_definition_is_merged() {
		let server = HttpMockK8sServer::builder().build().start().await;
		let tracker = ready_tracker(&server).await;
		assert!(!tracker.api_resources().unwrap().contains("example.com/v1"));

		server.apply_crd(widget_crd());
		let crd = to_definition(&widget_crd());
		assert!(
			tracker
				.shared()
				.handle_definition_event(CrdEventKind::Added, &crd)
				.await
		);

		let snapshot = tracker.api_resources().unwrap();
		let widgets = snapshot.resource("example.com/v1", "widgets").unwrap();
		assert_eq!(widgets.kind, "Widget");
		assert!(widgets.namespaced);
	}

	#[tokio::test]
	async fn test_modified_live_definition_keeps_resources() {
		let server = HttpMockK8sServer::builder()
			.crds(vec![widget_crd()])
			.build()
			.start()
			.await;
		let tracker = ready_tracker(&server).await;
		let crd = to_definition(&widget_crd());

		let changed = tracker
			.shared()
			.handle_definition_event(CrdEventKind::Modified, &crd)
			.await;

		assert!(!changed);
		assert!(tracker
			.api_resources()
			.unwrap()
			.resource("example.com/v1", "widgets")
			.is_some());
	}

	#[tokio::test]
	async fn test_modified_terminating_definition_is_skipped() {
		let server = HttpMockK8sServer::builder()
			.crds(vec![widget_crd()])
			.build()
			.start()
			.await;
		let tracker = ready_tracker(&server).await;
		let before = tracker.api_resources().unwrap();

		// Even if discovery already dropped the group, a skipped event must
		// not touch the snapshot.
		server.remove_crd("widgets.example.com");
		let crd = terminating_widget();
		let changed = tracker
			.shared()
			.handle_definition_event(CrdEventKind::Modified, &crd)
			.await;

		assert!(!changed);
		assert_eq!(tracker.api_resources().unwrap(), before);
	}

	#[tokio::test]
	async fn test_deleted_sole_provider_removes_group_version() {
		let server = HttpMockK8sServer::builder()
			.crds(vec![widget_crd()])
			.build()
			.start()
			.await;
		let tracker = ready_tracker(&server).await;
		assert!(tracker.api_resources().unwrap().contains("example.com/v1"));

		let crd = terminating_widget();
		let changed = tracker
			.shared()
			.handle_definition_event(CrdEventKind::Deleted, &crd)
			.await;

		assert!(changed);
		assert!(!tracker.api_resources().unwrap().contains("example.com/v1"));
	}

	#[tokio::test]
	async fn test_deleted_shared_group_version_keeps_other_resources() {
		let gadgets = MockCrd::cluster_scoped("example.com", "v1", "gadgets", "Gadget")
			.uid("gadget-uid-1");
		let server = HttpMockK8sServer::builder()
			.crds(vec![widget_crd(), gadgets])
			.build()
			.start()
			.await;
		let tracker = ready_tracker(&server).await;

		let crd = to_definition(&widget_crd());
		tracker
			.shared()
			.handle_definition_event(CrdEventKind::Deleted, &crd)
			.await;

		let snapshot = tracker.api_resources().unwrap();
		assert!(snapshot.resource("example.com/v1", "widgets").is_none());
		assert!(snapshot.resource("example.com/v1", "widgets/status").is_none());
		let gadgets = snapshot.resource("example.com/v1", "gadgets").unwrap();
		assert!(!gadgets.namespaced);
	}

	#[tokio::test]
	async fn test_unserved_version_is_withdrawn() {
		let server = HttpMockK8sServer::builder()
			.crds(vec![widget_crd().version("v2", true)])
			.build()
			.start()
			.await;
		let tracker = ready_tracker(&server).await;
		assert!(tracker.api_resources().unwrap().contains("example.com/v2"));

		let updated = widget_crd().version("v2", false);
		server.apply_crd(updated.clone());
		tracker
			.shared()
			.handle_definition_event(CrdEventKind::Modified, &to_definition(&updated))
			.await;

		let snapshot = tracker.api_resources().unwrap();
		assert!(snapshot.contains("example.com/v1"));
		assert!(!snapshot.contains("example.com/v2"));
	}

	#[tokio::test]
	async fn test_events_before_first_collection_are_not_merged() {
		let server = HttpMockK8sServer::builder()
			.crds(vec![widget_crd()])
			.build()
			.start()
			.await;
		let client = connect_with_kubeconfig(&ClusterConfig::default(), server.kubeconfig())
			.await
			.unwrap();
		let tracker = Tracker::new(client, TrackerConfig::default());

		let crd = to_definition(&widget_crd());
		let changed = tracker
			.shared()
			.handle_definition_event(CrdEventKind::Added, &crd)
			.await;

		assert!(!changed);
		assert!(!tracker.is_ready());
	}

	#[tokio::test]
	async fn test_init_done_runs_full_collection() {
		let server = HttpMockK8sServer::builder()
			.crds(vec![widget_crd()])
			.build()
			.start()
			.await;
		let client = connect_with_kubeconfig(&ClusterConfig::default(), server.kubeconfig())
			.await
			.unwrap();
		let tracker = Tracker::new(client, TrackerConfig::default());

		tracker
			.shared()
			.handle_watch_event(watcher::Event::InitApply(to_definition(&widget_crd())))
			.await;
		assert!(!tracker.is_ready());
		assert_eq!(tracker.known_definitions(), 1);

		tracker
			.shared()
			.handle_watch_event(watcher::Event::InitDone)
			.await;
		assert!(tracker.is_ready());
		assert!(tracker.api_resources().unwrap().contains("example.com/v1"));
	}
}
