//! The public tracker handle and its lifecycle.

use std::sync::{Arc, Mutex, PoisonError};

use futures::{stream::BoxStream, StreamExt};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
	runtime::{watcher, WatchStreamExt},
	Api, Client,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
	client,
	config::{ClusterConfig, TrackerConfig},
	discovery::DiscoveryClient,
	error::TrackerError,
	ledger::IdentityLedger,
	notify::Notifier,
	snapshot::Snapshot,
	store::SnapshotStore,
};

pub(crate) type DefinitionEvents =
	BoxStream<'static, Result<watcher::Event<CustomResourceDefinition>, watcher::Error>>;

/// State shared by the watch task, both timer tasks and readers.
pub(crate) struct Shared {
	pub(crate) store: SnapshotStore,
	pub(crate) ledger: Mutex<IdentityLedger>,
	pub(crate) notifier: Notifier,
	pub(crate) discovery: DiscoveryClient,
	pub(crate) config: TrackerConfig,
}

impl Shared {
	pub(crate) fn ledger(&self) -> std::sync::MutexGuard<'_, IdentityLedger> {
		self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

/// Keeps an up-to-date view of the API resource types a cluster serves.
///
/// The view is fed by three writers: a CustomResourceDefinition watch, a
/// short-interval full discovery query and a long-interval full rescan that
/// also refreshes the set of known definition UIDs. All of them converge on
/// the same snapshot, so it does not matter which one wrote last.
///
/// `Tracker` is a cheap handle; clone it to read from other tasks while
/// [`start`](Self::start) runs.
#[derive(Clone)]
pub struct Tracker {
	shared: Arc<Shared>,
}

impl std::fmt::Debug for Tracker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Tracker")
			.field("config", &self.shared.config)
			.field("ready", &self.is_ready())
			.field("notifier", &self.shared.notifier)
			.finish_non_exhaustive()
	}
}

impl Tracker {
	/// Create an unstarted tracker.
	pub fn new(client: Client, config: TrackerConfig) -> Self {
		let discovery = DiscoveryClient::new(client, config.max_concurrent_discoveries);
		Self {
			shared: Arc::new(Shared {
				store: SnapshotStore::new(),
				ledger: Mutex::new(IdentityLedger::new()),
				notifier: Notifier::new(),
				discovery,
				config,
			}),
		}
	}

	/// Connect to the cluster selected by `cluster` and create an unstarted tracker.
	pub async fn connect(
		cluster: &ClusterConfig,
		config: TrackerConfig,
	) -> Result<Self, TrackerError> {
		config.validate()?;
		let client = client::connect(cluster).await?;
		Ok(Self::new(client, config))
	}

	/// Run the tracker until `shutdown` is cancelled.
	///
	/// Fails only if the configuration is invalid or the definition watch
	/// cannot be established. Once running, query and watch failures are
	/// logged and retried on the next tick or reconnect.
	#[instrument(skip_all)]
	pub async fn start(&self, shutdown: CancellationToken) -> Result<(), TrackerError> {
		self.shared.config.validate()?;

		let api: Api<CustomResourceDefinition> =
			Api::all(self.shared.discovery.client().clone());
		let mut events: DefinitionEvents = watcher(api, watcher::Config::default())
			.default_backoff()
			.boxed();

		let pending = tokio::select! {
			() = shutdown.cancelled() => return Ok(()),
			pending = establish_watch(&mut events) => pending?,
		};
		let Some(pending) = pending else {
			warn!("definition watch ended before listing definitions");
			return Ok(());
		};
		info!("definition watch established");

		let mut tasks = JoinSet::new();
		tasks.spawn(Arc::clone(&self.shared).run_resync_loop(shutdown.clone()));
		tasks.spawn(Arc::clone(&self.shared).run_full_resync_loop(shutdown.clone()));
		tasks.spawn(Arc::clone(&self.shared).run_event_loop(pending, events, shutdown.clone()));

		while let Some(joined) = tasks.join_next().await {
			if let Err(e) = joined {
				error!(error = %e, "tracker task failed");
			}
		}
		debug!("tracker stopped");
		Ok(())
	}

	/// Get a copy of the current snapshot.
	///
	/// Fails with [`TrackerError::NotStarted`] until the first full collection
	/// has completed.
	pub fn api_resources(&self) -> Result<Snapshot, TrackerError> {
		self.shared.store.read()
	}

	/// Register a callback fired whenever a collection cycle changes the snapshot.
	///
	/// May be called before or after [`start`](Self::start). Delivery is
	/// best-effort: a callback that is still running when the next change
	/// arrives misses that signal, and a failing callback is only logged.
	pub fn add_signal_func<F>(&self, func: F)
	where
		F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
	{
		self.shared.notifier.add(Box::new(func));
	}

	/// Whether the first full collection has completed.
	pub fn is_ready(&self) -> bool {
		self.shared.store.is_populated()
	}

	/// Number of CustomResourceDefinition UIDs currently tracked.
	pub fn known_definitions(&self) -> usize {
		self.shared.ledger().count()
	}

	#[cfg(test)]
	pub(crate) fn shared(&self) -> &Shared {
		&self.shared
	}
}

/// Pull events until the first one that required a response from the server.
///
/// The watcher yields `Init` before issuing its initial list request, so that
/// event alone says nothing about the watch being usable. Everything consumed
/// here is returned for replay. `None` means the stream ended first.
async fn establish_watch(
	events: &mut DefinitionEvents,
) -> Result<Option<Vec<watcher::Event<CustomResourceDefinition>>>, TrackerError> {
	let mut pending = Vec::new();
	while let Some(item) = events.next().await {
		let event = item.map_err(TrackerError::Watch)?;
		let listed = !matches!(event, watcher::Event::Init);
		pending.push(event);
		if listed {
			return Ok(Some(pending));
		}
	}
	Ok(None)
}
