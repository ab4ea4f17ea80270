//! Periodic reconciliation against the discovery endpoint.
//!
//! Two independent loops run next to the watch:
//! - the short-interval resync queries discovery directly and replaces the
//!   snapshot if it differs, covering dropped or missed watch events;
//! - the long-interval full resync does the same and also refreshes the
//!   identity ledger from a fresh listing of definitions.
//!
//! Only the long-interval loop refreshes the ledger.

use std::{fmt, sync::Arc, time::Duration};

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{error::DiscoveryError, tracker::Shared};

/// Which path triggered a full collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cycle {
	/// Short-interval timer.
	Resync,
	/// Long-interval timer; also refreshes the ledger.
	FullResync,
	/// The definition watch finished (re)listing.
	Relist,
}

impl fmt::Display for Cycle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Cycle::Resync => "resync",
			Cycle::FullResync => "full-resync",
			Cycle::Relist => "relist",
		})
	}
}

impl Shared {
	pub(crate) async fn run_resync_loop(self: Arc<Self>, shutdown: CancellationToken) {
		let period = self.config.resync_interval;
		// First tick fires immediately so the tracker becomes ready quickly.
		self.run_timer(Cycle::Resync, Instant::now(), period, shutdown)
			.await;
	}

	pub(crate) async fn run_full_resync_loop(self: Arc<Self>, shutdown: CancellationToken) {
		let period = self.config.full_resync_interval;
		self.run_timer(Cycle::FullResync, Instant::now() + period, period, shutdown)
			.await;
	}

	async fn run_timer(
		&self,
		cycle: Cycle,
		start: Instant,
		period: Duration,
		shutdown: CancellationToken,
	) {
		let mut ticker = interval_at(start, period);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				() = shutdown.cancelled() => break,
				_ = ticker.tick() => {}
			}

			tokio::select! {
				() = shutdown.cancelled() => break,
				result = self.run_cycle(cycle) => {
					if let Err(e) = result {
						warn!(%cycle, error = %e, "discovery cycle failed, retrying on next tick");
					}
				}
			}
		}
		debug!(%cycle, "timer loop stopped");
	}

	/// Run one full collection, replacing the snapshot if it differs.
	///
	/// Returns whether subscribers were signalled. On error the stored
	/// snapshot and the ledger are left untouched.
	#[instrument(skip_all, fields(%cycle))]
	pub(crate) async fn run_cycle(&self, cycle: Cycle) -> Result<bool, DiscoveryError> {
		let previous = self.store.read().ok();
		let live_uids = match cycle {
			Cycle::FullResync => Some(self.discovery.live_definition_uids().await?),
			Cycle::Resync | Cycle::Relist => None,
		};
		let snapshot = self.discovery.collect(previous.as_ref()).await?;

		let changed = self.store.replace(snapshot);
		let refreshed = live_uids.map(|uids| self.ledger().refresh(uids.iter().map(String::as_str)));

		if let Some(refresh) = &refreshed {
			if !refresh.is_empty() {
				info!(
					added = refresh.added.len(),
					removed = refresh.removed.len(),
					"definition identities changed"
				);
			}
		}

		let identities_changed = refreshed.is_some_and(|r| !r.is_empty());
		if changed || identities_changed {
			info!(snapshot_changed = changed, "API resources changed");
			self.notifier.notify();
			Ok(true)
		} else {
			debug!("API resources unchanged");
			Ok(false)
		}
	}
}
