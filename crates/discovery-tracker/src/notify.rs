//! Best-effort change notification.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Callback invoked after a collection cycle changed the snapshot.
pub type SignalFunc = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

struct Subscriber {
	id: usize,
	func: SignalFunc,
	/// Single permit: at most one delivery in flight per subscriber.
	in_flight: Arc<Semaphore>,
}

/// Registered change callbacks.
///
/// Each callback runs on the blocking pool so a slow callback never stalls
/// the collection cycle. A callback still busy with an earlier signal does not
/// queue another one: the signal for that cycle is dropped for it.
#[derive(Default)]
pub struct Notifier {
	subscribers: RwLock<Vec<Arc<Subscriber>>>,
}

impl std::fmt::Debug for Notifier {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Notifier")
			.field("subscribers", &self.len())
			.finish()
	}
}

impl Notifier {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add(&self, func: SignalFunc) {
		let mut subscribers = self
			.subscribers
			.write()
			.unwrap_or_else(PoisonError::into_inner);
		let id = subscribers.len();
		subscribers.push(Arc::new(Subscriber {
			id,
			func,
			in_flight: Arc::new(Semaphore::new(1)),
		}));
	}

	pub fn len(&self) -> usize {
		self.subscribers
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Signal every subscriber once.
	///
	/// Must be called from within a tokio runtime. Returns the number of
	/// subscribers the signal was handed to.
	pub fn notify(&self) -> usize {
		let subscribers = self
			.subscribers
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone();

		let mut delivered = 0;
		for subscriber in subscribers {
			let Ok(permit) = Arc::clone(&subscriber.in_flight).try_acquire_owned() else {
				debug!(
					subscriber = subscriber.id,
					"previous signal still running, dropping"
				);
				continue;
			};
			delivered += 1;
			tokio::task::spawn_blocking(move || {
				let _permit = permit;
				if let Err(e) = (subscriber.func)() {
					warn!(subscriber = subscriber.id, error = %e, "signal func failed");
				}
			});
		}
		delivered
	}
}

#[cfg(test)]
mod tests {
	use std::{
		sync::{
			atomic::{AtomicUsize, Ordering},
			mpsc,
		},
		time::Duration,
	};

	use super::*;

	fn counter() -> (Arc<AtomicUsize>, SignalFunc) {
		let count = Arc::new(AtomicUsize::new(0));
		let inner = Arc::clone(&count);
		let func: SignalFunc = Box::new(move || {
			inner.fetch_add(1, Ordering::SeqCst);
			Ok(())
		});
		(count, func)
	}

	async fn wait_for(count: &AtomicUsize, expected: usize) {
		for _ in 0..200 {
			if count.load(Ordering::SeqCst) >= expected {
				return;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		panic!(
			"expected {expected} signals, got {}",
			count.load(Ordering::SeqCst)
		);
	}

	#[tokio::test]
	async fn test_notify_without_subscribers() {
		let notifier = Notifier::new();
		assert!(notifier.is_empty());
		assert_eq!(notifier.notify(), 0);
	}

	#[tokio::test]
	async fn test_notify_reaches_every_subscriber() {
		let notifier = Notifier::new();
		let (first, func) = counter();
		notifier.add(func);
		let (second, func) = counter();
		notifier.add(func);

		assert_eq!(notifier.notify(), 2);
		wait_for(&first, 1).await;
		wait_for(&second, 1).await;
	}

	#[tokio::test]
	async fn test_failing_subscriber_does_not_block_others() {
		let notifier = Notifier::new();
		notifier.add(Box::new(|| -> anyhow::Result<()> { anyhow::bail!("boom") }));
		let (count, func) = counter();
		notifier.add(func);

		assert_eq!(notifier.notify(), 2);
		wait_for(&count, 1).await;

		// The failing subscriber released its slot and can be signalled again.
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(notifier.notify(), 2);
		wait_for(&count, 2).await;
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn test_busy_subscriber_drops_signal() {
		let notifier = Notifier::new();
		let (release_tx, release_rx) = mpsc::channel::<()>();
		let release_rx = std::sync::Mutex::new(release_rx);
		let calls = Arc::new(AtomicUsize::new(0));
		let inner = Arc::clone(&calls);
		notifier.add(Box::new(move || {
			inner.fetch_add(1, Ordering::SeqCst);
			let _ = release_rx.lock().unwrap().recv();
			Ok(())
		}));

		assert_eq!(notifier.notify(), 1);
		wait_for(&calls, 1).await;

		// Still blocked on the first signal.
		assert_eq!(notifier.notify(), 0);

		release_tx.send(()).unwrap();
		tokio::time::sleep(Duration::from_millis(50)).await;
		drop(release_tx);
		assert_eq!(notifier.notify(), 1);
		wait_for(&calls, 2).await;
	}
}
