//! Tracks which API resource types a Kubernetes cluster currently serves.
//!
//! A [`Tracker`] keeps a [`Snapshot`] of the cluster's discovery data without
//! every caller hitting the discovery endpoint. The snapshot is kept current
//! by a CustomResourceDefinition watch plus two periodic full queries, and
//! subscribers registered with [`Tracker::add_signal_func`] are signalled
//! whenever it changes.
//!
//! ```no_run
//! use discovery_tracker::{ClusterConfig, Tracker, TrackerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), discovery_tracker::TrackerError> {
//! let tracker = Tracker::connect(&ClusterConfig::default(), TrackerConfig::default()).await?;
//! tracker.add_signal_func(|| {
//! 	tracing::info!("API resources changed");
//! 	Ok(())
//! });
//!
//! let shutdown = CancellationToken::new();
//! let runner = tracker.clone();
//! tokio::spawn(async move { runner.start(shutdown).await });
//!
//! // Fails with `TrackerError::NotStarted` until the first collection completes.
//! let _snapshot = tracker.api_resources();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod collector;
pub mod config;
pub mod discovery;
pub mod error;
pub mod ledger;
pub mod notify;
mod reconciler;
pub mod snapshot;
pub mod store;
mod tracker;

pub use config::{ClusterConfig, TrackerConfig};
pub use error::{DiscoveryError, TrackerError};
pub use snapshot::{group_version_key, ApiResourceDescriptor, Snapshot};
pub use tracker::Tracker;
