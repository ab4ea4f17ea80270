//! Shared storage for the current discovery snapshot.

use std::sync::{PoisonError, RwLock};

use crate::{error::TrackerError, snapshot::Snapshot};

/// Holds the most recent snapshot.
///
/// The store starts unpopulated: until the first full collection calls
/// [`replace`](Self::replace), [`read`](Self::read) fails with
/// [`TrackerError::NotStarted`] instead of returning an empty snapshot.
/// Readers always receive an owned copy, so nothing they do can reach the
/// stored value.
#[derive(Debug, Default)]
pub struct SnapshotStore {
	current: RwLock<Option<Snapshot>>,
}

impl SnapshotStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Swap in `snapshot`, returning `true` if it differs from the stored one.
	///
	/// The first replace always counts as a change.
	pub fn replace(&self, snapshot: Snapshot) -> bool {
		let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
		let changed = current.as_ref() != Some(&snapshot);
		*current = Some(snapshot);
		changed
	}

	/// Apply an in-place edit to the stored snapshot.
	///
	/// Does nothing while the store is unpopulated, since the pending first
	/// collection will observe the same cluster state. Returns `true` if the
	/// edit changed the snapshot.
	pub fn update(&self, edit: impl FnOnce(&mut Snapshot)) -> bool {
		let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
		let Some(snapshot) = current.as_mut() else {
			return false;
		};
		let before = snapshot.clone();
		edit(snapshot);
		*snapshot != before
	}

	/// Get a deep copy of the stored snapshot.
	pub fn read(&self) -> Result<Snapshot, TrackerError> {
		self.current
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
			.ok_or(TrackerError::NotStarted)
	}

	pub fn is_populated(&self) -> bool {
		self.current
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.is_some()
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;
	use crate::snapshot::ApiResourceDescriptor;

	fn snapshot_with(group_version: &str) -> Snapshot {
		Snapshot::from_iter([(
			group_version.to_string(),
			vec![ApiResourceDescriptor::new(
				"widgets",
				true,
				"Widget",
				["get", "list"],
			)],
		)])
	}

	#[test]
	fn test_read_before_replace_is_not_started() {
		let store = SnapshotStore::new();
		assert_matches!(store.read(), Err(TrackerError::NotStarted));
		assert!(!store.is_populated());
	}

	#[test]
	fn test_empty_snapshot_is_still_started() {
		let store = SnapshotStore::new();
		assert!(store.replace(Snapshot::new()));
		assert_matches!(store.read(), Ok(snapshot) if snapshot.is_empty());
	}

	#[test]
	fn test_replace_reports_changes() {
		let store = SnapshotStore::new();
		assert!(store.replace(snapshot_with("example.com/v1")));
		assert!(!store.replace(snapshot_with("example.com/v1")));
		assert!(store.replace(snapshot_with("example.com/v2")));
	}

	#[test]
	fn test_reads_are_independent_copies() {
		let store = SnapshotStore::new();
		store.replace(snapshot_with("example.com/v1"));

		let mut first = store.read().unwrap();
		let second = store.read().unwrap();
		first.remove("example.com/v1");
		first.insert("mutated/v1", Vec::new());

		assert!(second.contains("example.com/v1"));
		assert!(!second.contains("mutated/v1"));
		assert_eq!(store.read().unwrap(), snapshot_with("example.com/v1"));
	}

	#[test]
	fn test_update_before_populated_is_ignored() {
		let store = SnapshotStore::new();
		let changed = store.update(|snapshot| {
			snapshot.insert("example.com/v1", Vec::new());
		});
		assert!(!changed);
		assert_matches!(store.read(), Err(TrackerError::NotStarted));
	}

	#[test]
	fn test_update_reports_changes() {
		let store = SnapshotStore::new();
		store.replace(snapshot_with("example.com/v1"));

		assert!(!store.update(|_| {}));
		assert!(store.update(|snapshot| {
			snapshot.remove("example.com/v1");
		}));
		assert!(store.read().unwrap().is_empty());
	}
}
