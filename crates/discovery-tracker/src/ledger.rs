//! Set of CustomResourceDefinition UIDs believed to be live.
//!
//! Incremental watch events may only ever add to the ledger. Pruning happens
//! exclusively in [`IdentityLedger::refresh`], driven by a full listing, so a
//! missed delete event is corrected on the next refresh instead of leaving the
//! ledger permanently wrong.

use std::collections::HashSet;

/// UIDs of the definitions the tracker has observed.
#[derive(Debug, Default)]
pub struct IdentityLedger {
	uids: HashSet<String>,
}

/// What a [`IdentityLedger::refresh`] changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LedgerRefresh {
	pub added: Vec<String>,
	pub removed: Vec<String>,
}

impl LedgerRefresh {
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.removed.is_empty()
	}
}

impl IdentityLedger {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn has(&self, uid: &str) -> bool {
		self.uids.contains(uid)
	}

	/// Track `uid`, returning `true` if it was not tracked before.
	pub fn add(&mut self, uid: &str) -> bool {
		if self.uids.contains(uid) {
			return false;
		}
		self.uids.insert(uid.to_string())
	}

	pub fn count(&self) -> usize {
		self.uids.len()
	}

	/// Reconcile against a full listing of live UIDs.
	///
	/// Adds every live UID not yet tracked and removes every tracked UID that
	/// is no longer live.
	pub fn refresh<'a>(&mut self, live: impl IntoIterator<Item = &'a str>) -> LedgerRefresh {
		let live: HashSet<&str> = live.into_iter().collect();

		let mut removed: Vec<String> = self
			.uids
			.iter()
			.filter(|uid| !live.contains(uid.as_str()))
			.cloned()
			.collect();
		for uid in &removed {
			self.uids.remove(uid);
		}

		let mut added: Vec<String> = live
			.into_iter()
			.filter(|uid| self.add(uid))
			.map(str::to_string)
			.collect();

		added.sort_unstable();
		removed.sort_unstable();
		LedgerRefresh { added, removed }
	}
}
