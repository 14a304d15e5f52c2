use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::result::StepResult;

/// Fixed-capacity, lock-free sink for step results.
///
/// Writers claim a slot with an atomic fetch-add and fill it once. Results
/// carry their declaration index so they can be put back in order.
pub(crate) struct ResultCollector {
  slots: Vec<OnceLock<(usize, StepResult)>>,
  next: AtomicUsize,
}

impl ResultCollector {
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      slots: (0..capacity).map(|_| OnceLock::new()).collect(),
      next: AtomicUsize::new(0),
    }
  }

  /// Store a result. Returns false when every slot is already taken.
  pub fn push(&self, index: usize, result: StepResult) -> bool {
    let slot = self.next.fetch_add(1, Ordering::AcqRel);
    match self.slots.get(slot) {
      Some(cell) => cell.set((index, result)).is_ok(),
      None => false,
    }
  }

  pub fn len(&self) -> usize {
    self.next.load(Ordering::Acquire).min(self.slots.len())
  }

  /// Collected results sorted by declaration index.
  pub fn sorted(&self) -> Vec<StepResult> {
    let mut entries: Vec<&(usize, StepResult)> =
      self.slots.iter().filter_map(OnceLock::get).collect();
    entries.sort_by_key(|(index, _)| *index);
    entries.into_iter().map(|(_, result)| result.clone()).collect()
  }
}
