use std::sync::atomic::{AtomicU64, Ordering};

/// Two monotonic counters, readable via a snapshot-and-reset operation.
#[derive(Default)]
pub(crate) struct Counters {
  incoming: AtomicU64,
  outgoing: AtomicU64,
}

/// A point-in-time read of [`Counters`], returned by `Node::stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
  pub active_nodes: usize,
  pub incoming: u64,
  pub outgoing: u64,
}

impl Counters {
  pub(crate) fn incoming(&self) {
    self.incoming.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn outgoing(&self) {
    self.outgoing.fetch_add(1, Ordering::Relaxed);
  }

  /// Read both counters and reset them to zero in one step.
  pub(crate) fn snapshot_and_reset(&self) -> (u64, u64) {
    (
      self.incoming.swap(0, Ordering::Relaxed),
      self.outgoing.swap(0, Ordering::Relaxed),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn snapshot_resets_to_zero() {
    let counters = Counters::default();
    counters.incoming();
    counters.incoming();
    counters.outgoing();

    assert_eq!(counters.snapshot_and_reset(), (2, 1));
    assert_eq!(counters.snapshot_and_reset(), (0, 0));
  }
}
