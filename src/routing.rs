//! The routing table: a bounded collection of known remote nodes,
//! organized by XOR-distance to the local node ID.

use crate::common::*;
use crate::routing::bucket::{Bucket, Range, K};

pub mod bucket;

pub use bucket::RemoteNode;

/// A list of [`Bucket`]s whose ranges partition the full 160-bit
/// keyspace without gaps or overlap. Initially a single bucket covering
/// the whole space.
pub struct RoutingTable {
  local_id: NodeId,
  buckets: Vec<Bucket>,
}

impl RoutingTable {
  pub fn new(local_id: NodeId) -> Self {
    RoutingTable {
      local_id,
      buckets: vec![Bucket::new(Range::full())],
    }
  }

  pub fn local_id(&self) -> NodeId {
    self.local_id
  }

  fn bucket_index_for(&self, id: &NodeId) -> usize {
    self
      .buckets
      .iter()
      .position(|bucket| bucket.range.contains(id))
      .expect("bucket ranges partition the keyspace")
  }

  /// Insert or refresh `node`: refresh in place, append if room, split
  /// the locally-owned bucket if full, otherwise drop.
  pub fn add_node(&mut self, node: RemoteNode) {
    self.add_node_at(node, Instant::now())
  }

  pub(crate) fn add_node_at(&mut self, node: RemoteNode, now: Instant) {
    if node.id == self.local_id {
      return;
    }

    let index = self.bucket_index_for(&node.id);
    if self.buckets[index].touch(&node.id, node.addr, now) {
      return;
    }

    if !self.buckets[index].is_full() {
      self.buckets[index].insert(node);
      return;
    }

    if self.buckets[index].range.contains(&self.local_id) && self.buckets[index].range.is_splittable() {
      let bucket = self.buckets.remove(index);
      let (low, high) = bucket.split();
      self.buckets.insert(index, high);
      self.buckets.insert(index, low);
      // Retry: the bucket that used to hold everything is now two
      // buckets, at least one of which has room.
      self.add_node_at(node, now);
    }
    // Else: bucket full and not splittable. Drop the new node.
  }

  /// Up to `n` nodes with smallest XOR distance to `target`, nondecreasing
  /// by distance; ties broken by insertion-stable order (older entries
  /// first).
  pub fn closest_nodes(&self, target: &NodeId, n: usize) -> Vec<RemoteNode> {
    let mut all: Vec<&RemoteNode> = self.buckets.iter().flat_map(|b| b.nodes()).collect();
    all.sort_by(|a, b| {
      let da = target.distance(&a.id);
      let db = target.distance(&b.id);
      da.cmp(&db).then(a.last_seen.cmp(&b.last_seen))
    });
    all.into_iter().take(n).cloned().collect()
  }

  pub fn remove_stale(&mut self, max_age: Duration) {
    self.remove_stale_at(Instant::now(), max_age)
  }

  pub(crate) fn remove_stale_at(&mut self, now: Instant, max_age: Duration) {
    for bucket in &mut self.buckets {
      bucket.remove_stale(now, max_age);
    }
  }

  pub fn active_count(&self) -> usize {
    self.buckets.iter().map(Bucket::len).sum()
  }

  pub fn bucket_count(&self) -> usize {
    self.buckets.len()
  }

  /// Buckets that have seen no traffic (insert/refresh) since `cutoff`
  /// ago, paired with their freshest node (if any) to target a refresh
  /// query at.
  pub(crate) fn stale_buckets(&self, now: Instant, cutoff: Duration) -> Vec<(&Range, Option<&RemoteNode>)> {
    self
      .buckets
      .iter()
      .filter(|bucket| now.saturating_duration_since(bucket.last_changed()) > cutoff)
      .map(|bucket| (&bucket.range, bucket.nodes().last()))
      .collect()
  }

  pub(crate) fn capacity(&self) -> usize {
    self.buckets.len() * K
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use std::net::Ipv4Addr;

  fn addr(n: u8) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, n), 6881)
  }

  fn id_with_prefix_byte(byte: u8, tail: u8) -> NodeId {
    let mut bytes = [0u8; 20];
    bytes[0] = byte;
    bytes[19] = tail;
    NodeId::from_bytes(bytes)
  }

  #[test]
  fn closest_nodes_sorted_by_xor_distance() {
    let local = NodeId::from_bytes([0u8; 20]);
    let mut table = RoutingTable::new(local);
    let now = Instant::now();

    for tail in 0..8u8 {
      table.add_node_at(
        RemoteNode::new(id_with_prefix_byte(0x00, tail + 1), addr(tail), now),
        now,
      );
    }

    let target = id_with_prefix_byte(0x00, 0);
    let closest = table.closest_nodes(&target, 8);
    assert_eq!(closest.len(), 8);
    for pair in closest.windows(2) {
      let da = target.distance(&pair[0].id);
      let db = target.distance(&pair[1].id);
      assert!(da <= db);
    }
  }

  #[test]
  fn bucket_splits_when_full_and_locally_owned() {
    let local = NodeId::from_bytes([0u8; 20]);
    let mut table = RoutingTable::new(local);
    let now = Instant::now();

    for tail in 0..9u8 {
      table.add_node_at(
        RemoteNode::new(id_with_prefix_byte(0x00, tail + 1), addr(tail), now),
        now,
      );
    }

    assert_eq!(table.active_count(), 9);
    assert!(table.bucket_count() > 1);
  }

  #[test]
  fn bucket_full_and_not_splittable_drops_new_node() {
    let local = NodeId::from_bytes([0u8; 20]);
    let mut table = RoutingTable::new(local);
    let now = Instant::now();

    for tail in 0..9u8 {
      table.add_node_at(
        RemoteNode::new(id_with_prefix_byte(0xFF, tail + 1), addr(tail), now),
        now,
      );
    }

    assert_eq!(table.active_count(), 8);
  }

  #[test]
  fn refreshing_existing_node_does_not_grow_table() {
    let local = NodeId::from_bytes([0u8; 20]);
    let mut table = RoutingTable::new(local);
    let t0 = Instant::now();
    let id = id_with_prefix_byte(0x00, 1);

    table.add_node_at(RemoteNode::new(id, addr(1), t0), t0);
    let t1 = t0 + Duration::from_secs(1);
    table.add_node_at(RemoteNode::new(id, addr(2), t1), t1);

    assert_eq!(table.active_count(), 1);
    let closest = table.closest_nodes(&id, 1);
    assert_eq!(closest[0].addr, addr(2));
    assert_eq!(closest[0].last_seen, t1);
  }

  #[test]
  fn remove_stale_evicts_old_nodes() {
    let local = NodeId::from_bytes([0u8; 20]);
    let mut table = RoutingTable::new(local);
    let t0 = Instant::now();
    table.add_node_at(RemoteNode::new(id_with_prefix_byte(0x00, 1), addr(1), t0), t0);

    let later = t0 + Duration::from_secs(16 * 60);
    table.remove_stale_at(later, Duration::from_secs(15 * 60));

    assert_eq!(table.active_count(), 0);
  }

  #[test]
  fn local_id_is_never_inserted() {
    let local = NodeId::from_bytes([0u8; 20]);
    let mut table = RoutingTable::new(local);
    table.add_node(RemoteNode::new(local, addr(1), Instant::now()));
    assert_eq!(table.active_count(), 0);
  }
}
