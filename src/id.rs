use crate::common::*;

/// A 160-bit BEP 5 node (or info-hash) identifier.
///
/// Canonical wire form is 20 raw bytes; canonical textual form is 40
/// lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; 20]);

impl NodeId {
  pub const LEN: usize = 20;

  pub(crate) fn from_bytes(bytes: [u8; 20]) -> Self {
    NodeId(bytes)
  }

  /// Generate a node ID from a cryptographically adequate random source.
  ///
  /// Not constrained against the node's IP (BEP 42 secure node IDs are
  /// not enforced); callers wanting that scheme can derive a conforming
  /// ID externally and pass it to `NodeConfig::node_id`.
  pub fn random() -> Self {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill(&mut bytes);
    NodeId(bytes)
  }

  pub(crate) fn random_in_range(range: &crate::routing::bucket::Range) -> Self {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill(&mut bytes);
    range.clamp(&mut bytes);
    NodeId(bytes)
  }

  pub fn as_bytes(&self) -> &[u8; 20] {
    &self.0
  }

  pub fn into_bytes(self) -> [u8; 20] {
    self.0
  }

  pub fn from_slice(slice: &[u8]) -> Result<Self> {
    if slice.len() != Self::LEN {
      return Err(Error::NodeIdLength { len: slice.len() });
    }
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(slice);
    Ok(NodeId(bytes))
  }

  /// XOR distance to `other`, as a 160-bit big-endian magnitude.
  pub fn distance(&self, other: &NodeId) -> [u8; 20] {
    let mut out = [0u8; 20];
    for i in 0..20 {
      out[i] = self.0[i] ^ other.0[i];
    }
    out
  }

  /// Index (0-based, from the most significant bit) of the highest bit at
  /// which `self` and `other` differ, or `None` if they are identical.
  /// Bit 0 is the MSB of the first byte.
  pub(crate) fn first_differing_bit(&self, other: &NodeId) -> Option<usize> {
    let distance = self.distance(other);
    for (byte_index, byte) in distance.iter().enumerate() {
      if *byte != 0 {
        return Some(byte_index * 8 + byte.leading_zeros() as usize);
      }
    }
    None
  }

  pub(crate) fn bit(&self, index: usize) -> bool {
    let byte = self.0[index / 8];
    let shift = 7 - (index % 8);
    (byte >> shift) & 1 == 1
  }
}

impl fmt::Debug for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "NodeId({})", self)
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for byte in &self.0 {
      write!(f, "{:02x}", byte)?;
    }
    Ok(())
  }
}

impl FromStr for NodeId {
  type Err = Error;

  fn from_str(text: &str) -> Result<Self> {
    if text.len() != 40 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
      return Err(Error::NodeIdFormat {
        text: text.to_owned(),
      });
    }

    let mut bytes = [0u8; 20];
    for (i, byte) in bytes.iter_mut().enumerate() {
      *byte = u8::from_str_radix(&text[i * 2..i * 2 + 2], 16)
        .map_err(|_| Error::NodeIdFormat {
          text: text.to_owned(),
        })?;
    }

    Ok(NodeId(bytes))
  }
}

use rand::Rng;

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn hex_round_trip() {
    let id = NodeId::random();
    let text = id.to_string();
    assert_eq!(text.len(), 40);
    assert_eq!(text.parse::<NodeId>().unwrap(), id);
  }

  #[test]
  fn rejects_short_hex() {
    assert!("abcd".parse::<NodeId>().is_err());
  }

  #[test]
  fn rejects_non_hex() {
    let text = "z".repeat(40);
    assert!(text.parse::<NodeId>().is_err());
  }

  #[test]
  fn distance_is_zero_for_self() {
    let id = NodeId::random();
    assert_eq!(id.distance(&id), [0u8; 20]);
  }

  #[test]
  fn distance_is_symmetric() {
    let a = NodeId::random();
    let b = NodeId::random();
    assert_eq!(a.distance(&b), b.distance(&a));
  }

  #[test]
  fn first_differing_bit_none_when_equal() {
    let id = NodeId::random();
    assert_eq!(id.first_differing_bit(&id), None);
  }

  #[test]
  fn first_differing_bit_msb() {
    let a = NodeId::from_bytes([0u8; 20]);
    let mut other = [0u8; 20];
    other[0] = 0b1000_0000;
    let b = NodeId::from_bytes(other);
    assert_eq!(a.first_differing_bit(&b), Some(0));
  }
}
