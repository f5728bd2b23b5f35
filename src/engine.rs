//! The protocol engine: parses inbound datagrams, dispatches queries to
//! response builders, correlates responses to outstanding queries by
//! transaction ID, and feeds successful contacts into the routing table.

use crate::common::*;
use crate::handler::HandlerChain;
use crate::message::{self, Message, Query};
use crate::routing::{RemoteNode, RoutingTable};
use crate::stats::Counters;
use rand::Rng;
use std::collections::HashMap;

/// `(transaction_id, query_name, issued_at, destination)`, keyed by
/// `transaction_id` in [`PendingQueries`].
pub(crate) struct PendingQuery {
  pub(crate) query_name: &'static str,
  pub(crate) issued_at: Instant,
  pub(crate) destination: SocketAddr,
}

#[derive(Default)]
pub(crate) struct PendingQueries {
  by_transaction: HashMap<Vec<u8>, PendingQuery>,
}

impl PendingQueries {
  pub(crate) fn insert(&mut self, transaction_id: Vec<u8>, entry: PendingQuery) {
    self.by_transaction.insert(transaction_id, entry);
  }

  /// Remove and return the entry for `transaction_id`, if any is still
  /// outstanding.
  pub(crate) fn take(&mut self, transaction_id: &[u8]) -> Option<PendingQuery> {
    self.by_transaction.remove(transaction_id)
  }

  /// Evict entries older than `max_age` as of `now`.
  pub(crate) fn sweep(&mut self, now: Instant, max_age: Duration) {
    self
      .by_transaction
      .retain(|_, entry| now.saturating_duration_since(entry.issued_at) <= max_age);
  }

  pub(crate) fn len(&self) -> usize {
    self.by_transaction.len()
  }
}

/// The outcome of handling one inbound datagram: an optional reply to
/// send back to the same address.
pub(crate) struct Inbound {
  pub(crate) reply: Option<Vec<u8>>,
}

pub(crate) struct Engine {
  pub(crate) local_id: NodeId,
  pub(crate) routing: Mutex<RoutingTable>,
  pub(crate) pending: Mutex<PendingQueries>,
  pub(crate) counters: Counters,
  pub(crate) handlers: Mutex<HandlerChain>,
}

impl Engine {
  pub(crate) fn new(local_id: NodeId) -> Self {
    Engine {
      local_id,
      routing: Mutex::new(RoutingTable::new(local_id)),
      pending: Mutex::new(PendingQueries::default()),
      counters: Counters::default(),
      handlers: Mutex::new(HandlerChain::default()),
    }
  }

  /// Handle one inbound datagram from `from`. Always counts it as
  /// incoming. Malformed datagrams are logged at debug and dropped
  /// without a reply.
  pub(crate) fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) -> Inbound {
    self.counters.incoming();

    let message = match Message::parse(datagram) {
      Ok(message) => message,
      Err(err) => {
        log::debug!("dropping malformed datagram from {}: {}", from, err);
        return Inbound { reply: None };
      }
    };

    let from_v4 = match from {
      SocketAddr::V4(addr) => addr,
      SocketAddr::V6(_) => {
        log::debug!("dropping datagram from non-IPv4 peer {}", from);
        return Inbound { reply: None };
      }
    };

    match &message {
      Message::Query { transaction_id, query } => {
        let sender = RemoteNode::new(query.sender_id(), from_v4, Instant::now());
        self.routing.lock().unwrap().add_node(sender.clone());
        self.handlers.lock().unwrap().dispatch(&message, &sender);

        let response = self.build_response(query);
        let reply = Message::Response {
          transaction_id: transaction_id.clone(),
          body: response,
        };
        Inbound { reply: Some(reply.encode()) }
      }

      Message::Response { transaction_id, body } => {
        // `Message::parse` already validated that `r.id` is present.
        let id = NodeId::from_slice(body.get(&b"id"[..]).unwrap().as_bytes().unwrap())
          .expect("validated during parse");
        let sender = RemoteNode::new(id, from_v4, Instant::now());
        self.routing.lock().unwrap().add_node(sender.clone());

        // Matched or not, the response is still fed to add_node and the
        // handler chain; only a match additionally clears the pending
        // entry.
        self.pending.lock().unwrap().take(transaction_id);
        self.handlers.lock().unwrap().dispatch(&message, &sender);

        Inbound { reply: None }
      }

      Message::Error { transaction_id, code, message: text } => {
        // KRPC error messages carry no sender `id`, so there is no
        // RemoteNode to feed into the routing table or handler chain.
        log::debug!(
          "received KRPC error from {} (t={:?}): {} {}",
          from,
          transaction_id,
          code,
          text
        );
        self.pending.lock().unwrap().take(transaction_id);
        Inbound { reply: None }
      }
    }
  }

  fn build_response(&self, query: &Query) -> BTreeMap<Vec<u8>, Value> {
    let mut body = BTreeMap::new();
    body.insert(b"id".to_vec(), Value::bytes(self.local_id.as_bytes().to_vec()));

    match query {
      Query::Ping { .. } => {}

      Query::FindNode { target, .. } => {
        let closest = self.routing.lock().unwrap().closest_nodes(target, 8);
        body.insert(b"nodes".to_vec(), Value::bytes(message::encode_compact_nodes(&closest)));
      }

      Query::GetPeers { info_hash, .. } => {
        let closest = self.routing.lock().unwrap().closest_nodes(info_hash, 8);
        let mut token = [0u8; 8];
        rand::thread_rng().fill(&mut token);
        body.insert(b"token".to_vec(), Value::bytes(token.to_vec()));
        // The core does not track announced peers, so it always returns
        // `nodes`, never a `values` list.
        body.insert(b"nodes".to_vec(), Value::bytes(message::encode_compact_nodes(&closest)));
      }

      Query::AnnouncePeer { .. } => {
        // Acknowledged but not stored: this node keeps no peer-contact
        // store for info-hashes.
      }
    }

    body
  }

  /// Prepare `message` for transmission to `destination`: register a
  /// `PendingQuery` if it's a query and bencode-encode it. Returns `Err`
  /// (logged by the caller, not propagated) if the encoded datagram would
  /// exceed the 1472-byte UDP payload limit. Does not count the message
  /// as outgoing; the caller does that once the send actually succeeds.
  pub(crate) fn prepare_outgoing(&self, message: &Message, destination: SocketAddr) -> Result<Vec<u8>> {
    let encoded = message.encode();
    if encoded.len() > 1472 {
      return Err(Error::DatagramTooLarge { len: encoded.len() });
    }

    if let Message::Query { transaction_id, query } = message {
      self.pending.lock().unwrap().insert(
        transaction_id.clone(),
        PendingQuery {
          query_name: query.name(),
          issued_at: Instant::now(),
          destination,
        },
      );
    }

    Ok(encoded)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::message::{Message, Query};
  use pretty_assertions::assert_eq;
  use std::net::Ipv4Addr;

  fn peer() -> SocketAddr {
    SocketAddr::new(Ipv4Addr::new(127, 0, 0, 1).into(), 6881)
  }

  #[test]
  fn ping_round_trip_matches_scenario_a() {
    let engine = Engine::new(NodeId::from_bytes([0u8; 20]));
    let query = Message::Query {
      transaction_id: b"aa".to_vec(),
      query: Query::Ping { id: NodeId::from_bytes([1u8; 20]) },
    };

    let inbound = engine.handle_datagram(&query.encode(), peer());
    let reply = Message::parse(&inbound.reply.unwrap()).unwrap();

    match reply {
      Message::Response { transaction_id, body } => {
        assert_eq!(transaction_id, b"aa");
        assert_eq!(body.get(&b"id"[..]).unwrap().as_bytes().unwrap(), &[0u8; 20]);
      }
      _ => panic!("expected a response"),
    }
  }

  #[test]
  fn find_node_reply_contains_compact_nodes() {
    let engine = Engine::new(NodeId::from_bytes([0u8; 20]));
    {
      let mut table = engine.routing.lock().unwrap();
      table.add_node(RemoteNode::new(
        NodeId::from_bytes([2u8; 20]),
        std::net::SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 0x1AE1),
        Instant::now(),
      ));
    }

    let query = Message::Query {
      transaction_id: b"bb".to_vec(),
      query: Query::FindNode {
        id: NodeId::from_bytes([1u8; 20]),
        target: NodeId::from_bytes([0u8; 20]),
      },
    };

    let inbound = engine.handle_datagram(&query.encode(), peer());
    let reply = Message::parse(&inbound.reply.unwrap()).unwrap();
    match reply {
      Message::Response { body, .. } => {
        let nodes = body.get(&b"nodes"[..]).unwrap().as_bytes().unwrap();
        let mut expected = vec![2u8; 20];
        expected.extend_from_slice(&[1, 2, 3, 4, 0x1A, 0xE1]);
        assert_eq!(nodes, expected.as_slice());
      }
      _ => panic!("expected a response"),
    }
  }

  #[test]
  fn unmatched_response_still_updates_routing_table() {
    let engine = Engine::new(NodeId::from_bytes([0u8; 20]));
    let mut body = BTreeMap::new();
    body.insert(b"id".to_vec(), Value::bytes(vec![9u8; 20]));
    let response = Message::Response {
      transaction_id: b"zz".to_vec(),
      body,
    };

    let inbound = engine.handle_datagram(&response.encode(), peer());
    assert!(inbound.reply.is_none());
    assert_eq!(engine.routing.lock().unwrap().active_count(), 1);
  }

  #[test]
  fn matched_response_clears_pending_entry() {
    let engine = Engine::new(NodeId::from_bytes([0u8; 20]));
    let query = Message::Query {
      transaction_id: b"cc".to_vec(),
      query: Query::Ping { id: NodeId::from_bytes([1u8; 20]) },
    };
    engine.prepare_outgoing(&query, peer()).unwrap();
    assert_eq!(engine.pending.lock().unwrap().len(), 1);

    let mut body = BTreeMap::new();
    body.insert(b"id".to_vec(), Value::bytes(vec![9u8; 20]));
    let response = Message::Response {
      transaction_id: b"cc".to_vec(),
      body,
    };
    engine.handle_datagram(&response.encode(), peer());
    assert_eq!(engine.pending.lock().unwrap().len(), 0);
  }

  #[test]
  fn malformed_datagram_is_counted_and_dropped() {
    let engine = Engine::new(NodeId::from_bytes([0u8; 20]));
    let inbound = engine.handle_datagram(b"not bencode", peer());
    assert!(inbound.reply.is_none());
    assert_eq!(engine.counters.snapshot_and_reset().0, 1);
  }

  #[test]
  fn handler_chain_runs_in_order_and_survives_a_failing_handler() {
    let engine = Engine::new(NodeId::from_bytes([0u8; 20]));
    let calls = Arc::new(Mutex::new(Vec::new()));

    let calls_a = calls.clone();
    engine.handlers.lock().unwrap().push(Box::new(move |_: &Message, _: &RemoteNode| {
      calls_a.lock().unwrap().push('a');
      panic!("handler A always fails");
    }));

    let calls_b = calls.clone();
    engine.handlers.lock().unwrap().push(Box::new(move |_: &Message, _: &RemoteNode| {
      calls_b.lock().unwrap().push('b');
    }));

    let query = Message::Query {
      transaction_id: b"dd".to_vec(),
      query: Query::Ping { id: NodeId::from_bytes([1u8; 20]) },
    };
    engine.handle_datagram(&query.encode(), peer());

    assert_eq!(*calls.lock().unwrap(), vec!['a', 'b']);
  }

  #[test]
  fn pending_query_expires_after_max_age() {
    let mut pending = PendingQueries::default();
    let issued = Instant::now();
    pending.insert(
      b"ee".to_vec(),
      PendingQuery {
        query_name: "ping",
        issued_at: issued,
        destination: peer(),
      },
    );

    let later = issued + Duration::from_secs(31);
    pending.sweep(later, Duration::from_secs(30));

    assert!(pending.take(b"ee").is_none());
  }

  #[test]
  fn oversized_datagram_is_rejected() {
    let engine = Engine::new(NodeId::from_bytes([0u8; 20]));
    let huge = Message::Error {
      transaction_id: b"ff".to_vec(),
      code: 200,
      message: "x".repeat(2000),
    };
    assert!(engine.prepare_outgoing(&huge, peer()).is_err());
  }
}
