//! The bodies of the three cooperating activities: receive, maintenance,
//! and user-initiated send.

use super::{resolve, NodeConfig};
use crate::common::*;
use crate::engine::Engine;
use crate::message::{Message, Query};
use crate::routing::bucket::K;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Block on datagram arrival with a modest timeout (the socket's read
/// timeout, set by `Node::start`) so shutdown is prompt.
pub(super) fn receive_loop(engine: Arc<Engine>, socket: Arc<UdpSocket>, shutdown: Arc<AtomicBool>) {
  let mut buf = [0u8; 2048];
  while !shutdown.load(Ordering::SeqCst) {
    match socket.recv_from(&mut buf) {
      Ok((len, from)) => {
        let inbound = engine.handle_datagram(&buf[..len], from);
        if let Some(reply) = inbound.reply {
          if let Err(err) = socket.send_to(&reply, from) {
            log::warn!("failed to send reply to {}: {}", from, err);
          }
        }
      }
      Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
        // Expected: the read timeout elapsed with nothing to receive.
        // Loop back around to re-check `shutdown`.
      }
      Err(err) => {
        log::warn!("recv error: {}", err);
      }
    }
  }
}

/// Sleep between maintenance cycles in 1-second increments so shutdown
/// is interruptible without a forced cancellation mechanism.
pub(super) fn maintenance_loop(
  engine: Arc<Engine>,
  socket: Arc<UdpSocket>,
  shutdown: Arc<AtomicBool>,
  config: NodeConfig,
) {
  let mut elapsed = Duration::from_secs(0);
  while !shutdown.load(Ordering::SeqCst) {
    thread::sleep(Duration::from_secs(1));
    elapsed += Duration::from_secs(1);
    if shutdown.load(Ordering::SeqCst) {
      break;
    }
    if elapsed >= config.maintenance_interval {
      elapsed = Duration::from_secs(0);
      run_maintenance_cycle(&engine, &socket, &config);
    }
  }
}

fn run_maintenance_cycle(engine: &Engine, socket: &UdpSocket, config: &NodeConfig) {
  let now = Instant::now();

  engine.routing.lock().unwrap().remove_stale_at(now, config.stale_node_age);
  engine.pending.lock().unwrap().sweep(now, config.pending_query_timeout);

  let refresh_targets: Vec<_> = {
    let table = engine.routing.lock().unwrap();
    table
      .stale_buckets(now, config.bucket_refresh_idle)
      .into_iter()
      .filter_map(|(range, node)| node.map(|node| (NodeId::random_in_range(range), node.addr)))
      .collect()
  };

  for (target, addr) in refresh_targets {
    send_find_node(engine, socket, target, SocketAddr::V4(addr));
  }

  if engine.routing.lock().unwrap().active_count() < K {
    bootstrap(engine, socket, &config.bootstrap);
  }
}

/// Seed the routing table by sending `find_node(target=self.id)` to the
/// bootstrap endpoints. Hostnames that fail to resolve (no network, DNS
/// unavailable) are logged and skipped; bootstrap never blocks `start`
/// on a single unreachable router.
pub(super) fn bootstrap(engine: &Engine, socket: &UdpSocket, endpoints: &[String]) {
  let local_id = engine.local_id;
  for hostport in endpoints {
    let addrs = resolve(hostport);
    if addrs.is_empty() {
      log::debug!("bootstrap endpoint {} did not resolve; skipping", hostport);
      continue;
    }
    for addr in addrs {
      send_find_node(engine, socket, local_id, addr);
    }
  }
}

fn send_find_node(engine: &Engine, socket: &UdpSocket, target: NodeId, dest: SocketAddr) {
  let mut transaction_id = vec![0u8; 2];
  rand::thread_rng().fill(&mut transaction_id[..]);
  let message = Message::Query {
    transaction_id,
    query: Query::FindNode { id: engine.local_id, target },
  };
  send(engine, socket, &message, dest);
}

/// Bencode-encode and transmit `message`, recording a `PendingQuery` if
/// it's a query. Errors (socket unavailable, oversized datagram) are
/// logged and never surfaced to the caller; send is fire-and-forget.
pub(super) fn send(engine: &Engine, socket: &UdpSocket, message: &Message, dest: SocketAddr) {
  match engine.prepare_outgoing(message, dest) {
    Ok(bytes) => match socket.send_to(&bytes, dest) {
      Ok(_) => engine.counters.outgoing(),
      Err(err) => log::warn!("failed to send message to {}: {}", dest, err),
    },
    Err(err) => log::warn!("failed to prepare outgoing message to {}: {}", dest, err),
  }
}

