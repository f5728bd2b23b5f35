//! The node runtime: owns the UDP socket and drives three cooperating
//! activities (receive, maintenance, and user-initiated send) over
//! shared state (routing table, pending-query map, counters, handler
//! chain).

use crate::common::*;
use crate::engine::Engine;
use crate::handler::MessageHandler;
use crate::message::Message;
use crate::stats::Stats;
use rand::Rng;
use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

mod activities;

/// The three well-known routers new nodes bootstrap from. Hardcoded per
/// spec; overridable via [`NodeConfig::bootstrap`].
///
/// `router.bitcomet.com:6881` and `dht.aelitis.com:6881` are also
/// commonly used as bootstrap routers but are left out of the default
/// list; pass them via `NodeConfig::bootstrap` if wanted.
pub const DEFAULT_BOOTSTRAP_NODES: [&str; 3] = [
  "router.bittorrent.com:6881",
  "router.utorrent.com:6881",
  "dht.transmissionbt.com:6881",
];

const BIND_ATTEMPTS: u32 = 20;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
  Created,
  Running,
  Stopped,
}

/// Tunable node identity, bind, bootstrap, and timing settings.
#[derive(Clone, Debug)]
pub struct NodeConfig {
  pub node_id: Option<NodeId>,
  pub port: Option<u16>,
  pub bootstrap: Vec<String>,
  pub maintenance_interval: Duration,
  pub stale_node_age: Duration,
  pub pending_query_timeout: Duration,
  pub bucket_refresh_idle: Duration,
}

impl Default for NodeConfig {
  fn default() -> Self {
    NodeConfig {
      node_id: None,
      port: None,
      bootstrap: DEFAULT_BOOTSTRAP_NODES.iter().map(|s| s.to_string()).collect(),
      maintenance_interval: Duration::from_secs(60),
      stale_node_age: Duration::from_secs(15 * 60),
      pending_query_timeout: Duration::from_secs(30),
      bucket_refresh_idle: Duration::from_secs(15 * 60),
    }
  }
}

/// A BitTorrent Mainline DHT node.
///
/// `Node` is cheap to clone (it's a thin handle over `Arc`-shared state);
/// every clone drives the same underlying socket and threads.
pub struct Node {
  engine: Arc<Engine>,
  config: NodeConfig,
  socket: Arc<Mutex<Option<Arc<UdpSocket>>>>,
  state: Mutex<State>,
  shutdown: Arc<AtomicBool>,
  threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
  /// Construct a node. `config.node_id` is generated from a
  /// cryptographically adequate random source if not supplied.
  pub fn new(config: NodeConfig) -> Self {
    let local_id = config.node_id.unwrap_or_else(NodeId::random);
    Node {
      engine: Arc::new(Engine::new(local_id)),
      config,
      socket: Arc::new(Mutex::new(None)),
      state: Mutex::new(State::Created),
      shutdown: Arc::new(AtomicBool::new(false)),
      threads: Mutex::new(Vec::new()),
    }
  }

  /// The local node ID, as 40 lowercase hex characters.
  pub fn id(&self) -> String {
    self.engine.local_id.to_string()
  }

  pub fn stats(&self) -> Stats {
    let active_nodes = self.engine.routing.lock().unwrap().active_count();
    let (incoming, outgoing) = self.engine.counters.snapshot_and_reset();
    Stats { active_nodes, incoming, outgoing }
  }

  pub fn add_message_handler(&self, handler: impl MessageHandler + 'static) {
    self.engine.handlers.lock().unwrap().push(Box::new(handler));
  }

  /// The address the node's socket is bound to, if running.
  pub fn local_addr(&self) -> Option<SocketAddr> {
    self.socket.lock().unwrap().as_ref().and_then(|socket| socket.local_addr().ok())
  }

  /// Bind the socket, seed the routing table from the bootstrap
  /// endpoints, and launch the receive and maintenance activities.
  ///
  /// Valid only from the `Created` state.
  pub fn start(&self) -> Result<()> {
    {
      let mut state = self.state.lock().unwrap();
      if *state != State::Created {
        return Err(Error::AlreadyStarted);
      }
      *state = State::Running;
    }

    let socket = bind(self.config.port)?;
    socket
      .set_read_timeout(Some(Duration::from_secs(1)))
      .context(error::Io)?;
    let socket = Arc::new(socket);
    *self.socket.lock().unwrap() = Some(socket.clone());

    activities::bootstrap(&self.engine, &socket, &self.config.bootstrap);

    let receive_handle = {
      let engine = self.engine.clone();
      let socket = socket.clone();
      let shutdown = self.shutdown.clone();
      thread::spawn(move || activities::receive_loop(engine, socket, shutdown))
    };

    let maintenance_handle = {
      let engine = self.engine.clone();
      let socket = socket.clone();
      let shutdown = self.shutdown.clone();
      let config = self.config.clone();
      thread::spawn(move || activities::maintenance_loop(engine, socket, shutdown, config))
    };

    *self.threads.lock().unwrap() = vec![receive_handle, maintenance_handle];

    Ok(())
  }

  /// Signal shutdown, wait for the receive and maintenance activities to
  /// drain, and close the socket. Valid only from the `Running` state.
  /// After `stop`, the node is inert and must not be restarted.
  pub fn stop(&self) -> Result<()> {
    {
      let mut state = self.state.lock().unwrap();
      if *state != State::Running {
        return Err(Error::NotRunning);
      }
      *state = State::Stopped;
    }

    self.shutdown.store(true, Ordering::SeqCst);

    for handle in self.threads.lock().unwrap().drain(..) {
      let _ = handle.join();
    }

    *self.socket.lock().unwrap() = None;
    Ok(())
  }

  /// Send `message` to `addr`. Fire-and-forget: socket errors and
  /// oversized datagrams are logged, never surfaced or panicked on.
  pub fn send_message(&self, message: Message, addr: SocketAddr) {
    let socket = self.socket.lock().unwrap().clone();
    match socket {
      Some(socket) => activities::send(&self.engine, &socket, &message, addr),
      None => log::warn!("send_message called while the node is not running; dropping"),
    }
  }
}

fn bind(port: Option<u16>) -> Result<UdpSocket> {
  match port {
    Some(port) => UdpSocket::bind(("0.0.0.0", port)).context(error::SocketBind { attempts: 1u32 }),
    None => {
      let mut last_error = None;
      for _ in 0..BIND_ATTEMPTS {
        let candidate = rand::thread_rng().gen_range(1025, 65536);
        match UdpSocket::bind(("0.0.0.0", candidate)) {
          Ok(socket) => return Ok(socket),
          Err(err) => last_error = Some(err),
        }
      }
      Err(Error::SocketBind {
        source: last_error.expect("BIND_ATTEMPTS > 0"),
        attempts: BIND_ATTEMPTS,
      })
    }
  }
}

pub(crate) fn resolve(hostport: &str) -> Vec<SocketAddr> {
  hostport
    .to_socket_addrs()
    .map(|iter| iter.collect())
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fresh_node_is_inert_until_started() {
    let node = Node::new(NodeConfig::default());
    let stats = node.stats();
    assert_eq!(stats.active_nodes, 0);
    assert_eq!(stats.incoming, 0);
    assert_eq!(stats.outgoing, 0);
  }

  #[test]
  fn stop_before_start_is_an_error() {
    let node = Node::new(NodeConfig::default());
    assert!(matches!(node.stop(), Err(Error::NotRunning)));
  }

  #[test]
  fn start_twice_is_an_error() {
    let node = Node::new(NodeConfig {
      port: Some(0),
      bootstrap: Vec::new(),
      ..NodeConfig::default()
    });
    node.start().unwrap();
    assert!(matches!(node.start(), Err(Error::AlreadyStarted)));
    node.stop().unwrap();
  }

  #[test]
  fn id_is_forty_hex_characters() {
    let node = Node::new(NodeConfig::default());
    assert_eq!(node.id().len(), 40);
  }

  /// End-to-end scenario A at the `Node` level: two loopback nodes, no
  /// bootstrap, exchange a real `ping` and each learns about the other.
  #[test]
  fn two_nodes_ping_each_other_over_loopback() {
    let a = Node::new(NodeConfig {
      port: Some(0),
      bootstrap: Vec::new(),
      ..NodeConfig::default()
    });
    let b = Node::new(NodeConfig {
      port: Some(0),
      bootstrap: Vec::new(),
      ..NodeConfig::default()
    });
    a.start().unwrap();
    b.start().unwrap();

    let b_addr = b.local_addr().unwrap();
    let ping = Message::Query {
      transaction_id: b"aa".to_vec(),
      query: crate::message::Query::Ping { id: NodeId::from_str(&a.id()).unwrap() },
    };
    a.send_message(ping, b_addr);

    // Give the receive threads a moment to process the round trip.
    thread::sleep(Duration::from_millis(200));

    assert_eq!(b.stats().active_nodes, 1);
    assert_eq!(a.stats().active_nodes, 1);

    a.stop().unwrap();
    b.stop().unwrap();
  }
}
