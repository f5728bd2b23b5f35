//! A BitTorrent Mainline DHT (BEP 5) node: bencode codec, Kademlia
//! routing table, KRPC protocol engine, and a node runtime that drives
//! them over a UDP socket.

mod bencode;
mod common;
mod engine;
mod error;
mod handler;
mod id;
mod message;
mod node;
mod routing;
mod stats;

pub use error::{Error, Result};
pub use handler::MessageHandler;
pub use id::NodeId;
pub use message::{Message, Query};
pub use node::{Node, NodeConfig, DEFAULT_BOOTSTRAP_NODES};
pub use routing::RemoteNode;
pub use stats::Stats;
