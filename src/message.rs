//! BEP 5 KRPC message shapes, built on top of [`crate::bencode::Value`].
//!
//! Compact node info is `node_id(20) || ipv4(4) || port(2)` = 26 bytes,
//! concatenated to form a query's `nodes` reply field.

use crate::common::*;
use crate::routing::RemoteNode;

pub const COMPACT_NODE_LEN: usize = 26;

/// A parsed top-level KRPC message.
#[derive(Debug, Clone)]
pub enum Message {
  Query {
    transaction_id: Vec<u8>,
    query: Query,
  },
  Response {
    transaction_id: Vec<u8>,
    body: BTreeMap<Vec<u8>, Value>,
  },
  Error {
    transaction_id: Vec<u8>,
    code: i64,
    message: String,
  },
}

#[derive(Debug, Clone)]
pub enum Query {
  Ping {
    id: NodeId,
  },
  FindNode {
    id: NodeId,
    target: NodeId,
  },
  GetPeers {
    id: NodeId,
    info_hash: NodeId,
  },
  AnnouncePeer {
    id: NodeId,
    info_hash: NodeId,
    port: u16,
    token: Vec<u8>,
  },
}

impl Query {
  pub fn sender_id(&self) -> NodeId {
    match self {
      Query::Ping { id }
      | Query::FindNode { id, .. }
      | Query::GetPeers { id, .. }
      | Query::AnnouncePeer { id, .. } => *id,
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      Query::Ping { .. } => "ping",
      Query::FindNode { .. } => "find_node",
      Query::GetPeers { .. } => "get_peers",
      Query::AnnouncePeer { .. } => "announce_peer",
    }
  }
}

impl Message {
  pub fn transaction_id(&self) -> &[u8] {
    match self {
      Message::Query { transaction_id, .. }
      | Message::Response { transaction_id, .. }
      | Message::Error { transaction_id, .. } => transaction_id,
    }
  }

  /// Parse a raw datagram into a typed message. Any malformation (missing
  /// `t`/`y`, wrong field types, unrecognized `q`, non-20-byte IDs,
  /// undecodable bencode) is a single `Err`; callers count it as
  /// incoming, log it, and drop it without reply.
  pub fn parse(datagram: &[u8]) -> Result<Message> {
    let value = Value::decode(datagram)?;
    let dict = value.as_dict().context(error::MessageField { field: "<root>" })?;

    let transaction_id = dict
      .get(&b"t"[..])
      .and_then(Value::as_bytes)
      .context(error::MessageField { field: "t" })?
      .to_vec();

    let y = dict
      .get(&b"y"[..])
      .and_then(Value::as_bytes)
      .context(error::MessageField { field: "y" })?;

    match y {
      b"q" => Self::parse_query(dict, transaction_id),
      b"r" => Self::parse_response(dict, transaction_id),
      b"e" => Self::parse_error(dict, transaction_id),
      other => Err(Error::MessageUnknownType {
        y: String::from_utf8_lossy(other).into_owned(),
      }),
    }
  }

  fn parse_query(dict: &BTreeMap<Vec<u8>, Value>, transaction_id: Vec<u8>) -> Result<Message> {
    let q = dict
      .get(&b"q"[..])
      .and_then(Value::as_bytes)
      .context(error::MessageField { field: "q" })?;
    let args = dict
      .get(&b"a"[..])
      .and_then(Value::as_dict)
      .context(error::MessageField { field: "a" })?;

    let id = node_id_field(args, "id")?;

    let query = match q {
      b"ping" => Query::Ping { id },
      b"find_node" => Query::FindNode {
        id,
        target: node_id_field(args, "target")?,
      },
      b"get_peers" => Query::GetPeers {
        id,
        info_hash: node_id_field(args, "info_hash")?,
      },
      b"announce_peer" => Query::AnnouncePeer {
        id,
        info_hash: node_id_field(args, "info_hash")?,
        port: args
          .get(&b"port"[..])
          .and_then(Value::as_int)
          .context(error::MessageField { field: "port" })?
          as u16,
        token: args
          .get(&b"token"[..])
          .and_then(Value::as_bytes)
          .context(error::MessageField { field: "token" })?
          .to_vec(),
      },
      other => {
        return Err(Error::MessageUnknownQuery {
          q: String::from_utf8_lossy(other).into_owned(),
        })
      }
    };

    Ok(Message::Query { transaction_id, query })
  }

  fn parse_response(dict: &BTreeMap<Vec<u8>, Value>, transaction_id: Vec<u8>) -> Result<Message> {
    let body = dict
      .get(&b"r"[..])
      .and_then(Value::as_dict)
      .context(error::MessageField { field: "r" })?
      .clone();
    // Every response must carry the sender's `id`; validate eagerly so a
    // malformed response is rejected here rather than downstream.
    node_id_field(&body, "id")?;
    Ok(Message::Response { transaction_id, body })
  }

  fn parse_error(dict: &BTreeMap<Vec<u8>, Value>, transaction_id: Vec<u8>) -> Result<Message> {
    let e = dict
      .get(&b"e"[..])
      .and_then(Value::as_list)
      .context(error::MessageField { field: "e" })?;
    let code = e.get(0).and_then(Value::as_int).context(error::MessageField { field: "e[0]" })?;
    let message = e
      .get(1)
      .and_then(Value::as_bytes)
      .context(error::MessageField { field: "e[1]" })?;
    Ok(Message::Error {
      transaction_id,
      code,
      message: String::from_utf8_lossy(message).into_owned(),
    })
  }

  pub fn encode(&self) -> Vec<u8> {
    self.to_value().encode()
  }

  fn to_value(&self) -> Value {
    let mut top = BTreeMap::new();
    top.insert(b"t".to_vec(), Value::bytes(self.transaction_id().to_vec()));

    match self {
      Message::Query { query, .. } => {
        top.insert(b"y".to_vec(), Value::bytes(&b"q"[..]));
        top.insert(b"q".to_vec(), Value::bytes(query.name().as_bytes()));
        top.insert(b"a".to_vec(), Value::Dict(query_args(query)));
      }
      Message::Response { body, .. } => {
        top.insert(b"y".to_vec(), Value::bytes(&b"r"[..]));
        top.insert(b"r".to_vec(), Value::Dict(body.clone()));
      }
      Message::Error { code, message, .. } => {
        top.insert(b"y".to_vec(), Value::bytes(&b"e"[..]));
        top.insert(
          b"e".to_vec(),
          Value::List(vec![Value::Int(*code), Value::bytes(message.as_bytes())]),
        );
      }
    }

    Value::Dict(top)
  }
}

fn node_id_field(dict: &BTreeMap<Vec<u8>, Value>, field: &'static str) -> Result<NodeId> {
  let bytes = dict
    .get(field.as_bytes())
    .and_then(Value::as_bytes)
    .context(error::MessageField { field })?;
  NodeId::from_slice(bytes)
}

fn query_args(query: &Query) -> BTreeMap<Vec<u8>, Value> {
  let mut args = BTreeMap::new();
  match query {
    Query::Ping { id } => {
      args.insert(b"id".to_vec(), Value::bytes(id.as_bytes().to_vec()));
    }
    Query::FindNode { id, target } => {
      args.insert(b"id".to_vec(), Value::bytes(id.as_bytes().to_vec()));
      args.insert(b"target".to_vec(), Value::bytes(target.as_bytes().to_vec()));
    }
    Query::GetPeers { id, info_hash } => {
      args.insert(b"id".to_vec(), Value::bytes(id.as_bytes().to_vec()));
      args.insert(b"info_hash".to_vec(), Value::bytes(info_hash.as_bytes().to_vec()));
    }
    Query::AnnouncePeer {
      id,
      info_hash,
      port,
      token,
    } => {
      args.insert(b"id".to_vec(), Value::bytes(id.as_bytes().to_vec()));
      args.insert(b"info_hash".to_vec(), Value::bytes(info_hash.as_bytes().to_vec()));
      args.insert(b"port".to_vec(), Value::Int(*port as i64));
      args.insert(b"token".to_vec(), Value::bytes(token.clone()));
    }
  }
  args
}

/// Encode up to `K` closest nodes as a concatenation of 26-byte compact
/// node info entries.
pub fn encode_compact_nodes(nodes: &[RemoteNode]) -> Vec<u8> {
  let mut out = Vec::with_capacity(nodes.len() * COMPACT_NODE_LEN);
  for node in nodes {
    out.extend_from_slice(node.id.as_bytes());
    out.extend_from_slice(&node.addr.ip().octets());
    out.extend_from_slice(&node.addr.port().to_be_bytes());
  }
  out
}

/// Decode a compact node info blob, rejecting a length that isn't a
/// multiple of 26 bytes.
pub fn decode_compact_nodes(bytes: &[u8]) -> Result<Vec<(NodeId, SocketAddrV4)>> {
  if bytes.len() % COMPACT_NODE_LEN != 0 {
    return Err(Error::CompactNodeInfoLength { len: bytes.len() });
  }
  Ok(
    bytes
      .chunks_exact(COMPACT_NODE_LEN)
      .map(|chunk| {
        let id = NodeId::from_slice(&chunk[0..20]).expect("chunk is exactly 20 bytes");
        let ip = Ipv4Addr::new(chunk[20], chunk[21], chunk[22], chunk[23]);
        let port = u16::from_be_bytes([chunk[24], chunk[25]]);
        (id, SocketAddrV4::new(ip, port))
      })
      .collect(),
  )
}
