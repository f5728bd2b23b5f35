use crate::common::*;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility = "pub(crate)")]
pub enum Error {
  #[snafu(display("failed to bind UDP socket after {} attempts: {}", attempts, source))]
  SocketBind {
    source: io::Error,
    attempts: u32,
  },

  #[snafu(display("socket I/O error: {}", source))]
  Io {
    source: io::Error,
  },

  #[snafu(display("`node_id` must be exactly 40 lowercase hex characters, got `{}`", text))]
  NodeIdFormat {
    text: String,
  },

  #[snafu(display("bencode: unexpected end of input"))]
  BencodeTruncated,

  #[snafu(display("bencode: invalid length prefix at offset {}", offset))]
  BencodeBadLength {
    offset: usize,
  },

  #[snafu(display("bencode: non-digit character in integer at offset {}", offset))]
  BencodeBadInteger {
    offset: usize,
  },

  #[snafu(display("bencode: integer has a leading zero or forbidden `-0` at offset {}", offset))]
  BencodeLeadingZero {
    offset: usize,
  },

  #[snafu(display("bencode: unknown tag byte `{}` at offset {}", byte, offset))]
  BencodeUnknownTag {
    byte: char,
    offset: usize,
  },

  #[snafu(display("bencode: dict keys out of ascending order at offset {}", offset))]
  BencodeKeyOrder {
    offset: usize,
  },

  #[snafu(display("bencode: duplicate dict key"))]
  BencodeDuplicateKey,

  #[snafu(display("bencode: {} trailing bytes after top-level value", extra))]
  BencodeTrailingBytes {
    extra: usize,
  },

  #[snafu(display("bencode: dict keys must be byte strings"))]
  BencodeKeyNotString,

  #[snafu(display("KRPC message missing or malformed required field `{}`", field))]
  MessageField {
    field: &'static str,
  },

  #[snafu(display("KRPC message has unrecognized `y` value `{}`", y))]
  MessageUnknownType {
    y: String,
  },

  #[snafu(display("KRPC query has unrecognized `q` value `{}`", q))]
  MessageUnknownQuery {
    q: String,
  },

  #[snafu(display("node ID must be exactly 20 bytes, got {}", len))]
  NodeIdLength {
    len: usize,
  },

  #[snafu(display("compact node info must be a multiple of 26 bytes, got {}", len))]
  CompactNodeInfoLength {
    len: usize,
  },

  #[snafu(display("datagram of {} bytes exceeds the 1472-byte UDP payload limit", len))]
  DatagramTooLarge {
    len: usize,
  },

  #[snafu(display("node is not in the `Created` state"))]
  AlreadyStarted,

  #[snafu(display("node is not in the `Running` state"))]
  NotRunning,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
