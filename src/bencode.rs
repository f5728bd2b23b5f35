//! A hand-rolled bencode codec: bidirectional conversion between byte
//! sequences and a tagged value domain (integers, byte strings, lists,
//! dicts with ascending-ordered byte-string keys).
//!
//! Not built on `bendy`: the KRPC engine inspects dicts dynamically (read
//! `y`, dispatch on `q`, pull out whichever argument keys a given query
//! defines) rather than deserializing into a fixed struct shape, and the
//! wire format's canonical-ordering and duplicate-key rules are exactly
//! the contract this type needs to enforce itself rather than delegate.

use crate::common::*;

/// A decoded bencode value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
  Int(i64),
  Bytes(Vec<u8>),
  List(Vec<Value>),
  Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
  pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
    Value::Bytes(b.into())
  }

  pub fn as_int(&self) -> Option<i64> {
    match self {
      Value::Int(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_bytes(&self) -> Option<&[u8]> {
    match self {
      Value::Bytes(b) => Some(b),
      _ => None,
    }
  }

  pub fn as_list(&self) -> Option<&[Value]> {
    match self {
      Value::List(l) => Some(l),
      _ => None,
    }
  }

  pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
    match self {
      Value::Dict(d) => Some(d),
      _ => None,
    }
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.as_dict()?.get(key.as_bytes())
  }

  /// Encode this value to its canonical bencoded form. Canonical because
  /// `Dict` is backed by a `BTreeMap`, whose iteration order is always
  /// ascending by key: there is no separate "sort step" to forget.
  pub fn encode(&self) -> Vec<u8> {
    let mut out = Vec::new();
    self.encode_into(&mut out);
    out
  }

  fn encode_into(&self, out: &mut Vec<u8>) {
    match self {
      Value::Int(n) => {
        out.push(b'i');
        out.extend_from_slice(n.to_string().as_bytes());
        out.push(b'e');
      }
      Value::Bytes(b) => {
        out.extend_from_slice(b.len().to_string().as_bytes());
        out.push(b':');
        out.extend_from_slice(b);
      }
      Value::List(items) => {
        out.push(b'l');
        for item in items {
          item.encode_into(out);
        }
        out.push(b'e');
      }
      Value::Dict(map) => {
        out.push(b'd');
        for (key, value) in map {
          Value::Bytes(key.clone()).encode_into(out);
          value.encode_into(out);
        }
        out.push(b'e');
      }
    }
  }

  /// Decode a single top-level value, rejecting any trailing bytes.
  pub fn decode(input: &[u8]) -> Result<Value> {
    let mut decoder = Decoder::new(input);
    let value = decoder.value()?;
    if decoder.pos != input.len() {
      return Err(Error::BencodeTrailingBytes {
        extra: input.len() - decoder.pos,
      });
    }
    Ok(value)
  }
}

struct Decoder<'a> {
  input: &'a [u8],
  pos: usize,
}

impl<'a> Decoder<'a> {
  fn new(input: &'a [u8]) -> Self {
    Decoder { input, pos: 0 }
  }

  fn peek(&self) -> Result<u8> {
    self.input.get(self.pos).copied().context(error::BencodeTruncated)
  }

  fn value(&mut self) -> Result<Value> {
    match self.peek()? {
      b'i' => self.integer(),
      b'l' => self.list(),
      b'd' => self.dict(),
      b'0'..=b'9' => self.byte_string().map(Value::Bytes),
      other => Err(Error::BencodeUnknownTag {
        byte: other as char,
        offset: self.pos,
      }),
    }
  }

  fn integer(&mut self) -> Result<Value> {
    let start = self.pos;
    self.pos += 1; // 'i'

    let digits_start = self.pos;
    while self.peek()? != b'e' {
      let b = self.peek()?;
      if !(b.is_ascii_digit() || (b == b'-' && self.pos == digits_start)) {
        return Err(Error::BencodeBadInteger { offset: self.pos });
      }
      self.pos += 1;
    }
    let digits = std::str::from_utf8(&self.input[digits_start..self.pos])
      .map_err(|_| Error::BencodeBadInteger { offset: digits_start })?;

    if digits.is_empty() {
      return Err(Error::BencodeBadInteger { offset: digits_start });
    }
    if digits == "-0" || (digits.len() > 1 && digits.starts_with('0')) {
      return Err(Error::BencodeLeadingZero { offset: digits_start });
    }
    if digits.len() > 2 && digits.starts_with("-0") {
      return Err(Error::BencodeLeadingZero { offset: digits_start });
    }

    let n: i64 = digits
      .parse()
      .map_err(|_| Error::BencodeBadInteger { offset: start })?;

    self.pos += 1; // 'e'
    Ok(Value::Int(n))
  }

  fn byte_string(&mut self) -> Result<Vec<u8>> {
    let len_start = self.pos;
    while self.peek()? != b':' {
      if !self.peek()?.is_ascii_digit() {
        return Err(Error::BencodeBadLength { offset: self.pos });
      }
      self.pos += 1;
    }
    let len_digits = std::str::from_utf8(&self.input[len_start..self.pos]).unwrap();
    if len_digits.len() > 1 && len_digits.starts_with('0') {
      return Err(Error::BencodeBadLength { offset: len_start });
    }
    let len: usize = len_digits
      .parse()
      .map_err(|_| Error::BencodeBadLength { offset: len_start })?;
    self.pos += 1; // ':'

    let end = self
      .pos
      .checked_add(len)
      .filter(|&end| end <= self.input.len())
      .context(error::BencodeTruncated)?;

    let bytes = self.input[self.pos..end].to_vec();
    self.pos = end;
    Ok(bytes)
  }

  fn list(&mut self) -> Result<Value> {
    self.pos += 1; // 'l'
    let mut items = Vec::new();
    while self.peek()? != b'e' {
      items.push(self.value()?);
    }
    self.pos += 1; // 'e'
    Ok(Value::List(items))
  }

  fn dict(&mut self) -> Result<Value> {
    let start = self.pos;
    self.pos += 1; // 'd'
    let mut map = BTreeMap::new();
    let mut last_key: Option<Vec<u8>> = None;

    while self.peek()? != b'e' {
      if !self.peek()?.is_ascii_digit() {
        return Err(Error::BencodeKeyNotString);
      }
      let key = self.byte_string()?;

      if let Some(prev) = &last_key {
        match key.as_slice().cmp(prev.as_slice()) {
          std::cmp::Ordering::Equal => return Err(Error::BencodeDuplicateKey),
          std::cmp::Ordering::Less => return Err(Error::BencodeKeyOrder { offset: start }),
          std::cmp::Ordering::Greater => {}
        }
      }

      let value = self.value()?;
      last_key = Some(key.clone());
      map.insert(key, value);
    }
    self.pos += 1; // 'e'
    Ok(Value::Dict(map))
  }
}
