//! Imports shared by nearly every module, so submodules don't each
//! repeat the same boilerplate `use` block.

pub(crate) use crate::{
  bencode::Value,
  error::{self, Error, Result},
  id::NodeId,
};

pub(crate) use snafu::{OptionExt, ResultExt};

pub(crate) use std::{
  collections::BTreeMap,
  fmt,
  io,
  net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket},
  str::FromStr,
  sync::{Arc, Mutex},
  time::{Duration, Instant},
};
