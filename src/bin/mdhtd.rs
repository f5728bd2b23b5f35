//! Command-line entry point: start a DHT node, print periodic stats,
//! and run until interrupted.

use mdht::{Message, Node, NodeConfig, NodeId};
use std::process;
use std::str::FromStr;
use std::time::Duration;
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(about = "A BitTorrent Mainline DHT (BEP 5) node")]
struct Opt {
  /// Node ID, as 40 lowercase hex characters. Random if omitted.
  #[structopt(long)]
  node_id: Option<String>,

  /// UDP port to bind. A random port is chosen if omitted.
  #[structopt(long)]
  port: Option<u16>,

  /// Bootstrap router, `host:port`. May be repeated; replaces the
  /// built-in defaults when given at least once.
  #[structopt(long = "bootstrap")]
  bootstrap: Vec<String>,

  /// Print each received message to stdout.
  #[structopt(short, long)]
  verbose: bool,

  /// Suppress stats output.
  #[structopt(short, long)]
  quiet: bool,
}

fn main() {
  pretty_env_logger::init();
  let opt = Opt::from_args();

  if let Err(err) = run(opt) {
    eprintln!("error: {}", err);
    process::exit(1);
  }
}

fn run(opt: Opt) -> mdht::Result<()> {
  let node_id = opt
    .node_id
    .as_deref()
    .map(NodeId::from_str)
    .transpose()?;

  let mut config = NodeConfig {
    node_id,
    port: opt.port,
    ..NodeConfig::default()
  };
  if !opt.bootstrap.is_empty() {
    config.bootstrap = opt.bootstrap;
  }

  let node = Node::new(config);

  if opt.verbose {
    node.add_message_handler(|message: &Message, sender: &mdht::RemoteNode| {
      println!("{} <- {:?}", sender.addr, message);
    });
  }

  node.start()?;
  println!("node {} listening", node.id());

  loop {
    std::thread::sleep(Duration::from_secs(10));
    if !opt.quiet {
      let stats = node.stats();
      println!(
        "active_nodes={} incoming={} outgoing={}",
        stats.active_nodes, stats.incoming, stats.outgoing
      );
    }
  }
}

