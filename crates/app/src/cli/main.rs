//! Command-line front end.
//!
//! Drives an emulated device profile through the core model: inspect the
//! routing graph, flip links, route, rename. State lands in the same files
//! a GUI front end would use, so the two can be mixed freely.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use carmine_core::domain::routing;
use carmine_core::{pair_is_linked, set_pair_linked, Card, ControlIo, Node, StateStore};
use carmine_infra::profiles;

#[derive(Parser)]
#[command(name = "carmine", version, about = "USB audio interface control panel core")]
struct Cli {
    /// Emulated device profile to open
    #[arg(long, value_enum, default_value_t = Profile::Gen4i4)]
    profile: Profile,

    /// Directory for per-device state files
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Profile {
    Gen4i4,
    Gen3Solo,
}

#[derive(Subcommand)]
enum Command {
    /// Show the device, its routing and link state
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Connect a sink to a source ("Off" disconnects)
    Route { sink: String, source: String },
    /// Turn a pair's stereo link on
    Link { port: String },
    /// Turn a pair's stereo link off
    Unlink { port: String },
    /// Enable or disable a channel
    Enable {
        port: String,
        #[arg(value_parser = parse_on_off)]
        on: bool,
    },
    /// Set a channel's custom name; an empty name reverts to the default
    Rename { port: String, name: String },
    /// Forget all saved state for this device
    Reset,
}

fn parse_on_off(s: &str) -> std::result::Result<bool, String> {
    match s {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        other => Err(format!("expected on/off, got {other:?}")),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let dir = cli
        .state_dir
        .clone()
        .unwrap_or_else(StateStore::default_dir);
    let store = Rc::new(RefCell::new(StateStore::new(dir)));

    let io: Box<dyn ControlIo> = match cli.profile {
        Profile::Gen4i4 => Box::new(profiles::gen4_4i4()),
        Profile::Gen3Solo => Box::new(profiles::gen3_solo()),
    };
    let mut card = Card::open(io, Rc::clone(&store)).context("opening device")?;

    match cli.command {
        Command::Show { json } => {
            if json {
                show_json(&card)?;
            } else {
                show_text(&card);
            }
        }
        Command::Route { sink, source } => {
            let k = routing::sink_by_name(&card, &sink)
                .with_context(|| format!("no sink named {sink:?}"))?;
            let s = routing::source_by_name(&card, &source)
                .with_context(|| format!("no source named {source:?}"))?;
            card.set_value(card.sinks[k].elem, s as i64);
            println!(
                "{} <- {}",
                card.sinks[k].port.display_name,
                card.sources[routing::sink_source(&card, k)].port.display_name
            );
        }
        Command::Link { port } => {
            let n = find_node(&card, &port)
                .with_context(|| format!("no port named {port:?}"))?;
            if routing::partner_node(&card, n).is_none() {
                bail!("{port:?} has no partner channel to link with");
            }
            set_pair_linked(&mut card, n, true);
            println!("{} linked", routing::port(&card, routing::left_of_pair(&card, n)).display_name);
        }
        Command::Unlink { port } => {
            let n = find_node(&card, &port)
                .with_context(|| format!("no port named {port:?}"))?;
            set_pair_linked(&mut card, n, false);
            println!("{} unlinked", routing::port(&card, n).display_name);
        }
        Command::Enable { port, on } => {
            let n = find_node(&card, &port)
                .with_context(|| format!("no port named {port:?}"))?;
            let Some(id) = routing::port(&card, n).enable_elem else {
                bail!("{port:?} has no enable control");
            };
            card.set_value(id, i64::from(on));
        }
        Command::Rename { port, name } => {
            let n = find_node(&card, &port)
                .with_context(|| format!("no port named {port:?}"))?;
            let Some(id) = routing::port(&card, n).custom_name_elem else {
                bail!("{port:?} cannot be renamed");
            };
            card.set_bytes(id, name.as_bytes());
            println!("{}", routing::port(&card, n).display_name);
        }
        Command::Reset => {
            let serial = card.identity.serial.clone();
            store.borrow_mut().remove(&serial);
            info!(serial = %serial, "saved state removed");
        }
    }

    settle(&store).await;
    Ok(())
}

/// Wait out the debounce and write whatever is still pending.
async fn settle(store: &Rc<RefCell<StateStore>>) {
    loop {
        let deadline = store.borrow().next_deadline();
        let Some(d) = deadline else { break };
        let now = Instant::now();
        if d > now {
            tokio::time::sleep(d - now).await;
        }
        store.borrow_mut().flush_due(Instant::now());
    }
}

/// Accept default names first, then effective display names.
fn find_node(card: &Card, name: &str) -> Option<Node> {
    routing::sink_by_name(card, name)
        .map(Node::Sink)
        .or_else(|| routing::source_by_name(card, name).map(Node::Source))
        .or_else(|| {
            routing::all_nodes(card)
                .into_iter()
                .find(|&n| routing::port(card, n).display_name == name)
        })
}

fn link_marker(card: &Card, n: Node) -> &'static str {
    if pair_is_linked(card, n) {
        "linked"
    } else {
        ""
    }
}

fn show_text(card: &Card) {
    println!("{} ({})", card.identity.model, card.identity.serial);
    println!();
    println!("{:<22} {:<18} {}", "SINK", "SOURCE", "LINK");
    for i in 0..card.sinks.len() {
        let src = routing::sink_source(card, i);
        println!(
            "{:<22} {:<18} {}",
            card.sinks[i].port.display_name,
            card.sources[src].port.display_name,
            link_marker(card, Node::Sink(i)),
        );
    }
    println!();
    println!("{:<22} {}", "SOURCE", "LINK");
    for i in 1..card.sources.len() {
        println!(
            "{:<22} {}",
            card.sources[i].port.display_name,
            link_marker(card, Node::Source(i)),
        );
    }
}

fn show_json(card: &Card) -> Result<()> {
    let sources: Vec<_> = card
        .sources
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, s)| {
            serde_json::json!({
                "name": s.port.name,
                "display_name": s.port.display_name,
                "linked": pair_is_linked(card, Node::Source(i)),
                "enabled": s.port.enable_elem.map(|e| card.get_bool(e)),
            })
        })
        .collect();
    let sinks: Vec<_> = (0..card.sinks.len())
        .map(|i| {
            let s = &card.sinks[i];
            let src = routing::sink_source(card, i);
            serde_json::json!({
                "name": s.port.name,
                "display_name": s.port.display_name,
                "source": card.sources[src].port.display_name,
                "linked": pair_is_linked(card, Node::Sink(i)),
                "enabled": s.port.enable_elem.map(|e| card.get_bool(e)),
            })
        })
        .collect();
    let doc = serde_json::json!({
        "device": {
            "serial": card.identity.serial,
            "model": card.identity.model,
        },
        "sources": sources,
        "sinks": sinks,
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}
