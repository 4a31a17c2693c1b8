//! Passive equipment that answers every primary.
//!
//! Demonstrates:
//! - Building a passive session from the builder
//! - Subscribing to state changes and incoming primaries
//! - Replying out of the event stream with `UnrepliedPrimary::reply`
//!
//! Usage:
//!   cargo run --example passive_echo
//!   cargo run --example passive_echo -- --port 5001
//!   cargo run --example passive_echo -- --debug

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use secs_device::{Item, Result, SecsMessage, Session, SessionEvent};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_PORT: u16 = 5000;

// ============================================================================
// Args
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    port: u16,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let port = args
            .iter()
            .position(|a| a == "--port")
            .and_then(|i| args.get(i + 1))
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            debug: args.iter().any(|a| a == "--debug"),
            port,
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "secs_device=debug"
    } else {
        "secs_device=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== Passive Echo ===\n");

    let session = Session::builder()
        .passive()
        .port(args.port)
        .linktest_interval(Duration::from_secs(30))
        .build()?;
    let mut events = session.subscribe();

    session.enable().await?;
    if let Some(addr) = session.local_addr() {
        println!("[1] Listening on {addr}");
    }
    println!("    Press Ctrl+C to exit\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SessionEvent::StateChanged(state) => println!("[state] {state}"),
                    SessionEvent::PrimaryReceived(entry) => {
                        let reply = answer(entry.message());
                        println!("[reply] {} -> {}", entry.message().label(), reply.label());
                        if let Err(e) = entry.reply(reply) {
                            println!("        reply failed: {e}");
                        }
                    }
                    SessionEvent::Message(message) => println!("[event] {}", message.label()),
                }
            }
        }
    }

    session.disable();
    println!("\n=== Done ===");
    Ok(())
}

/// Builds the secondary for `primary`.
fn answer(primary: &SecsMessage) -> SecsMessage {
    let item = match (primary.stream, primary.function) {
        // Are You There: model name and software revision
        (1, 1) => Item::list([Item::ascii("SIMEQ"), Item::ascii("1.0.0")]),
        // Establish Communications: COMMACK + model data
        (1, 13) => Item::list([
            Item::Binary(vec![0]),
            Item::list([Item::ascii("SIMEQ"), Item::ascii("1.0.0")]),
        ]),
        _ => Item::ascii("OK"),
    };
    primary.reply(Some(item))
}
