//! `starclient` command-line watcher: log in, attach to the event channel and print every
//! event on its own line until interrupted.

pub mod connectivity;
pub mod outputformatter;

use anyhow::Result;
use tracing::info;

use crate::events::{ActiveTransport, EventKind};
use connectivity::{print_usage, WatchArgs};
use outputformatter::{format_event, get_terminal_width};

pub async fn run(args: Vec<String>) -> Result<()> {
    let program = args.first().cloned().unwrap_or_else(|| "starclient".to_string());
    let opts = match WatchArgs::parse(&args) {
        Ok(Some(o)) => o,
        Ok(None) => {
            print_usage(&program);
            return Ok(());
        }
        Err(e) => {
            print_usage(&program);
            return Err(e);
        }
    };
    let client = connectivity::connect(&opts).await?;

    let width = get_terminal_width();
    for kind in EventKind::KNOWN {
        client.handlers().on_event(kind, move |e| println!("{}", format_event(e, width)));
    }
    client.connect_events();

    tokio::signal::ctrl_c().await?;
    let transport = match client.events().active_transport() {
        ActiveTransport::Channel => "channel",
        ActiveTransport::Polling => "polling",
        ActiveTransport::None => "none",
    };
    info!(target: "starclient::cli", transport, "interrupted; disconnecting");
    client.events().disconnect();
    Ok(())
}
