#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

use std::{io::Read, path::PathBuf, sync::Arc};

use clap::Parser;
use hamail_common::{Address, Message, TransportEvent, TransportListener, internal, logging};

/// Send a message through a pool of redundant mail server connections
#[derive(Parser, Debug)]
#[command(name = "hamail")]
#[command(version)]
struct Cli {
    /// Configuration file, instead of the usual search locations
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured hosts (comma-separated)
    #[arg(long)]
    hosts: Option<String>,

    #[arg(short, long)]
    from: Address,

    #[arg(short, long, required = true)]
    to: Vec<Address>,

    #[arg(long)]
    cc: Vec<Address>,

    #[arg(long)]
    bcc: Vec<Address>,

    #[arg(short, long)]
    subject: Option<String>,

    /// Message body; read from stdin when omitted
    #[arg(short, long)]
    body: Option<String>,
}

struct OutcomeLogger;

impl TransportListener for OutcomeLogger {
    fn on_event(&self, event: &TransportEvent) {
        internal!(
            level = INFO,
            kind = ?event.kind,
            delivered = event.delivered.len(),
            invalid = event.invalid.len(),
            "Delivery finished"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let path = match cli.config {
        Some(path) => path,
        None => hamail::find_config_file()?,
    };
    let mut config = hamail::Config::load(&path)?;
    if let Some(hosts) = &cli.hosts {
        config.pool = config.pool.with_hosts(hosts.split(',').map(str::trim));
    }

    let body = match cli.body {
        Some(body) => body,
        None => {
            let mut body = String::new();
            std::io::stdin().read_to_string(&mut body)?;
            body
        }
    };

    let mut message = Message::new().from_address(cli.from).body(body);
    if let Some(subject) = cli.subject {
        message = message.subject(subject);
    }
    for to in cli.to {
        message = message.to(to);
    }
    for cc in cli.cc {
        message = message.cc(cc);
    }
    for bcc in cli.bcc {
        message = message.bcc(bcc);
    }
    let recipients = message.all_recipients().cloned().collect::<Vec<_>>();

    let proxy = config.proxy()?;
    proxy.add_listener(Arc::new(OutcomeLogger)).await;
    proxy.connect().await?;

    let sent = proxy.send_message(&message, &recipients).await;
    proxy.close().await;

    sent.map_err(Into::into)
}
