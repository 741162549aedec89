//! `bgpkit-viewstore` -- runs the view-store server, or connects as a
//! diagnostic consumer that logs every dispatched view it receives.

use bgpkit_viewstore::wire::client::{Broker, BrokerCommand};
use bgpkit_viewstore::wire::message::{ClientInterest, Message};
use bgpkit_viewstore::wire::server::Server;
use bgpkit_viewstore::Config;
use clap::{Parser, Subcommand};
use log::info;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Opts {
    #[clap(subcommand)]
    command: Command,

    /// Server bind/connect URI, e.g. `tcp://127.0.0.1:6300`.
    #[clap(long, global = true)]
    server_uri: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the view-store server: accepts producer/consumer connections and
    /// dispatches completed views.
    Serve {
        #[clap(long, default_value_t = 60)]
        bucket_size_secs: u32,
        #[clap(long, default_value_t = 30)]
        window_len: u32,
        /// Suppress `Partial` dispatches; only publish `FirstFull`/`Full`.
        #[clap(long)]
        no_partial: bool,
    },
    /// Connects as a pure consumer and logs every dispatched view's size.
    Watch {
        #[clap(long, default_value = "viewstore-watch")]
        name: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let opts = Opts::parse();

    let mut config = Config::default();
    if let Some(uri) = &opts.server_uri {
        config.server_uri = uri.clone();
    }

    match opts.command {
        Command::Serve {
            bucket_size_secs,
            window_len,
            no_partial,
        } => {
            config.bucket_size_secs = bucket_size_secs;
            config.window_len = window_len;
            config.publish_partial = !no_partial;
            let addr = strip_scheme(&config.server_uri).to_string();
            info!(
                "starting view-store server on {addr} at {}",
                chrono::Local::now().to_rfc3339()
            );
            let server = Server::new(config);
            if let Err(e) = server.run(&addr).await {
                eprintln!("server error: {e}");
                std::process::exit(1);
            }
        }
        Command::Watch { name } => {
            let interest = ClientInterest::CONSUMES_FULL | ClientInterest::CONSUMES_PARTIAL;
            let broker = Broker::new(name, interest, config.clone());
            let (inbox_tx, mut inbox_rx) = tokio::sync::mpsc::unbounded_channel();
            let (_commands_tx, commands_rx) = tokio::sync::mpsc::unbounded_channel::<BrokerCommand>();
            let server_uri = config.server_uri.clone();
            tokio::spawn(async move {
                broker.run(&server_uri, inbox_tx, commands_rx).await;
            });

            while let Some(msg) = inbox_rx.recv().await {
                if let Message::Publish { tag, payload } = msg {
                    info!("received {tag:?} publication, {} bytes", payload.len());
                }
            }
        }
    }
}

fn strip_scheme(uri: &str) -> &str {
    uri.rsplit_once("://").map(|(_, rest)| rest).unwrap_or(uri)
}
