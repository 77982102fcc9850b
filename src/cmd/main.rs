use clap::{CommandFactory, Parser};
use fleetun::client::Client;
use fleetun::config::Config;
use fleetun::server::Server;
use fleetun::utils;

/// IP over an encrypted TCP stream
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run as client
    #[arg(short = 'c', long)]
    client: bool,

    /// Run as server
    #[arg(short = 's', long)]
    server: bool,

    /// Config URL: tcp://password@host:port?cipher=NAME
    ///
    /// Falls back to the FLEE_URL environment variable.
    url: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = utils::init_tracing() {
        eprintln!("failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let url = args.url.clone().or_else(|| std::env::var("FLEE_URL").ok());
    let Some(url) = url else {
        let _ = Args::command().print_help();
        std::process::exit(1);
    };

    let config = match Config::from_url(&url) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("failed to parse url: {}", e);
            std::process::exit(1);
        }
    };

    if args.client == args.server {
        tracing::error!("pick exactly one of --client or --server");
        std::process::exit(1);
    }

    if args.client {
        run_client(config).await;
    } else {
        run_server(config).await;
    }
}

async fn run_client(config: Config) {
    let mut client = match Client::new(&config).await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("client setup failed: {}", e);
            std::process::exit(1);
        }
    };

    let cancel = client.cancel_token();
    let _signal = ctrlc2::set_handler(move || {
        tracing::info!("interrupt received");
        cancel.cancel();
        true
    })
    .expect("failed to install signal handler");

    if let Err(e) = client.run().await {
        tracing::error!("client failed: {}", e);
        std::process::exit(1);
    }
}

async fn run_server(config: Config) {
    let mut server = match Server::new(&config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("server setup failed: {}", e);
            std::process::exit(1);
        }
    };

    let cancel = server.cancel_token();
    let _signal = ctrlc2::set_handler(move || {
        tracing::info!("interrupt received");
        cancel.cancel();
        true
    })
    .expect("failed to install signal handler");

    if let Err(e) = server.run().await {
        tracing::error!("server failed: {}", e);
        std::process::exit(1);
    }
}
