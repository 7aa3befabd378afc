//! Hermes Gateway - Entry point

use std::path::PathBuf;

use tracing::{error, info};

use hermes_config::ConfigLoader;
use hermes_core::{BusClient, BusConnector};
use hermes_gateway::{nats_connector, Gateway};
use hermes_server::ShutdownSignal;

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("hermes-gateway {}", hermes_gateway::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Hermes Gateway - HTTP and WebSocket access to the Hermes bus

USAGE:
    hermes-gateway [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    HERMES__BUS__SERVERS                    Comma-separated NATS URLs
    HERMES__BUS__TOKEN                      NATS token
    HERMES__GATEWAY__HTTP_ADDR              Listen address (default: 0.0.0.0:8080)
    HERMES__GATEWAY__HTTP_PATH              HTTP request path (default: /api)
    HERMES__GATEWAY__WS_PATH                WebSocket path (default: /ws)
    HERMES__GATEWAY__AUTH_SUBJECTS          Comma-separated auth subjects
    HERMES__GATEWAY__NON_AUTH_SUBJECTS      Comma-separated subjects that skip auth
    HERMES__GATEWAY__NAMESPACE_SUBJECTS     Comma-separated namespaced subjects
    HERMES__GATEWAY__NAMESPACE_SUBJECT      Subject answering namespace lookups
    HERMES__TELEMETRY__LOGGING__LEVEL       Log filter (default: info)

EXAMPLES:
    hermes-gateway --config /etc/hermes/gateway.toml
    HERMES__BUS__SERVERS=nats://localhost:4222 hermes-gateway
"
    );
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let loader = ConfigLoader::new().with_defaults();
    let loader = match &args.config {
        Some(path) => loader.with_file(path),
        None => loader.with_optional_file("hermes.toml"),
    };
    let config = match loader
        .map(|loader| loader.with_env_prefix("HERMES"))
        .and_then(ConfigLoader::with_dotenv)
        .and_then(ConfigLoader::load)
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = hermes_telemetry::init_telemetry(&config.telemetry.to_telemetry()) {
        eprintln!("Failed to initialize telemetry: {e}");
        std::process::exit(1);
    }

    info!(
        "Starting Hermes gateway v{} ({})",
        hermes_gateway::VERSION,
        config.telemetry.service_name
    );

    let connector = nats_connector(&config.bus);
    let bus = match connector.connect().await {
        Ok(bus) => bus,
        Err(e) => {
            error!("Failed to connect to the bus: {}", e);
            std::process::exit(1);
        }
    };
    let client = BusClient::new(bus.clone()).with_timeout(config.bus.request_timeout());

    let listener = match tokio::net::TcpListener::bind(&config.gateway.http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", config.gateway.http_addr, e);
            std::process::exit(1);
        }
    };

    let shutdown = ShutdownSignal::with_os_signals();
    let gateway = Gateway::new(client, config.gateway);
    if let Err(e) = gateway.serve(listener, shutdown).await {
        error!("Gateway error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = bus.drain().await {
        error!("Failed to drain the bus: {}", e);
    }
    info!("Hermes gateway stopped");
}
