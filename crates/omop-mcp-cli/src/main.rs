use clap::Parser;
use omop_mcp_core::config::ServerConfig;
use omop_mcp_server::McpServer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// MCP server for OMOP CDM warehouses
#[derive(Parser)]
#[command(name = "omop-mcp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serve MCP over stdin/stdout
    #[arg(long, conflicts_with = "http")]
    stdio: bool,

    /// Serve MCP over HTTP with an SSE channel
    #[arg(long)]
    http: bool,

    /// Port for the HTTP transport
    #[arg(long, default_value_t = 8000, requires = "http")]
    port: u16,

    /// Path to config file (default: omop-mcp.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn init_tracing() {
    // Logs must stay off stdout: the stdio transport owns it
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<ServerConfig, String> {
    let path = match path {
        Some(path) => Some(path.clone()),
        None => {
            let default = PathBuf::from("omop-mcp.toml");
            default.exists().then_some(default)
        }
    };
    ServerConfig::load(path.as_deref()).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    // Exit code 2 distinguishes a crash from a startup failure
    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {info}");
        std::process::exit(2);
    }));

    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    if !cli.stdio && !cli.http {
        eprintln!("error: select a transport with --stdio or --http");
        std::process::exit(1);
    }

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: config load failed: {e}");
            std::process::exit(1);
        }
    };

    let server = match McpServer::from_config(config) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            eprintln!("error: server startup failed: {e}");
            std::process::exit(1);
        }
    };

    let result = if cli.stdio {
        omop_mcp_server::stdio::run(server).await
    } else {
        omop_mcp_server::http::serve(server, cli.port).await
    };

    if let Err(e) = result {
        eprintln!("error: transport failed: {e}");
        std::process::exit(1);
    }
}
