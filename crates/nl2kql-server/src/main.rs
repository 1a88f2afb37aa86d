//! nl2kql server binary.
//!
//! Loads settings eagerly so a broken configuration fails the process before
//! a single request is served, then runs the MCP server over the selected
//! transport. Logs go to stderr: stdout belongs to the JSON-RPC stream.

use clap::{Parser, ValueEnum};
use nl2kql_core::Settings;
use nl2kql_mcp::http_transport::{HttpServer, HttpTransportState};
use nl2kql_mcp::{
    AzureOpenAiClient, KqlMcpServer, KustoRestEngine, KustoTools, QueryExecutor, QueryGenerator,
    ResourceRegistry, StdioNotificationSink,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nl2kql-server", version, about = "Natural-language-to-KQL MCP server")]
struct Cli {
    /// Path to the settings YAML file.
    #[arg(long, env = "NL2KQL_SETTINGS")]
    settings: PathBuf,

    /// Transport to serve MCP over.
    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,

    /// HTTP port (http transport only).
    #[arg(long, default_value_t = 3000)]
    port: u16,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Transport {
    Stdio,
    Http,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Settings failures are fatal before any request is served.
    let settings = match Settings::from_file(&cli.settings) {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            tracing::error!(path = %cli.settings.display(), error = %e, "could not load settings");
            std::process::exit(1);
        }
    };

    let chat = match AzureOpenAiClient::new(&settings.model) {
        Ok(chat) => Arc::new(chat),
        Err(e) => {
            tracing::error!(error = %e, "could not configure chat client");
            std::process::exit(1);
        }
    };
    let engine = Arc::new(KustoRestEngine::new());

    match cli.transport {
        Transport::Stdio => {
            let registry = Arc::new(ResourceRegistry::new(Arc::new(StdioNotificationSink)));
            let tools = KustoTools::new(
                settings.clone(),
                QueryGenerator::new(&settings, chat),
                QueryExecutor::new(settings.clone(), engine),
                registry.clone(),
            );
            let server = KqlMcpServer::new(tools, registry);
            server.run_stdio().await?;
        }
        Transport::Http => {
            let (request_tx, mut request_rx) = mpsc::channel(100);
            let state = Arc::new(HttpTransportState::new(request_tx));

            let registry = Arc::new(ResourceRegistry::new(state.clone()));
            let tools = KustoTools::new(
                settings.clone(),
                QueryGenerator::new(&settings, chat),
                QueryExecutor::new(settings.clone(), engine),
                registry.clone(),
            );
            let server = Arc::new(KqlMcpServer::new(tools, registry));

            // One task drains the request channel; each call is handled on it.
            let handler = server.clone();
            tokio::spawn(async move {
                while let Some((request, response_tx)) = request_rx.recv().await {
                    let response = handler.handle_request(request).await;
                    let _ = response_tx.send(response).await;
                }
            });

            HttpServer::new(cli.port, state).run().await?;
        }
    }

    Ok(())
}
