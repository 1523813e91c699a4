use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing_subscriber::{fmt, EnvFilter};

use parenting_assistant::completion::HttpCompletionExchange;
use parenting_assistant::console::Console;
use parenting_assistant::models::OpenAICompatible;
use parenting_assistant::orchestrator::ChatOrchestrator;
use parenting_assistant::repository::SessionRepository;
use parenting_assistant::server;
use parenting_assistant::settings::{CompletionSettings, ModelParams, ServerSettings};
use parenting_assistant::storage::{MemoryStore, SessionStore, SqliteSessionStore};

#[derive(Debug, Parser)]
#[command(name = "parenting_assistant")]
#[command(about = "Parenting chat assistant: completion endpoint and terminal chat", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the chat completion endpoint
    Serve {
        #[arg(long, default_value = "127.0.0.1:7171")]
        listen: String,
        /// Expose Prometheus metrics on this address
        #[arg(long)]
        metrics_listen: Option<String>,
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        #[arg(long, env = "OPENAI_BASE_URL")]
        base_url: Option<String>,
        #[arg(long, env = "PA_MODEL")]
        model: Option<String>,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long)]
        temperature: Option<f32>,
    },
    /// Chat in the terminal against a running endpoint
    Chat {
        #[arg(long, env = "PA_CHAT_ENDPOINT", default_value = "http://127.0.0.1:7171/api/chat")]
        endpoint: String,
        /// SQLite URL for saved sessions (defaults to the XDG data dir)
        #[arg(long, env = "PA_DATABASE_URL")]
        database: Option<String>,
        /// Keep sessions in memory only
        #[arg(long, conflicts_with = "database")]
        ephemeral: bool,
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
        #[arg(long)]
        no_color: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_console<S: SessionStore>(
    store: S,
    exchange: HttpCompletionExchange,
    ansi: bool,
) -> anyhow::Result<()> {
    let repo = SessionRepository::initialize(store).await?;
    let window = CompletionSettings::default().history_window;
    let orchestrator = ChatOrchestrator::new(Arc::new(Mutex::new(repo)), exchange).with_history_window(window);
    let mut console = Console::new(orchestrator, ansi).await;
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    console.run(stdin, &mut stdout).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Commands::Serve { listen, metrics_listen, api_key, base_url, model, max_tokens, temperature } => {
            let addr: SocketAddr = listen.parse()?;
            let completion = CompletionSettings::resolve(&ModelParams { model, temperature, max_tokens })?;
            let settings = ServerSettings { api_key, base_url, completion };
            let key = settings.require_api_key()?;

            if let Some(metrics_addr) = metrics_listen {
                let metrics_addr: SocketAddr = metrics_addr.parse()?;
                metrics_exporter_prometheus::PrometheusBuilder::new()
                    .with_http_listener(metrics_addr)
                    .install()?;
                tracing::info!(%metrics_addr, "metrics exporter listening");
            }

            let model = Arc::new(OpenAICompatible::new(settings.base_url(), key));
            let state = server::AppState::new(model, settings.completion.clone());
            server::serve(addr, state).await?;
        }
        Commands::Chat { endpoint, database, ephemeral, timeout_secs, no_color } => {
            let exchange = HttpCompletionExchange::with_timeout(&endpoint, Duration::from_secs(timeout_secs))?;
            tracing::debug!(endpoint = %exchange.endpoint(), "chat console starting");
            if ephemeral {
                run_console(MemoryStore::new(), exchange, !no_color).await?;
            } else {
                let store = SqliteSessionStore::initialize(database).await?;
                run_console(store, exchange, !no_color).await?;
            }
        }
    }
    Ok(())
}
