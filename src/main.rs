use anyhow::{Context, Result};
use anthropic_client::config::{ClientConfig, ClientOptions};
use anthropic_client::http::{HttpClient, RequestDescriptor};
use anthropic_client::pagination::{HttpPageFetcher, ItemStream, PageStream, Params};
use anthropic_client::runtime::{RealRuntime, Runtime};
use anthropic_client::sse::EventStream;
use clap::Parser;
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// anthropic-client - raw access to the Anthropic HTTP API
///
/// Credentials and defaults are read from ANTHROPIC_API_KEY,
/// ANTHROPIC_AUTH_TOKEN, ANTHROPIC_BASE_URL, ANTHROPIC_MAX_RETRIES and
/// ANTHROPIC_TIMEOUT_MS unless given as flags.
///
/// Examples:
///   anthropic-client get v1/models -q limit=5
///   anthropic-client stream v1/messages --data-file request.json
#[derive(Parser, Debug)]
#[command(author, version = env!("ANTHROPIC_CLIENT_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API base URL (defaults to https://api.anthropic.com)
    #[arg(long = "base-url", value_name = "URL", global = true)]
    base_url: Option<String>,

    /// API key sent as x-api-key
    #[arg(long = "api-key", value_name = "KEY", global = true)]
    api_key: Option<String>,

    /// Bearer token sent as Authorization
    #[arg(long = "auth-token", value_name = "TOKEN", global = true)]
    auth_token: Option<String>,

    /// Retries after the first attempt for transient failures
    #[arg(long = "max-retries", value_name = "N", global = true)]
    max_retries: Option<u32>,

    /// Per-attempt timeout in milliseconds
    #[arg(long = "timeout-ms", value_name = "MS", global = true)]
    timeout_ms: Option<u64>,

    /// Extra header, repeatable
    #[arg(
        long = "header",
        short = 'H',
        value_name = "NAME:VALUE",
        value_parser = parse_header,
        global = true
    )]
    headers: Vec<(String, String)>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Send a GET request and print the JSON response
    Get(GetArgs),

    /// Send a POST request and print the JSON response
    Post(PostArgs),

    /// Send a streaming POST request and print one event per line
    Stream(PostArgs),

    /// Walk a paginated list endpoint and print one item per line
    List(ListArgs),
}

#[derive(clap::Args, Debug)]
struct GetArgs {
    /// Request path, e.g. v1/models
    #[arg(value_name = "PATH")]
    path: String,

    /// Query parameter, repeatable
    #[arg(long = "query", short = 'q', value_name = "KEY=VALUE", value_parser = parse_key_value)]
    query: Vec<(String, String)>,
}

#[derive(clap::Args, Debug)]
struct PostArgs {
    /// Request path, e.g. v1/messages
    #[arg(value_name = "PATH")]
    path: String,

    #[command(flatten)]
    body: BodyArgs,
}

#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
struct BodyArgs {
    /// JSON request body
    #[arg(long = "data", value_name = "JSON")]
    data: Option<String>,

    /// File containing the JSON request body
    #[arg(long = "data-file", value_name = "FILE")]
    data_file: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct ListArgs {
    /// List endpoint path, e.g. v1/models
    #[arg(value_name = "PATH")]
    path: String,

    /// Query parameter, repeatable
    #[arg(long = "query", short = 'q', value_name = "KEY=VALUE", value_parser = parse_key_value)]
    query: Vec<(String, String)>,

    /// Response key holding the items
    #[arg(long = "item-key", default_value = "data")]
    item_key: String,

    /// Stop after printing this many items
    #[arg(long = "limit", value_name = "N")]
    limit: Option<usize>,

    /// Print whole page responses instead of items
    #[arg(long = "pages", conflicts_with = "limit")]
    pages: bool,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got {:?}", s)),
    }
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    match s.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected NAME:VALUE, got {:?}", s)),
    }
}

impl Cli {
    fn client_options(&self) -> ClientOptions {
        ClientOptions {
            api_key: self.api_key.clone(),
            auth_token: self.auth_token.clone(),
            base_url: self.base_url.clone(),
            timeout: self.timeout_ms.map(Duration::from_millis),
            max_retries: self.max_retries,
            extra_headers: self.headers.iter().cloned().collect(),
            ..Default::default()
        }
    }
}

impl BodyArgs {
    fn load(&self, runtime: &dyn Runtime) -> Result<Value> {
        let raw = match (&self.data, &self.data_file) {
            (Some(data), _) => data.clone(),
            (None, Some(path)) => runtime.read_to_string(path)?,
            (None, None) => anyhow::bail!("Either --data or --data-file is required"),
        };
        serde_json::from_str(&raw).context("Request body is not valid JSON")
    }
}

async fn run(cli: Cli, runtime: &dyn Runtime, out: &mut dyn Write) -> Result<()> {
    let config = ClientConfig::resolve(&cli.client_options(), runtime);
    let client = HttpClient::default();

    match cli.command {
        Commands::Get(args) => {
            let request =
                RequestDescriptor::get(args.path).with_query_map(args.query.into_iter().collect());
            let body = client.execute(&request, &config).await?;
            writeln!(out, "{}", serde_json::to_string_pretty(&body)?)?;
        }
        Commands::Post(args) => {
            let request = RequestDescriptor::post(args.path, args.body.load(runtime)?);
            let body = client.execute(&request, &config).await?;
            writeln!(out, "{}", serde_json::to_string_pretty(&body)?)?;
        }
        Commands::Stream(args) => {
            let body = streaming_body(args.body.load(runtime)?);
            let request = RequestDescriptor::post(args.path, body);
            let mut events = client.open_stream(&request, &config).await?;
            let printed = print_events(&mut events, out).await;
            events.close();
            printed?;
        }
        Commands::List(args) => {
            let params: Params = args.query.into_iter().collect();
            let fetcher = HttpPageFetcher::new(client, config, args.path);
            if args.pages {
                let mut pages = PageStream::new(fetcher, params);
                while let Some(page) = pages.next_page().await? {
                    writeln!(out, "{}", serde_json::to_string(&page)?)?;
                }
            } else {
                let mut items = ItemStream::new(fetcher, params, args.item_key);
                let mut printed = 0;
                while args.limit.is_none_or(|limit| printed < limit) {
                    let Some(item) = items.next_item().await? else {
                        break;
                    };
                    writeln!(out, "{}", serde_json::to_string(&item)?)?;
                    printed += 1;
                }
            }
        }
    }

    Ok(())
}

/// Asks the server for an event stream unless the body already decides.
fn streaming_body(mut body: Value) -> Value {
    if let Value::Object(fields) = &mut body {
        fields.entry("stream").or_insert(Value::Bool(true));
    }
    body
}

async fn print_events(events: &mut EventStream, out: &mut dyn Write) -> Result<()> {
    while let Some(event) = events.next_event().await? {
        writeln!(out, "{}", serde_json::to_string(&event)?)?;
        out.flush()?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = RealRuntime;
    let mut stdout = std::io::stdout().lock();

    run(cli, &runtime, &mut stdout).await
}
