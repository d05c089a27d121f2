use anyhow::{bail, Context, Result};
use mojo_model::config::{load_config, CoreConfig};
use mojo_model::{Model, ModelKind, RequestOptions, RestClient, SharedTransport};
use std::sync::Arc;
use tracing::{error, info};

const USAGE: &str = "usage: mojo-model <endpoint> <id> [--config <file>] [--graph <name>]";

struct Args {
    endpoint: String,
    id: String,
    config: Option<String>,
    graph: Option<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut positional = Vec::new();
    let mut config = None;
    let mut graph = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(args.next().context("--config needs a file")?),
            "--graph" => graph = Some(args.next().context("--graph needs a name")?),
            "-h" | "--help" => bail!(USAGE),
            flag if flag.starts_with("--") => bail!("unknown flag {}\n{}", flag, USAGE),
            _ => positional.push(arg),
        }
    }

    let [endpoint, id]: [String; 2] = positional
        .try_into()
        .map_err(|_| anyhow::anyhow!(USAGE))?;

    Ok(Args {
        endpoint,
        id,
        config,
        graph,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mojo_model=info".into()),
        )
        .init();

    let args = parse_args(std::env::args().skip(1))?;

    let config = match &args.config {
        Some(path) => load_config(path)?.with_env(),
        None => CoreConfig::from_env(),
    };
    info!(base_url = %config.transport.base_url, endpoint = %args.endpoint, "mojo-model probe");

    let client = RestClient::from_config(&config.transport)?;
    let transport: SharedTransport = Arc::new(client);
    let kind = Arc::new(ModelKind::from_config("probe", &args.endpoint, &config));

    // Numeric ids go out as numbers, everything else as strings
    let id = args
        .id
        .parse::<i64>()
        .map(serde_json::Value::from)
        .unwrap_or_else(|_| serde_json::Value::String(args.id.clone()));

    let mut options = RequestOptions::new();
    if let Some(graph) = &args.graph {
        options = options.with_graph(graph);
    }

    let model = Model::find(kind, transport, id, options).await;

    let errors = model.errors();
    if !errors.is_empty() {
        error!(errors = %serde_json::Value::Object(errors.clone()), "Fetch failed");
        println!("{}", serde_json::to_string_pretty(&errors)?);
        std::process::exit(1);
    }

    println!("{}", serde_json::to_string_pretty(&model.to_json())?);
    Ok(())
}
