//! noderpc CLI — query and stream a node from the terminal.
//!
//! Usage:
//! ```bash
//! # Chain head, consensus state and latency
//! noderpc head --url http://127.0.0.1:8648
//!
//! # Send a raw JSON-RPC call
//! noderpc call --url http://127.0.0.1:8648 --method getBlockByNumber --params '[1, false]'
//!
//! # Stream pushes until Ctrl-C (or the first one with --once)
//! noderpc subscribe --url http://127.0.0.1:8648 --method subscribeForHeadBlockHash
//! ```

mod logging;

use std::env;
use std::process;
use std::time::Instant;

use anyhow::{anyhow, bail, Context};
use serde_json::{json, Value};

use noderpc_client::{Auth, CallResult, ClientConfig, NodeClient};
use noderpc_core::codes;

use crate::logging::{init_tracing, LogConfig};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let logging = match log_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    init_tracing(&logging);

    let result = match args[1].as_str() {
        "head" => cmd_head(&args[2..]).await,
        "call" => cmd_call(&args[2..]).await,
        "subscribe" => cmd_subscribe(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("noderpc {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("noderpc {}", env!("CARGO_PKG_VERSION"));
    println!("Query and stream a blockchain node over JSON-RPC\n");
    println!("USAGE:");
    println!("    noderpc <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    head       Show block number, consensus state and latency");
    println!("    call       Send a raw JSON-RPC call");
    println!("    subscribe  Stream pushes for a subscription method");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("CONNECTION FLAGS:");
    println!("    --url <URL>          Node URL (http or https)");
    println!("    --config <FILE>      JSON client config; --url overrides its url");
    println!("    --token <SECRET>     Bearer token");
    println!("    --user <NAME>        Basic auth user (with --password)");
    println!("    --password <PASS>    Basic auth password");
    println!("    --timeout-ms <MS>    Per-call timeout, 0 disables\n");
    println!("CALL / SUBSCRIBE FLAGS:");
    println!("    --method <NAME>      RPC method  [required]");
    println!("    --params <JSON>      Positional params as a JSON array");
    println!("    --metadata           Ask for chain-state metadata (call)");
    println!("    --once               Stop after the first push (subscribe)\n");
    println!("LOGGING FLAGS:");
    println!("    --log-level <LEVEL>  trace | debug | info | warn | error (default: warn)");
    println!("    --log <CRATE=LEVEL>  Per-crate level, repeatable (e.g. noderpc-ws=debug)");
    println!("    --json-logs          Emit JSON log lines on stderr");
}

async fn cmd_head(args: &[String]) -> anyhow::Result<()> {
    let client = build_client(args)?;
    let options = client.options();
    println!("Querying {}...", client.call_channel().url());

    let start = Instant::now();
    let number = client.blockchain().get_block_number(options).await.into_data()?;
    let latency = start.elapsed();

    let consensus = client.consensus().is_consensus_established(options).await;
    let peers = client.network().get_peer_count(options).await;

    println!("  Block number: {number}");
    println!("  Latency:      {}ms", latency.as_millis());
    match consensus.into_data() {
        Ok(established) => println!("  Consensus:    {}", if established { "established" } else { "syncing" }),
        Err(e) => println!("  Consensus:    unknown ({})", e.message),
    }
    match peers.into_data() {
        Ok(count) => println!("  Peers:        {count}"),
        Err(e) => println!("  Peers:        unknown ({})", e.message),
    }
    Ok(())
}

async fn cmd_call(args: &[String]) -> anyhow::Result<()> {
    let client = build_client(args)?;
    let method = parse_flag(args, "--method").ok_or_else(|| anyhow!("--method is required"))?;
    let params = parse_params(args)?;
    let with_metadata = has_flag(args, "--metadata");

    let result: CallResult<Value> = client
        .call_channel()
        .call(&method, params, with_metadata, client.options())
        .await;
    let success = result.into_result()?;

    let output = match success.metadata {
        Some(metadata) => json!({ "data": success.data, "metadata": metadata }),
        None => success.data,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_subscribe(args: &[String]) -> anyhow::Result<()> {
    let client = build_client(args)?;
    let method = parse_flag(args, "--method").ok_or_else(|| anyhow!("--method is required"))?;
    let params = parse_params(args)?;

    let (tx, mut pushes) = tokio::sync::mpsc::unbounded_channel();
    let mut options = client.subscribe_options().on_push(move |push| {
        let _ = tx.send(push);
    });
    if has_flag(args, "--once") {
        options = options.once();
    }

    let sub = client
        .subscription_channel()
        .subscribe(&method, params, options)
        .await?;
    if let Some(id) = sub.subscription_id() {
        eprintln!("Subscribed to {method} (id {id}), Ctrl-C to stop");
    }

    loop {
        tokio::select! {
            push = pushes.recv() => match push {
                Some(CallResult::Success(push)) => {
                    println!("{}", serde_json::to_string(&push.data)?);
                }
                Some(CallResult::Failure(failure)) if failure.code == codes::CONNECTION_CLOSED => {
                    return Err(failure.into());
                }
                Some(CallResult::Failure(failure)) => {
                    eprintln!("push error {}: {}", failure.code, failure.message);
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    sub.close();
    Ok(())
}

/// Build the client from `--config`, `--url` and the auth/timeout flags.
fn build_client(args: &[String]) -> anyhow::Result<NodeClient> {
    let mut config = match parse_flag(args, "--config") {
        Some(path) => ClientConfig::from_file(&path).with_context(|| format!("loading {path}"))?,
        None => {
            let url = parse_flag(args, "--url").ok_or_else(|| anyhow!("--url or --config is required"))?;
            ClientConfig::new(url)
        }
    };
    if let Some(url) = parse_flag(args, "--url") {
        config.url = url;
    }

    if let Some(token) = parse_flag(args, "--token") {
        config.auth = Some(Auth::bearer(token));
    } else if let Some(user) = parse_flag(args, "--user") {
        let password = parse_flag(args, "--password").ok_or_else(|| anyhow!("--user needs --password"))?;
        config.auth = Some(Auth::basic(user, password));
    }

    if let Some(ms) = parse_flag(args, "--timeout-ms") {
        config.timeout_ms = ms.parse().with_context(|| format!("invalid --timeout-ms '{ms}'"))?;
    }

    tracing::debug!(url = %config.url, timeout_ms = config.timeout_ms, "building client");
    Ok(NodeClient::new(config)?)
}

fn parse_params(args: &[String]) -> anyhow::Result<Vec<Value>> {
    let Some(raw) = parse_flag(args, "--params") else {
        return Ok(Vec::new());
    };
    match serde_json::from_str(&raw).context("--params is not valid JSON")? {
        Value::Array(params) => Ok(params),
        other => bail!("--params must be a JSON array, got {other}"),
    }
}

fn log_config(args: &[String]) -> Result<LogConfig, String> {
    let mut config = LogConfig {
        level: parse_flag(args, "--log-level").unwrap_or_else(|| "warn".into()),
        json: has_flag(args, "--json-logs"),
        ..Default::default()
    };
    for spec in parse_all(args, "--log") {
        config = config.with_override(&spec)?;
    }
    Ok(config)
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn parse_all(args: &[String], flag: &str) -> Vec<String> {
    args.windows(2)
        .filter(|pair| pair[0] == flag)
        .map(|pair| pair[1].clone())
        .collect()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}
