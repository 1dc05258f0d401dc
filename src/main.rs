//! response-monitor - watch a generation request and alert on failure
//!
//! `watch` sends one request through the monitored transport and reports how
//! the round was classified. `classify` runs the content heuristic over stdin.

use std::io::Read;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

use response_monitor::config::{self, ConfigStore, FileConfigStore};
use response_monitor::transport::{wrap_fetch, FetchRequest, ReqwestFetch, ResponseBody};
use response_monitor::{Capabilities, ChannelDispatcher, EnvironmentInfo, Monitor, MonitorConfig};

const LOG_ENV: &str = "RESPONSE_MONITOR_LOG";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Parser)]
#[command(name = "response-monitor", version, about)]
struct Cli {
    /// Config file (default: user config directory)
    #[arg(long, global = true, env = "RESPONSE_MONITOR_CONFIG")]
    config: Option<String>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one generation request and report the round verdict
    Watch {
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "POST")]
        method: String,
        /// Request body, sent as is
        #[arg(long)]
        body: Option<String>,
        /// Extra header as `Name: value`, repeatable
        #[arg(long = "header", value_name = "NAME:VALUE")]
        headers: Vec<String>,
    },
    /// Read a response body from stdin and run the content heuristic on it
    Classify {
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Fire the test alert
    TestAlert {
        /// Test the success cue instead of the failure path
        #[arg(long)]
        success: bool,
    },
    /// Print the effective configuration
    Config {
        /// Write the effective configuration back to the file
        #[arg(long)]
        init: bool,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClassifyOutput {
    has_content: bool,
    disguised_failure: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("response-monitor error: {}", e);
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn config_store(path: Option<&str>) -> response_monitor::MonitorResult<FileConfigStore> {
    match path {
        Some(p) => Ok(FileConfigStore::new(config::expand_path(p))),
        None => FileConfigStore::default_location(),
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let caps = Capabilities::probe(&EnvironmentInfo::current_process());
    let store = config_store(cli.config.as_deref())?;
    let cfg = config::load_config(&store, &caps)?;

    match cli.command {
        Command::Watch {
            url,
            method,
            body,
            headers,
        } => watch(cfg, caps, url, method, body, headers).await,
        Command::Classify { content_type } => classify(content_type.as_deref()),
        Command::TestAlert { success } => test_alert(cfg, caps, success).await,
        Command::Config { init } => {
            if init {
                store.save(&cfg)?;
                eprintln!("wrote {}", store.path().display());
            }
            print!("{}", serde_yaml::to_string(&cfg)?);
            Ok(())
        }
    }
}

fn build_monitor(cfg: MonitorConfig, caps: Capabilities) -> Arc<Monitor> {
    let shared = config::shared(cfg);
    let dispatcher = Arc::new(ChannelDispatcher::native(shared.clone(), caps));
    // a terminal user is not looking at the response while it streams
    let monitor = Monitor::builder(shared, dispatcher).build();
    monitor.set_focused(false);
    monitor
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("header {raw:?} is not NAME:VALUE"))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

/// How long detached alert work (title blinking) needs before exit.
fn alert_grace(cfg: &MonitorConfig) -> Duration {
    if !cfg.title_blink {
        return Duration::from_millis(100);
    }
    Duration::from_millis(u64::from(cfg.title_blink_times) * u64::from(cfg.title_blink_gap) + 100)
}

async fn watch(
    cfg: MonitorConfig,
    caps: Capabilities,
    url: String,
    method: String,
    body: Option<String>,
    headers: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let grace = alert_grace(&cfg);
    let monitor = build_monitor(cfg, caps);
    let fetch = wrap_fetch(Arc::new(ReqwestFetch::with_connect_timeout(CONNECT_TIMEOUT)?), &monitor);

    let mut request = FetchRequest::new(method, url);
    for raw in &headers {
        let (name, value) = parse_header(raw)?;
        request = request.header(name, value);
    }
    if let Some(body) = body {
        request = request.body(body);
    }

    monitor.arm();
    let mut stdout = tokio::io::stdout();
    match fetch.fetch(request).await {
        Ok(response) => {
            tracing::debug!(status = response.status, "response received");
            match response.body {
                ResponseBody::Full(bytes) => stdout.write_all(&bytes).await?,
                ResponseBody::Stream(mut stream) => {
                    while let Some(chunk) = stream.next().await {
                        match chunk {
                            Ok(bytes) => stdout.write_all(&bytes).await?,
                            Err(e) => {
                                tracing::warn!(error = %e, "response body failed");
                                break;
                            }
                        }
                    }
                }
            }
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Err(e) => tracing::warn!(error = %e, "request failed"),
    }

    // the observer finalizes on its own task once the body is drained
    for _ in 0..50 {
        if monitor.last_verdict().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    match monitor.last_verdict() {
        Some(verdict) => {
            println!("{}", serde_json::to_string(&verdict)?);
            if verdict.alerted {
                tokio::time::sleep(grace).await;
            }
        }
        None => eprintln!("request did not open a round (not a generation endpoint?)"),
    }
    Ok(())
}

fn classify(content_type: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let mut input = Vec::new();
    std::io::stdin().read_to_end(&mut input)?;

    let patterns = Arc::new(response_monitor::heuristic::ContentPatterns::default());
    let mut sniffer = response_monitor::heuristic::ContentSniffer::new(Arc::clone(&patterns));
    sniffer.feed(&input);
    sniffer.finish();
    let has_content = sniffer.confirmed();
    let disguised_failure = patterns.is_disguised_failure(content_type.unwrap_or_default(), sniffer.head());

    let output = ClassifyOutput {
        has_content,
        disguised_failure,
    };
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

async fn test_alert(
    cfg: MonitorConfig,
    caps: Capabilities,
    success: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let grace = alert_grace(&cfg);
    let monitor = build_monitor(cfg, caps);
    if success {
        monitor.test_success_alert()?;
    } else {
        monitor.test_failure_alert();
        tokio::time::sleep(grace).await;
    }
    Ok(())
}
