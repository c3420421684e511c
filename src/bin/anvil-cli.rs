use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anvil_client::{AnvilClient, PollPolicy, Submission, TaskHandle};
use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use reqwest::Method;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "anvil-cli",
    version,
    about = "Small async CLI for the Anvil management API"
)]
struct Cli {
    /// Appliance hostname or IP address.
    #[arg(long, env = "ANVIL_ADDRESS")]
    address: Option<String>,

    /// Management API port.
    #[arg(long, env = "ANVIL_PORT", default_value_t = 8443)]
    port: u16,

    /// Full base URL; overrides --address/--port when set.
    #[arg(long, env = "ANVIL_BASE_URL")]
    base_url: Option<String>,

    /// Username for session login. Login is skipped when unset.
    #[arg(long, env = "ANVIL_USERNAME")]
    username: Option<String>,

    /// Password for session login.
    #[arg(long, env = "ANVIL_PASSWORD")]
    password: Option<String>,

    /// Trust the appliance's self-signed certificate.
    #[arg(long)]
    insecure: bool,

    /// Verify the appliance software version after login.
    #[arg(long)]
    verify_version: bool,

    /// Emit compact JSON instead of pretty-printed output.
    #[arg(long)]
    compact: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List catalog operation ids.
    Operations {
        /// Filter operations by substring match on operation id.
        #[arg(long)]
        filter: Option<String>,
    },
    /// Call an endpoint by catalog operation id.
    Call(CallArgs),
    /// Send a raw HTTP request using method + path.
    Request(RequestArgs),
    /// Poll an already-submitted task until it reaches a terminal state.
    WaitTask(WaitTaskArgs),
}

#[derive(Debug, Args)]
struct CallArgs {
    /// Catalog operation id (for example: listNodes).
    operation_id: String,

    /// Path parameter in form key=value. Repeat as needed.
    #[arg(long = "path-param", value_name = "KEY=VALUE")]
    path_param: Vec<String>,

    /// Query parameter in form key=value. Repeat as needed.
    #[arg(long = "query", value_name = "KEY=VALUE")]
    query: Vec<String>,

    /// When the server defers the call to a task, poll it to completion.
    #[arg(long)]
    wait: bool,

    #[command(flatten)]
    body: BodyInput,

    #[command(flatten)]
    policy: PolicyArgs,
}

#[derive(Debug, Args)]
struct RequestArgs {
    /// HTTP method (GET, POST, PUT, DELETE, ...).
    method: String,

    /// Request path (for example: /mgmt/v1.2/rest/nodes).
    path: String,

    /// Query parameter in form key=value. Repeat as needed.
    #[arg(long = "query", value_name = "KEY=VALUE")]
    query: Vec<String>,

    #[command(flatten)]
    body: BodyInput,
}

#[derive(Debug, Args)]
struct WaitTaskArgs {
    /// Task id or full task status location.
    task: String,

    #[command(flatten)]
    policy: PolicyArgs,
}

#[derive(Debug, Args)]
struct BodyInput {
    /// JSON request body literal.
    #[arg(long, conflicts_with = "body_file")]
    body_json: Option<String>,

    /// Path to a file containing a JSON request body.
    #[arg(long, value_name = "PATH", conflicts_with = "body_json")]
    body_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct PolicyArgs {
    /// First wait between status queries, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    initial_delay_ms: u64,

    /// Cap on a single wait, in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    max_delay_ms: u64,

    /// Growth factor between waits.
    #[arg(long, default_value_t = 2.0)]
    backoff_multiplier: f64,

    /// Maximum number of status queries.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Overall polling budget, in seconds.
    #[arg(long, default_value_t = 600)]
    max_wait_secs: u64,
}

impl PolicyArgs {
    fn to_policy(&self) -> PollPolicy {
        let mut policy = PollPolicy::default()
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_backoff_multiplier(self.backoff_multiplier)
            .with_max_total_wait(Duration::from_secs(self.max_wait_secs));
        if let Some(attempts) = self.max_attempts {
            policy = policy.with_max_attempts(attempts);
        }
        policy
    }
}

/// Entry point for the async CLI.
///
/// Parses command-line arguments, builds a client, logs in when credentials
/// are provided, dispatches subcommands, and prints JSON output.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // `operations` is metadata-only; it does not require a client.
    if let Command::Operations { filter } = &cli.command {
        print_operations(filter.as_deref());
        return Ok(());
    }

    let mut client = build_client(&cli)?;

    if let Some(username) = &cli.username {
        let password = cli
            .password
            .as_deref()
            .context("--password (or ANVIL_PASSWORD) is required with --username")?;
        if cli.verify_version {
            client
                .login_verified(username, password)
                .await
                .context("login or version verification failed")?;
        } else {
            client.login(username, password).await.context("login failed")?;
        }
    }

    let output = match &cli.command {
        Command::Operations { .. } => unreachable!("handled above"),
        Command::Call(args) => call_operation(&client, args)
            .await
            .with_context(|| format!("operation call failed: '{}'", args.operation_id))?,
        Command::Request(args) => send_request(&client, args)
            .await
            .with_context(|| format!("request failed: {} {}", args.method, args.path))?,
        Command::WaitTask(args) => wait_task(&client, args)
            .await
            .with_context(|| format!("task polling failed: '{}'", args.task))?,
    };

    print_json(&output, cli.compact).context("failed to print JSON output")?;
    Ok(())
}

fn build_client(cli: &Cli) -> Result<AnvilClient> {
    let client = match (&cli.base_url, &cli.address) {
        (Some(url), _) => AnvilClient::from_base_url(url)
            .with_context(|| format!("failed to create client with base URL '{url}'"))?,
        (None, Some(address)) => AnvilClient::new(address, cli.port)
            .with_context(|| format!("failed to create client for '{address}:{}'", cli.port))?,
        (None, None) => bail!("one of --base-url or --address is required"),
    };

    if cli.insecure {
        return client
            .accepting_invalid_certs()
            .context("failed to enable self-signed certificate support");
    }
    Ok(client)
}

/// Prints the endpoint catalog.
///
/// When `filter` is provided, only operation ids containing that substring
/// are shown.
fn print_operations(filter: Option<&str>) {
    let filter = filter.map(str::to_ascii_lowercase);

    let operations: Vec<_> = AnvilClient::operations()
        .iter()
        .filter(|operation| {
            filter
                .as_ref()
                .is_none_or(|needle| operation.operation_id.to_ascii_lowercase().contains(needle))
        })
        .collect();

    let (operation_id_width, method_width) =
        operations
            .iter()
            .fold((0usize, 0usize), |(id_max, method_max), operation| {
                (
                    id_max.max(operation.operation_id.len()),
                    method_max.max(operation.method.len()),
                )
            });

    for operation in operations {
        println!(
            "{:<operation_id_width$}  {:<method_width$}  {}",
            operation.operation_id, operation.method, operation.path_template
        );
    }
}

/// Calls a catalog operation, optionally polling a deferred task.
async fn call_operation(client: &AnvilClient, args: &CallArgs) -> Result<Value> {
    let path_params = parse_pairs(&args.path_param, "--path-param")
        .context("failed to parse --path-param arguments")?;
    let query = parse_pairs(&args.query, "--query").context("failed to parse --query arguments")?;
    let body = parse_body(&args.body).context("failed to parse request body input")?;

    let borrowed_path: Vec<(&str, &str)> = path_params
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    let borrowed_query: Vec<(&str, &str)> = query
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();

    if args.wait {
        let policy = args.policy.to_policy();
        let value = client
            .execute(
                &args.operation_id,
                &borrowed_path,
                &borrowed_query,
                body,
                &policy,
            )
            .await?;
        return Ok(value);
    }

    match client
        .submit_operation(&args.operation_id, &borrowed_path, &borrowed_query, body)
        .await?
    {
        Submission::Done(value) => Ok(value),
        Submission::Accepted(handle) => Ok(serde_json::json!({
            "accepted": true,
            "taskId": handle.task_id(),
            "statusUri": handle.status_uri(),
        })),
    }
}

/// Sends a raw HTTP request using method + path.
async fn send_request(client: &AnvilClient, args: &RequestArgs) -> Result<Value> {
    // Validate the method eagerly so CLI errors are explicit before any
    // network call.
    let method = Method::from_str(&args.method)
        .with_context(|| format!("invalid HTTP method '{}'", args.method))?;
    let query = parse_pairs(&args.query, "--query").context("failed to parse --query arguments")?;
    let body = parse_body(&args.body).context("failed to parse request body input")?;
    let borrowed_query: Vec<(&str, &str)> = query
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();

    let value = client
        .request_json_with_query(method, &args.path, &borrowed_query, body)
        .await
        .with_context(|| format!("HTTP request failed for path '{}'", args.path))?;
    Ok(value)
}

/// Polls an existing task to a terminal state and prints its final report.
async fn wait_task(client: &AnvilClient, args: &WaitTaskArgs) -> Result<Value> {
    let handle = if args.task.contains('/') {
        TaskHandle::from_location(args.task.clone())
    } else {
        TaskHandle::from_location(format!(
            "{}/tasks/{}",
            anvil_client::catalog::API_PREFIX,
            args.task
        ))
    };

    let report = client
        .wait_for_task(&handle, &args.policy.to_policy())
        .await?;

    Ok(serde_json::json!({
        "taskId": handle.task_id(),
        "state": format!("{:?}", report.state),
        "progress": report.progress,
        "statusMessage": report.status_message,
        "result": report.result,
    }))
}

/// Parses repeated `key=value` arguments into owned key/value pairs.
///
/// Returns an error when a value does not include `=` or has an empty key.
fn parse_pairs(values: &[String], flag_name: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::with_capacity(values.len());
    for item in values {
        let Some((key, value)) = item.split_once('=') else {
            bail!("invalid {flag_name} value '{item}': expected key=value");
        };
        if key.is_empty() {
            bail!("invalid {flag_name} value '{item}': empty key");
        }
        pairs.push((key.to_owned(), value.to_owned()));
    }
    Ok(pairs)
}

/// Parses an optional JSON body from inline text or a file path.
///
/// Exactly one of `--body-json` or `--body-file` may be set.
fn parse_body(body: &BodyInput) -> Result<Option<Value>> {
    match (&body.body_json, &body.body_file) {
        (Some(raw), None) => serde_json::from_str(raw)
            .context("failed to parse JSON from --body-json")
            .map(Some),
        (None, Some(path)) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read --body-file '{}'", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| {
                    format!("failed to parse JSON in --body-file '{}'", path.display())
                })
                .map(Some)
        }
        (None, None) => Ok(None),
        (Some(_), Some(_)) => bail!("use only one of --body-json or --body-file"),
    }
}

/// Prints a JSON value either compact or pretty-formatted.
fn print_json(value: &Value, compact: bool) -> Result<()> {
    if compact {
        println!(
            "{}",
            serde_json::to_string(value).context("failed to render JSON")?
        );
    } else {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("failed to render JSON")?
        );
    }
    Ok(())
}
