//! # Offload CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Run one function and print its result (raw JSON, no logs)
//! offload call -m pool.json double '[21]'
//!
//! # Submit 100 tasks on at most 4 workers and watch the pool drain
//! offload watch -m pool.json --max-workers 4 --count 100 slow '[250]'
//!
//! # Print the script each worker evaluates
//! offload program -m pool.json
//! ```
//!
//! Flags override the corresponding manifest keys.

use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use futures::StreamExt;
use offload_cli::{report, Manifest};
use serde_json::Value;

#[derive(FromArgs)]
/// Offload - run JavaScript functions on a pool of worker threads
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Call(CallArgs),
    Watch(WatchArgs),
    Program(ProgramArgs),
}

/// Arguments for running a single task.
///
/// Prints the result as compact JSON on stdout; errors go to stderr with a
/// non-zero exit code, so the output can be piped straight into `jq`.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// run one function and print its JSON result
struct CallArgs {
    /// path to the pool manifest
    #[argh(option, short = 'm')]
    manifest: String,

    /// override the manifest's maxWorkers
    #[argh(option, long = "max-workers")]
    max_workers: Option<usize>,

    /// override the manifest's taskTimeoutMs
    #[argh(option, long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// name of the registered function
    #[argh(positional)]
    function: String,

    /// JSON arguments: an array is spread, anything else is passed as the single argument
    #[argh(positional)]
    args: Option<String>,
}

/// Arguments for a load run that prints pool stats while tasks drain.
#[derive(FromArgs)]
#[argh(subcommand, name = "watch")]
/// submit a batch of tasks and print pool stats until they settle
struct WatchArgs {
    /// path to the pool manifest
    #[argh(option, short = 'm')]
    manifest: String,

    /// override the manifest's maxWorkers
    #[argh(option, long = "max-workers")]
    max_workers: Option<usize>,

    /// override the manifest's taskTimeoutMs
    #[argh(option, long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// number of tasks to submit
    #[argh(option, short = 'n', long = "count", default = "10")]
    count: usize,

    /// stats refresh interval in milliseconds
    #[argh(option, short = 'i', long = "interval", default = "500")]
    interval_ms: u64,

    /// name of the registered function
    #[argh(positional)]
    function: String,

    /// JSON arguments for every task
    #[argh(positional)]
    args: Option<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "program")]
/// print the worker program built from a manifest
struct ProgramArgs {
    /// path to the pool manifest
    #[argh(option, short = 'm')]
    manifest: String,
}

fn load_manifest(path: &str, max_workers: Option<usize>, timeout_ms: Option<u64>) -> Result<Manifest> {
    let mut manifest =
        Manifest::from_path(path).with_context(|| format!("failed to load manifest {}", path))?;

    if let Some(max_workers) = max_workers {
        manifest.config.max_workers = max_workers;
        // Keep the prewarm count within the new bound
        manifest.config.prewarm_workers = manifest.config.prewarm_workers.min(max_workers);
    }
    if let Some(timeout_ms) = timeout_ms {
        manifest.config.task_timeout_ms = Some(timeout_ms);
    }
    manifest.config.validate()?;
    Ok(manifest)
}

fn parse_arguments(text: Option<&str>) -> Result<Vec<Value>> {
    let Some(text) = text else {
        return Ok(Vec::new());
    };
    let value: Value =
        serde_json::from_str(text).with_context(|| format!("arguments are not valid JSON: {}", text))?;
    Ok(match value {
        Value::Array(items) => items,
        other => vec![other],
    })
}

async fn run_call(args: CallArgs) -> Result<()> {
    let manifest = load_manifest(&args.manifest, args.max_workers, args.timeout_ms)?;
    let arguments = parse_arguments(args.args.as_deref())?;

    let pool = manifest.into_pool()?;
    let result = pool.call(&args.function, arguments).await?;
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

async fn run_watch(args: WatchArgs) -> Result<()> {
    let manifest = load_manifest(&args.manifest, args.max_workers, args.timeout_ms)?;
    let arguments = parse_arguments(args.args.as_deref())?;

    let pool = manifest.into_pool()?;
    tracing::info!(
        function = %args.function,
        count = args.count,
        max_workers = pool.config().max_workers,
        "Submitting tasks"
    );

    let handles = (0..args.count)
        .map(|_| pool.submit(&args.function, arguments.clone()))
        .collect::<offload_common::Result<Vec<_>>>()?;
    let results = futures::future::join_all(handles);
    tokio::pin!(results);

    let mut ticks = pool.subscribe_stats(Duration::from_millis(args.interval_ms));
    let outcomes = loop {
        tokio::select! {
            outcomes = &mut results => break outcomes,
            Some(stats) = ticks.next() => println!("{}", report::stats_line(&stats)),
        }
    };

    println!("{}", report::stats_line(&pool.stats()));
    println!();
    println!("{}", report::metrics_table(&pool.metrics()));

    let failures: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().err()).collect();
    if let Some(first) = failures.first() {
        anyhow::bail!("{} of {} tasks failed; first error: {}", failures.len(), args.count, first);
    }
    Ok(())
}

fn run_program(args: ProgramArgs) -> Result<()> {
    let manifest = load_manifest(&args.manifest, None, None)?;
    let pool = manifest.into_pool()?;
    print!("{}", pool.program().render());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // `call` output is meant for piping; keep stdout clean
    if !matches!(cli.command, Commands::Call(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Call(args) => run_call(args).await,
        Commands::Watch(args) => run_watch(args).await,
        Commands::Program(args) => run_program(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn manifest_file(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_cli_parse_call() {
        let cli = Cli::from_args(&["offload"], &["call", "-m", "pool.json", "double", "[21]"]).unwrap();
        match cli.command {
            Commands::Call(args) => {
                assert_eq!(args.manifest, "pool.json");
                assert_eq!(args.function, "double");
                assert_eq!(args.args.as_deref(), Some("[21]"));
                assert_eq!(args.max_workers, None);
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_parse_call_without_args() {
        let cli = Cli::from_args(&["offload"], &["call", "-m", "pool.json", "now"]).unwrap();
        match cli.command {
            Commands::Call(args) => assert!(args.args.is_none()),
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_parse_watch_defaults() {
        let cli = Cli::from_args(&["offload"], &["watch", "-m", "pool.json", "slow"]).unwrap();
        match cli.command {
            Commands::Watch(args) => {
                assert_eq!(args.count, 10);
                assert_eq!(args.interval_ms, 500);
                assert_eq!(args.function, "slow");
            }
            _ => panic!("Expected Watch command"),
        }
    }

    #[test]
    fn test_cli_parse_watch_overrides() {
        let cli = Cli::from_args(
            &["offload"],
            &[
                "watch", "-m", "pool.json", "--max-workers", "4", "--timeout-ms", "250", "-n", "100",
                "-i", "50", "slow", "[10]",
            ],
        )
        .unwrap();
        match cli.command {
            Commands::Watch(args) => {
                assert_eq!(args.max_workers, Some(4));
                assert_eq!(args.timeout_ms, Some(250));
                assert_eq!(args.count, 100);
                assert_eq!(args.interval_ms, 50);
                assert_eq!(args.args.as_deref(), Some("[10]"));
            }
            _ => panic!("Expected Watch command"),
        }
    }

    #[test]
    fn test_cli_requires_manifest() {
        assert!(Cli::from_args(&["offload"], &["program"]).is_err());
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments(None).unwrap(), Vec::<Value>::new());
        assert_eq!(parse_arguments(Some("[1, \"a\"]")).unwrap(), vec![json!(1), json!("a")]);
        assert_eq!(parse_arguments(Some("{\"x\": 1}")).unwrap(), vec![json!({"x": 1})]);
        assert_eq!(parse_arguments(Some("21")).unwrap(), vec![json!(21)]);
        assert!(parse_arguments(Some("[1,")).is_err());
    }

    #[test]
    fn test_flags_override_manifest() {
        let file = manifest_file(r#"{"maxWorkers": 8, "prewarmWorkers": 6}"#);
        let path = file.path().to_str().unwrap();

        let manifest = load_manifest(path, Some(2), Some(300)).unwrap();
        assert_eq!(manifest.config.max_workers, 2);
        assert_eq!(manifest.config.prewarm_workers, 2);
        assert_eq!(manifest.config.task_timeout_ms, Some(300));

        let untouched = load_manifest(path, None, None).unwrap();
        assert_eq!(untouched.config.max_workers, 8);
        assert_eq!(untouched.config.task_timeout_ms, None);
    }

    #[test]
    fn test_override_is_validated() {
        let file = manifest_file(r#"{"maxWorkers": 2}"#);
        let path = file.path().to_str().unwrap();
        assert!(load_manifest(path, Some(0), None).is_err());
    }

    #[test]
    fn test_missing_manifest_reports_path() {
        let err = load_manifest("/nonexistent/pool.json", None, None).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/pool.json"));
    }
}
