//! Command-line interface for live GraphQL.
//!
//! # Usage
//!
//! ```bash
//! # Run the regions demo with every delivery directive
//! lgql regions --stream --defer-name --live-status --defer-status
//!
//! # Faster updates, stop after three seconds
//! lgql regions --live-status --interval-ms 200 --cancel-after-ms 3000
//!
//! # Load executor settings from a file
//! lgql regions --live-status --config lgql.json
//! ```

pub mod demo;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use demo::{DemoOptions, QueryFlags};
use lgql_runtime::{
    patch_channel, Executor, ExecutorConfig, Patch, Request, Response, TracingObserver,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "lgql")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the live regions demo and print every payload
    Regions(RegionsArgs),

    /// Print version information
    Version,
}

#[derive(Args, Debug, Clone)]
pub struct RegionsArgs {
    /// Stream the regions list (@stream)
    #[arg(long)]
    pub stream: bool,

    /// Defer region names (@defer)
    #[arg(long)]
    pub defer_name: bool,

    /// Follow status updates (@live)
    #[arg(long)]
    pub live_status: bool,

    /// Defer the status field (@defer)
    #[arg(long)]
    pub defer_status: bool,

    /// Milliseconds between status updates
    #[arg(long, default_value = "1000")]
    pub interval_ms: u64,

    /// Regions whose status keeps changing
    #[arg(long, value_delimiter = ',', default_value = "test2")]
    pub live_regions: Vec<String>,

    /// Maximum updates per live field
    #[arg(long)]
    pub live_limit: Option<usize>,

    /// Abort the session after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Cancel the session after this many milliseconds
    #[arg(long)]
    pub cancel_after_ms: Option<u64>,

    /// Executor configuration file (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Pretty-print payloads
    #[arg(long)]
    pub pretty: bool,
}

impl RegionsArgs {
    fn flags(&self) -> QueryFlags {
        QueryFlags {
            stream: self.stream,
            defer_name: self.defer_name,
            live_status: self.live_status,
            defer_status: self.defer_status,
        }
    }

    fn options(&self) -> DemoOptions {
        DemoOptions {
            interval: Duration::from_millis(self.interval_ms),
            live_regions: self.live_regions.clone(),
        }
    }

    /// Loads the config file, if any, and applies the flags on top of it.
    fn executor_config(&self) -> Result<ExecutorConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ExecutorConfig::default(),
        };
        if let Some(limit) = self.live_limit {
            config.live_emission_limit = limit;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.session_timeout_ms = Some(timeout_ms);
        }
        Ok(config)
    }
}

pub async fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Regions(args) => run_regions(&args, cli.verbose, cli.quiet).await,
        Commands::Version => {
            println!("lgql {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}

fn load_config(path: &Path) -> Result<ExecutorConfig, Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)?;
    let config: ExecutorConfig = serde_json::from_str(&source)
        .map_err(|e| format!("invalid config {}: {e}", path.display()))?;
    Ok(config)
}

async fn run_regions(
    args: &RegionsArgs,
    verbose: bool,
    quiet: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    let config = args.executor_config()?;
    let flags = args.flags();
    let options = args.options();

    if !quiet {
        println!("{} {}", "Query".blue().bold(), demo::query_text(flags));
    }
    if verbose {
        println!(
            "{} live regions: {}, interval: {}ms",
            "Config".blue(),
            options.live_regions.join(","),
            args.interval_ms
        );
        println!("{} {}", "Config".blue(), serde_json::to_string(&config)?);
    }

    let executor = Executor::with_config(demo::schema(), demo::resolvers(&options), config.clone())
        .with_observer(TracingObserver);

    let cancellation = CancellationToken::new();
    if let Some(after) = args.cancel_after_ms {
        let token = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(after)).await;
            info!(after_ms = after, "cancelling session");
            token.cancel();
        });
    }

    let (sink, mut stream) = patch_channel(config.patch_buffer);
    let execution = executor
        .execute(Request::new(demo::document(flags)), cancellation, Some(sink))
        .await;
    print_initial(&execution.response, args.pretty)?;

    let printer = async {
        while let Some(patch) = stream.recv().await {
            print_patch(&patch, args.pretty)?;
        }
        Ok::<_, serde_json::Error>(())
    };
    let (waited, printed) = tokio::join!(execution.completion.wait(), printer);
    printed?;

    match waited {
        Ok(stats) => {
            if !quiet {
                println!(
                    "{} {} patch(es) from {} unit(s)",
                    "Done".green().bold(),
                    stats.patches_sent,
                    stats.spawned
                );
            }
            Ok(if execution.response.has_data() { 0 } else { 1 })
        }
        Err(e) => {
            eprintln!("{} {}", "Error".red().bold(), e);
            Ok(1)
        }
    }
}

fn to_json<T: Serialize>(value: &T, pretty: bool) -> serde_json::Result<String> {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
}

fn print_initial(response: &Response, pretty: bool) -> serde_json::Result<()> {
    let label = if response.has_errors() {
        "Initial".yellow().bold()
    } else {
        "Initial".cyan().bold()
    };
    println!("{} {}", label, to_json(response, pretty)?);
    Ok(())
}

fn print_patch(patch: &Patch, pretty: bool) -> serde_json::Result<()> {
    let label = if patch.has_errors() {
        "Patch".red().bold()
    } else {
        "Patch".magenta().bold()
    };
    println!("{} {}", label, to_json(patch, pretty)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_regions_flags() {
        let cli = Cli::parse_from([
            "lgql",
            "regions",
            "--stream",
            "--live-status",
            "--live-regions",
            "test,test3",
            "--live-limit",
            "3",
            "-v",
        ]);
        assert!(cli.verbose);

        let Commands::Regions(args) = cli.command else {
            panic!("expected the regions command");
        };
        let flags = args.flags();
        assert!(flags.stream && flags.live_status);
        assert!(!flags.defer_name && !flags.defer_status);
        assert_eq!(args.options().live_regions, vec!["test", "test3"]);
        assert_eq!(args.options().interval, Duration::from_secs(1));

        let config = args.executor_config().unwrap();
        assert_eq!(config.live_emission_limit, 3);
        assert_eq!(config.session_timeout_ms, None);
    }
}
