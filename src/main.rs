//! Strand - CLI

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use strand::util::config::{load_config_file, ConfigBuilder, ConfigFile};
use strand::util::logger::{self, LogLevel};
use strand::{run, Config, Environment, LoggerKind, RunReport, Workload, NAME, VERSION};

/// Cooperative task runtime driver
#[derive(Parser, Debug)]
#[command(name = "strand")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a synthetic workload and print a report
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Root tasks to submit
        #[arg(long, default_value_t = 4)]
        roots: usize,

        /// Children spawned by each root
        #[arg(long, default_value_t = 3)]
        children: usize,

        /// Yields per child before it completes
        #[arg(long, default_value_t = 5)]
        steps: u32,

        /// Add a task that never completes
        #[arg(long)]
        runaway: bool,

        /// Add a task that fails on its first step
        #[arg(long)]
        fail: bool,

        /// Add a sleeper cancelled by a timeout after N ticks
        #[arg(long, value_name = "TICKS")]
        timeout: Option<u32>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the resolved configuration
    Config {
        #[command(flatten)]
        config: ConfigArgs,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print version information
    Version,
}

/// Options shared by commands that build a runtime.
#[derive(ClapArgs, Debug)]
struct ConfigArgs {
    /// Config file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// production | development
    #[arg(short, long)]
    env: Option<Environment>,

    /// none | console | proxy
    #[arg(long)]
    logger: Option<LoggerKind>,

    #[arg(long)]
    enable_names: Option<bool>,

    #[arg(long)]
    validate_subscriptions: Option<bool>,

    #[arg(long)]
    purge_runaway: Option<bool>,

    #[arg(long)]
    uncaught_handlers: Option<bool>,

    #[arg(long)]
    runaway_threshold: Option<u32>,

    #[arg(long)]
    max_drain_ticks: Option<usize>,
}

impl ConfigArgs {
    /// Environment defaults, then the file, then flags.
    fn resolve(&self) -> Result<Config> {
        let file = match &self.config {
            Some(path) => load_config_file(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => ConfigFile::default(),
        };
        let environment = self
            .env
            .or(file.environment)
            .unwrap_or_default();
        let mut builder = file.apply(ConfigBuilder::new(environment));

        let flags = ConfigFile {
            environment: None,
            enable_names: self.enable_names,
            validate_subscriptions: self.validate_subscriptions,
            purge_tasks_when_runaway_detected: self.purge_runaway,
            enable_uncaught_error_handlers: self.uncaught_handlers,
            logger: self.logger,
            runaway_threshold: self.runaway_threshold,
            max_drain_ticks: self.max_drain_ticks,
        };
        builder = flags.apply(builder);
        Ok(builder.build())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    logger::init_with_level(if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    });

    if args.verbose {
        eprintln!("{} version: {}", NAME, VERSION);
        eprintln!("Host: {}", std::env::consts::OS);
    }

    match args.command {
        Commands::Run {
            config,
            roots,
            children,
            steps,
            runaway,
            fail,
            timeout,
            json,
        } => {
            let config = config.resolve()?;
            let workload = Workload {
                roots,
                children,
                steps,
                runaway,
                fail,
                timeout,
            };
            let report = run(config, &workload);
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to encode report")?
                );
            } else {
                print_report(&report);
            }
        }
        Commands::Config { config, json } => {
            let config = config.resolve()?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&config).context("Failed to encode config")?
                );
            } else {
                println!(
                    "{}",
                    toml::to_string_pretty(&config).context("Failed to encode config")?
                );
            }
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    let stats = &report.stats;
    println!("{} ({})", "Run report".bold(), report.config.environment());
    println!("  submitted  {}", stats.submitted);
    println!("  completed  {}", stats.completed.green());
    println!("  cancelled  {}", stats.cancelled.yellow());
    println!("  errored    {}", stats.errored.red());
    println!("  runaways   {}", stats.runaways.red());
    println!("  ticks      {}", report.drain.ticks);

    if report.drain.bound_reached {
        println!(
            "  {} drain stopped with {} tasks pending",
            "warning:".yellow().bold(),
            report.drain.pending
        );
    }
    if report.uncaught > 0 {
        println!("  {} {} uncaught errors surfaced", "error:".red().bold(), report.uncaught);
    }
    for error in &report.rethrown {
        println!("  {} {}", "rethrown:".red().bold(), error);
    }
}
