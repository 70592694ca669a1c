//! labramp - ramped load testing with plateau detection
//!
//! Command-line front end: runs test plans, evaluates plateau decisions and
//! renders reports.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use labramp::config::{ConfigLoader, LabConfig};
use labramp::executor::{build_runner, KubectlRunner, LocalRunner};
use labramp::plan::{sample_plan, Backend, ModeSetting, TestPlan};
use labramp::plateau::{is_plateaued, PlateauDecision, PlateauPolicy, PlateauTracker};
use labramp::report::{export, load_outcome, ExportFormat, ReportWriter};
use labramp::runner::{render_batch_script, PlanRunner, RunOptions, RunOutcome, StopReason};
use labramp::testing::{JobRunner, JobSpec};
use labramp::LabError;

/// File written by `labramp init`.
const INIT_PLAN_FILE: &str = "labramp-plan.toml";

#[derive(Parser)]
#[command(name = "labramp")]
#[command(version)]
#[command(about = "Ramped load testing that stops when throughput plateaus", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (merged over user and project configuration)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a test plan
    Run {
        /// Path to the plan file
        plan: PathBuf,

        /// Override the plan's execution mode
        #[arg(long, value_enum)]
        mode: Option<ModeSetting>,

        /// Override the plan's backend
        #[arg(long, value_enum)]
        backend: Option<Backend>,

        /// Kubernetes namespace for jobs
        #[arg(short, long)]
        namespace: Option<String>,

        /// Directory receiving run reports
        #[arg(long, value_name = "DIR")]
        results_dir: Option<PathBuf>,

        /// Print the jobs that would be submitted without running them
        #[arg(long)]
        dry_run: bool,

        /// Do not write a report directory
        #[arg(long)]
        no_report: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a plan file
    Validate {
        /// Path to the plan file
        plan: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Evaluate the plateau check against a throughput history
    Plateau {
        /// Throughput values, oldest first
        #[arg(long, value_delimiter = ',', required = true, allow_hyphen_values = true)]
        history: Vec<f64>,

        /// Minimum improvement (percent) that still counts as progress
        #[arg(long, default_value = "10", allow_hyphen_values = true)]
        min_improvement: f64,

        /// Number of consecutive flat stages required
        #[arg(long, default_value = "2")]
        steps: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the shell script a batch job would run
    Script {
        /// Path to the plan file
        plan: PathBuf,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render a previous run's outcome
    Report {
        /// Path to an outcome.json file
        outcome: PathBuf,

        /// Output format: json, csv, or markdown
        #[arg(short, long, default_value = "markdown")]
        format: String,
    },

    /// Write a starter plan to the current directory
    Init {
        /// Plan name
        #[arg(long, default_value = "my-ramp")]
        name: String,

        /// Overwrite an existing plan file
        #[arg(short, long)]
        force: bool,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the resolved configuration and the files it came from
    Show,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    match execute(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            let code = e.downcast_ref::<LabError>().map_or(1, LabError::exit_code);
            std::process::exit(code);
        }
    }
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default_filter = if verbose {
        "labramp=debug,info"
    } else {
        "labramp=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Logs go to stderr so --json output on stdout stays parseable.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Runs a command and returns the process exit code.
async fn execute(cli: Cli) -> Result<i32> {
    let loader = ConfigLoader::new(".");

    match cli.command {
        Commands::Run {
            plan,
            mode,
            backend,
            namespace,
            results_dir,
            dry_run,
            no_report,
            json,
        } => {
            let mut config = loader.load(cli.config.as_deref())?;
            if let Some(namespace) = namespace {
                config.namespace = namespace;
            }
            if let Some(dir) = results_dir {
                config.results_dir = dir;
            }

            let mut plan = TestPlan::load_unvalidated(&plan)?;
            if let Some(backend) = backend {
                plan.execution.backend = backend;
            }
            plan.validate()?;

            let options = RunOptions::from_config(&config).with_mode(mode);
            if dry_run {
                return print_dry_run(&plan, &config, options, json);
            }

            let backend = build_runner(plan.execution.backend, &config)?;
            run_plan(&plan, backend.as_ref(), &config, options, no_report, json).await
        }

        Commands::Validate { plan: path, json } => {
            let plan = TestPlan::from_file(&path)?;
            let policy = plan.plateau_policy()?;
            let stages = plan.stages();
            let mode = plan.execution_mode();

            if json {
                let summary = serde_json::json!({
                    "valid": true,
                    "name": plan.name(),
                    "stages": stages.len(),
                    "mode": mode.to_string(),
                    "backend": plan.execution.backend.to_string(),
                    "plateau": policy,
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "{} {} is valid",
                    "OK".green().bold(),
                    path.display()
                );
                println!("   Plan: {}", plan.name());
                println!(
                    "   Stages: {} ({} to {})",
                    stages.len(),
                    stages.first().map_or(0.0, |s| s.target_rate),
                    stages.last().map_or(0.0, |s| s.target_rate)
                );
                println!("   Mode: {} on {}", mode, plan.execution.backend);
                match policy {
                    Some(policy) => println!("   Plateau: {}", policy),
                    None => println!("   Plateau: disabled"),
                }
            }
            Ok(0)
        }

        Commands::Plateau {
            history,
            min_improvement,
            steps,
            json,
        } => {
            let policy = PlateauPolicy::new(min_improvement, steps)?;
            let plateaued = is_plateaued(&history, &policy);

            if json {
                let result = serde_json::json!({
                    "plateaued": plateaued,
                    "history": history,
                    "policy": policy,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let mut tracker = PlateauTracker::new(policy);
                for value in &history {
                    tracker.record(*value);
                }
                match tracker.decision() {
                    PlateauDecision::Plateau { baseline, window } => println!(
                        "{} throughput plateaued: {:?} vs baseline {} ({})",
                        "PLATEAU".yellow().bold(),
                        window,
                        baseline,
                        policy
                    ),
                    PlateauDecision::Continue => println!(
                        "{} throughput still improving ({})",
                        "IMPROVING".green().bold(),
                        policy
                    ),
                }
            }
            Ok(0)
        }

        Commands::Script { plan, output } => {
            let plan = TestPlan::from_file(&plan)?;
            let policy = plan.plateau_policy()?;
            let script = render_batch_script(&plan, &plan.stages(), policy.as_ref());
            match output {
                Some(path) => {
                    std::fs::write(&path, script)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("{} Script written to {}", "OK".green().bold(), path.display());
                }
                None => print!("{}", script),
            }
            Ok(0)
        }

        Commands::Report { outcome, format } => {
            let format: ExportFormat = format.parse()?;
            let outcome = load_outcome(&outcome)?;
            print!("{}", export(&outcome, format)?);
            Ok(0)
        }

        Commands::Init { name, force } => {
            let path = Path::new(INIT_PLAN_FILE);
            if path.exists() && !force {
                eprintln!(
                    "{} {} already exists. Use --force to overwrite.",
                    "Warning:".yellow().bold(),
                    path.display()
                );
                return Ok(1);
            }
            std::fs::write(path, sample_plan(&name))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{} Created {}", "OK".green().bold(), path.display());
            println!(
                "\n{} Edit the workload, then run: labramp run {}",
                "Next:".cyan().bold(),
                path.display()
            );
            Ok(0)
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let (config, sources) = loader.load_with_sources(cli.config.as_deref())?;
                println!("{}", "Configuration sources:".cyan().bold());
                for source in &sources {
                    let status = if source.loaded {
                        "loaded".green()
                    } else {
                        "not found".dimmed()
                    };
                    println!(
                        "   {:<9} {} ({})",
                        source.level.to_string(),
                        source.path.display(),
                        status
                    );
                }
                println!("{}", "─".repeat(40));
                print!("{}", config.to_toml_string()?);
                Ok(0)
            }
        },
    }
}

fn print_dry_run(
    plan: &TestPlan,
    config: &LabConfig,
    options: RunOptions,
    json: bool,
) -> Result<i32> {
    // Nothing is submitted, so the backend does not have to be reachable.
    let backend: Box<dyn JobRunner> = match plan.execution.backend {
        Backend::Kubernetes => Box::new(KubectlRunner::from_config(config)),
        Backend::Local => Box::new(LocalRunner::new()),
    };
    let runner = PlanRunner::new(plan, backend.as_ref(), options);
    let jobs = runner.dry_run()?;

    if json {
        let jobs: Vec<serde_json::Value> = jobs.iter().map(job_json).collect();
        let result = serde_json::json!({
            "plan": plan.name(),
            "mode": runner.mode().to_string(),
            "backend": backend.backend_name(),
            "jobs": jobs,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(0);
    }

    println!(
        "{} {} job(s) for plan '{}' ({} mode, {} backend)",
        "Dry run:".cyan().bold(),
        jobs.len(),
        plan.name(),
        runner.mode(),
        backend.backend_name()
    );
    println!("{}", "─".repeat(60));
    for job in &jobs {
        println!("   {} (timeout {}s)", job.name.bold(), job.timeout.as_secs());
        match job.args.as_slice() {
            [shell, flag, script] if flag == "-c" && script.lines().count() > 1 => {
                println!("      {} {} <script, {} lines>", shell, flag, script.lines().count());
            }
            args => println!("      {}", args.join(" ")),
        }
    }
    Ok(0)
}

fn job_json(job: &JobSpec) -> serde_json::Value {
    serde_json::json!({
        "name": job.name,
        "image": job.image,
        "args": job.args,
        "env": job.env,
        "timeout_secs": job.timeout.as_secs(),
    })
}

async fn run_plan(
    plan: &TestPlan,
    backend: &dyn JobRunner,
    config: &LabConfig,
    options: RunOptions,
    no_report: bool,
    json: bool,
) -> Result<i32> {
    let runner = PlanRunner::new(plan, backend, options);

    let spinner = if json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!(
        "Running '{}' ({} stages, {} mode)",
        plan.name(),
        plan.stages().len(),
        runner.mode()
    ));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let outcome = runner.run().await;
    spinner.finish_and_clear();
    let outcome = outcome.context("Run aborted")?;

    let report_dir = if no_report {
        None
    } else {
        Some(ReportWriter::new(&config.results_dir).write(&outcome)?)
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
        if let Some(dir) = &report_dir {
            println!("\n{} Report written to {}", "OK".green().bold(), dir.display());
        }
    }

    Ok(if outcome.stop_reason.is_failure() { 1 } else { 0 })
}

fn print_outcome(outcome: &RunOutcome) {
    println!(
        "\n{} {} (run {})",
        "Plan:".cyan().bold(),
        outcome.plan_name,
        outcome.run_id
    );
    println!("{}", "─".repeat(60));
    println!("   {:>5}  {:>12}  {:>12}  {:>9}", "Stage", "Target", "Throughput", "Change");
    for stage in &outcome.stages {
        let change = stage
            .improvement_percent
            .map(|p| format!("{:+.2}%", p))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "   {:>5}  {:>12}  {:>12.2}  {:>9}",
            stage.index, stage.target_rate, stage.throughput, change
        );
    }
    println!("{}", "─".repeat(60));

    let label = match &outcome.stop_reason {
        StopReason::Completed => "Completed:".green().bold(),
        StopReason::Plateau { .. } => "Plateau:".yellow().bold(),
        StopReason::StageFailed { .. } => "Failed:".red().bold(),
    };
    println!("{} {}", label, outcome.stop_reason);
    if let Some(peak) = outcome.peak_stage() {
        println!(
            "   Peak throughput {:.2} at stage {} (target {})",
            peak.throughput, peak.index, peak.target_rate
        );
    }
    if outcome.skipped_stages() > 0 {
        println!("   Skipped {} of {} stage(s)", outcome.skipped_stages(), outcome.planned_stages);
    }
}
