use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;
use uavmon_instances::{GenerateParams, GeneratedInstance, TimeScale};
use uavmon_runner::{
    CompletionStore, DispatchConfig, Dispatcher, FileCompletionStore, PreconditionError,
    ProcessExecutor, RunSummary,
};

#[derive(Parser)]
#[command(
    name = "uavmon",
    version,
    about = "Runs the UAV monitoring solver over every unsolved instance",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Only dispatch instances whose file name starts with this prefix
    prefix: Option<String>,
    /// Project root (defaults to the nearest directory above the binary holding dispatch.yaml)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    /// Log verbosity on stderr: -v info, -vv debug, -vvv trace
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved layout and how many instances are solved or pending
    Describe { prefix: Option<String> },
    /// Remove keys from the completion set so those instances run again
    Forget {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Write new instance files
    #[command(subcommand)]
    Generate(GenerateCommand),
}

#[derive(Subcommand)]
enum GenerateCommand {
    /// From a Solomon VRPTW file (node coordinates)
    Solomon {
        source: PathBuf,
        /// One of C1, C2, R1, RC1
        #[arg(long)]
        family: String,
        /// Number of monitored targets (the depot is added on top)
        #[arg(long, default_value_t = 25)]
        targets: usize,
        #[command(flatten)]
        common: GenerateArgs,
    },
    /// From a tab-separated distance matrix
    Matrix {
        source: PathBuf,
        #[arg(long, default_value = "SZ_Gusu")]
        name: String,
        #[arg(long, default_value_t = 108)]
        base_horizon: u64,
        #[arg(long, default_value_t = 90)]
        base_endurance: u64,
        #[command(flatten)]
        common: GenerateArgs,
    },
}

#[derive(Args)]
struct GenerateArgs {
    #[arg(long, default_value_t = 30)]
    drones: u32,
    /// Planning horizon after rescaling
    #[arg(long, default_value_t = 12)]
    horizon: u32,
    #[arg(long, value_delimiter = ',', default_value = "3,6,12,18,24")]
    periods: Vec<u32>,
    #[arg(long, default_value_t = 1)]
    first_version: u32,
    #[arg(long, default_value_t = 1)]
    count: u32,
    #[arg(long, default_value = "p")]
    version_suffix: String,
    /// Seed for reproducible period assignment
    #[arg(long)]
    seed: Option<u64>,
    /// Output directory (defaults to the input root)
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = cli.json;
    match run_command(cli) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&error_payload(&err));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn error_payload(err: &anyhow::Error) -> Value {
    let code = if err.downcast_ref::<PreconditionError>().is_some() {
        "precondition_failed"
    } else {
        "command_failed"
    };
    json_error(code, format!("{:#}", err), json!({}))
}

static INTERRUPT: Mutex<Option<Arc<AtomicBool>>> = Mutex::new(None);

fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let mut slot = INTERRUPT
        .lock()
        .map_err(|_| anyhow!("interruption handler state poisoned"))?;
    if let Some(flag) = slot.as_ref() {
        return Ok(flag.clone());
    }
    let flag = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler({
        let flag = flag.clone();
        move || flag.store(true, Ordering::Relaxed)
    })
    .context("cannot set interruption handler")?;
    *slot = Some(flag.clone());
    Ok(flag)
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    match root {
        Some(p) => {
            let p = if p.is_absolute() {
                p
            } else {
                std::env::current_dir()?.join(p)
            };
            Ok(p.canonicalize().unwrap_or(p))
        }
        None => uavmon_runner::install_root(),
    }
}

fn run_command(cli: Cli) -> Result<Option<Value>> {
    let root = resolve_root(cli.root)?;
    let config = DispatchConfig::load(&root)?;
    match cli.command {
        None => run_dispatch(config, cli.prefix.as_deref(), cli.json),
        Some(Commands::Describe { prefix }) => describe(config, prefix.as_deref(), cli.json),
        Some(Commands::Forget { keys }) => forget(&config, &keys, cli.json),
        Some(Commands::Generate(cmd)) => generate(&config, cmd, cli.json),
    }
}

fn run_dispatch(config: DispatchConfig, prefix: Option<&str>, json: bool) -> Result<Option<Value>> {
    let dispatcher = uavmon_runner::open_dispatcher(config)?;
    let mut dispatcher = dispatcher.with_interrupt(interrupt_flag()?);
    let summary = dispatcher.run_all(prefix, |position, total, outcome| {
        if !json {
            println!("{}", outcome.status_line(position, total));
        }
    })?;

    if json {
        return Ok(Some(json!({
            "ok": true,
            "command": "run",
            "prefix": prefix,
            "summary": serde_json::to_value(&summary)?,
        })));
    }
    print!("{}", render_report(&summary, prefix));
    Ok(None)
}

fn render_report(summary: &RunSummary, prefix: Option<&str>) -> String {
    let mut out = String::new();
    if summary.total == 0 {
        out.push_str(&format!(
            "warning: no instances match {}\n",
            prefix.unwrap_or("(all)")
        ));
    }
    out.push_str(&summary.render_table());
    out
}

fn describe(config: DispatchConfig, prefix: Option<&str>, json: bool) -> Result<Option<Value>> {
    let mut not_ready = config.validate().err().map(|e| e.to_string());
    let store = FileCompletionStore::snapshot(&config.completion_file)?;
    let executor = ProcessExecutor::new(config.clone());
    let dispatcher = Dispatcher::new(config.clone(), store, executor);
    let plan = match dispatcher.plan(prefix) {
        Ok(plan) => Some(plan),
        Err(err) => {
            not_ready.get_or_insert_with(|| format!("{:#}", err));
            None
        }
    };
    let solved = plan
        .as_ref()
        .map(|p| p.iter().filter(|p| p.completed).count());
    let pending: Option<Vec<String>> = plan.as_ref().map(|p| {
        p.iter()
            .filter(|p| !p.completed)
            .map(|p| p.instance.id.clone())
            .collect()
    });

    if json {
        return Ok(Some(json!({
            "ok": true,
            "command": "describe",
            "root": config.root.display().to_string(),
            "input_dir": config.input_dir.display().to_string(),
            "executable": config.executable.display().to_string(),
            "solver_config": config.solver_config.display().to_string(),
            "summary_results": config.summary_results.display().to_string(),
            "detail_results": config.detail_results.display().to_string(),
            "log_dir": config.log_dir.display().to_string(),
            "completion_file": config.completion_file.display().to_string(),
            "completion_key": config.completion_key.as_str(),
            "instances": plan.as_ref().map(Vec::len),
            "solved": solved,
            "pending": pending,
            "precondition_error": not_ready,
        })));
    }
    println!("root: {}", config.root.display());
    println!("input_dir: {}", config.input_dir.display());
    println!("executable: {}", config.executable.display());
    println!("solver_config: {}", config.solver_config.display());
    println!("summary_results: {}", config.summary_results.display());
    println!("detail_results: {}", config.detail_results.display());
    println!("log_dir: {}", config.log_dir.display());
    println!("completion_file: {}", config.completion_file.display());
    println!("completion_key: {}", config.completion_key.as_str());
    if let (Some(plan), Some(solved), Some(pending)) = (&plan, solved, &pending) {
        println!("instances: {}", plan.len());
        println!("solved: {}", solved);
        println!("pending: {}", pending.len());
    }
    if let Some(err) = not_ready {
        println!("not ready: {}", err);
    }
    Ok(None)
}

fn forget(config: &DispatchConfig, keys: &[String], json: bool) -> Result<Option<Value>> {
    let mut store = uavmon_runner::open_store(config)?;
    let mut removed = Vec::new();
    let mut missing = Vec::new();
    for key in keys {
        if store.remove(key)? {
            removed.push(key.clone());
        } else {
            missing.push(key.clone());
        }
    }
    if json {
        return Ok(Some(json!({
            "ok": true,
            "command": "forget",
            "removed": removed,
            "not_found": missing,
        })));
    }
    for key in &removed {
        println!("removed: {}", key);
    }
    for key in &missing {
        println!("not_found: {}", key);
    }
    Ok(None)
}

fn generate(config: &DispatchConfig, cmd: GenerateCommand, json: bool) -> Result<Option<Value>> {
    let (common, out_dir) = match &cmd {
        GenerateCommand::Solomon { family, common, .. } => {
            let base = common.out.clone().unwrap_or_else(|| config.input_dir.clone());
            (common, base.join(family))
        }
        GenerateCommand::Matrix { common, .. } => (
            common,
            common.out.clone().unwrap_or_else(|| config.input_dir.clone()),
        ),
    };
    let mut rng = match common.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut written = Vec::new();
    for n in common.first_version..common.first_version + common.count {
        let params = GenerateParams {
            drones: common.drones,
            horizon: common.horizon,
            periods: common.periods.clone(),
            version: format!("{}{}", n, common.version_suffix),
        };
        let instance = match &cmd {
            GenerateCommand::Solomon {
                source,
                family,
                targets,
                ..
            } => uavmon_instances::from_solomon(open_source(source)?, family, *targets, &params, &mut rng)?,
            GenerateCommand::Matrix {
                source,
                name,
                base_horizon,
                base_endurance,
                ..
            } => {
                let scale = TimeScale {
                    base_endurance: *base_endurance,
                    base_horizon: *base_horizon,
                };
                uavmon_instances::from_distance_matrix(open_source(source)?, name, scale, &params, &mut rng)?
            }
        };
        let path = instance.write_to(&out_dir)?;
        tracing::info!(path = %path.display(), "instance written");
        if !json {
            println!("wrote: {}", path.display());
            print_period_distribution(&instance);
        }
        written.push(path.display().to_string());
    }

    if json {
        return Ok(Some(json!({
            "ok": true,
            "command": "generate",
            "written": written,
        })));
    }
    Ok(None)
}

fn open_source(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("cannot open source {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn print_period_distribution(instance: &GeneratedInstance) {
    for (period, count) in instance.period_distribution() {
        println!("  period {}: {} targets", period, count);
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}
