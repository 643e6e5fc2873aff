use deck_core::config::{load_config_or_default, ConfigError, DeckConfig};
use deck_core::types::{ExecutionId, StartRequest, TaskId};
use deck_core::validation::{is_valid, Validate, ValidationIssue, ValidationLevel};
use deckd::{DeckService, ServiceError};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/deck.toml";
const DEFAULT_SQLITE_PATH: &str = ".deck/state.sqlite";
const DEFAULT_EVENT_LOG_ROOT: &str = ".deck/events";
const DEFAULT_RUN_TICK_MS: u64 = 250;

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error("{0}")]
    Args(String),
    #[error("failed to load config at {path}: {source}")]
    LoadConfig {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
    #[error("{0}")]
    InvalidConfig(String),
    #[error("failed to register signal handler: {source}")]
    Signal {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render record as json: {source}")]
    RenderJson {
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CommonCliArgs {
    config_path: PathBuf,
    sqlite_path: PathBuf,
    event_log_root: PathBuf,
}

impl Default for CommonCliArgs {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            sqlite_path: PathBuf::from(DEFAULT_SQLITE_PATH),
            event_log_root: PathBuf::from(DEFAULT_EVENT_LOG_ROOT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RunCliArgs {
    common: CommonCliArgs,
    task_id: String,
    command: String,
    workdir: Option<PathBuf>,
    tick_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ExecutionCliArgs {
    common: CommonCliArgs,
    execution_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ListCliArgs {
    common: CommonCliArgs,
    task_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RunningCliArgs {
    common: CommonCliArgs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    Help(String),
    Run(RunCliArgs),
    Cancel(ExecutionCliArgs),
    Show(ExecutionCliArgs),
    List(ListCliArgs),
    Running(RunningCliArgs),
}

fn main() {
    if let Err(err) = run() {
        eprintln!("taskdeck failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), MainError> {
    let mut argv = env::args();
    let program = argv.next().unwrap_or_else(|| "taskdeck".to_string());
    let command = parse_cli_args(argv.collect::<Vec<_>>(), &program)?;

    match command {
        CliCommand::Help(text) => {
            println!("{text}");
            Ok(())
        }
        CliCommand::Run(args) => run_execution(args),
        CliCommand::Cancel(args) => run_cancel(args),
        CliCommand::Show(args) => run_show(args),
        CliCommand::List(args) => run_list(args),
        CliCommand::Running(args) => run_running(args),
    }
}

fn run_execution(args: RunCliArgs) -> Result<(), MainError> {
    let config = load_validated_config(&args.common)?;
    let service = open_service(&args.common, &config)?;

    // One resident host at a time: rows left running by a dead host are
    // recovered here, before anything new starts.
    let recovered = service.recover()?;
    if !recovered.is_empty() {
        println!("recovered {} stale execution(s)", recovered.len());
    }

    let request = StartRequest {
        task_id: TaskId::new(args.task_id),
        command: args.command,
        working_directory: args.workdir,
    };
    let started = service.start(&request)?;
    println!(
        "execution {} started (session {})",
        started.execution_id, started.session_id
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .map_err(|source| MainError::Signal { source })?;
    }

    let tick = Duration::from_millis(args.tick_ms);
    loop {
        service.drain_notifications();
        if let Ok(chunks) = service.host().drain_output(started.session_id.as_ref()) {
            for chunk in chunks {
                print!("{}", chunk.text);
            }
        }

        if let Some(record) = service.show(&started.execution_id)? {
            if record.status.is_terminal() {
                match record.exit_code {
                    Some(code) => println!(
                        "execution {} finished: {} (exit code {code})",
                        record.id, record.status
                    ),
                    None => println!("execution {} finished: {}", record.id, record.status),
                }
                break;
            }
        }

        if shutdown.load(Ordering::SeqCst) {
            println!(
                "interrupted — cancelling execution {}",
                started.execution_id
            );
            service.cleanup();
            break;
        }

        thread::sleep(tick);
    }

    service.drain_notifications();
    Ok(())
}

fn run_cancel(args: ExecutionCliArgs) -> Result<(), MainError> {
    let config = load_validated_config(&args.common)?;
    let service = open_service(&args.common, &config)?;

    let record = service.cancel(&ExecutionId::new(args.execution_id))?;
    println!("execution {} cancelled", record.id);
    Ok(())
}

fn run_show(args: ExecutionCliArgs) -> Result<(), MainError> {
    let config = load_validated_config(&args.common)?;
    let service = open_service(&args.common, &config)?;

    let execution_id = ExecutionId::new(args.execution_id);
    match service.show(&execution_id)? {
        None => {
            println!("no execution with id {execution_id}");
        }
        Some(record) => {
            let rendered = serde_json::to_string_pretty(&record)
                .map_err(|source| MainError::RenderJson { source })?;
            println!("{rendered}");

            let events = service.events(&execution_id)?;
            for event in events {
                println!(
                    "  {} {}",
                    event.at.to_rfc3339(),
                    deck_core::events::event_kind_tag(&event.kind)
                );
            }
        }
    }
    Ok(())
}

fn run_list(args: ListCliArgs) -> Result<(), MainError> {
    let config = load_validated_config(&args.common)?;
    let service = open_service(&args.common, &config)?;

    let records = match args.task_id {
        Some(task_id) => service.list_for_task(&TaskId::new(task_id))?,
        None => service.list()?,
    };
    print_records(&records);
    Ok(())
}

fn run_running(args: RunningCliArgs) -> Result<(), MainError> {
    let config = load_validated_config(&args.common)?;
    let service = open_service(&args.common, &config)?;

    print_records(&service.running()?);
    Ok(())
}

fn print_records(records: &[deck_core::types::ExecutionRecord]) {
    if records.is_empty() {
        println!("no executions");
        return;
    }
    for record in records {
        println!(
            "{:<28} {:<16} {:<10} started {}",
            record.id.0,
            record.task_id.0,
            record.status,
            record.started_at.to_rfc3339()
        );
    }
}

fn load_validated_config(common: &CommonCliArgs) -> Result<DeckConfig, MainError> {
    let config =
        load_config_or_default(&common.config_path).map_err(|source| MainError::LoadConfig {
            path: common.config_path.clone(),
            source,
        })?;
    validate_config(&config.validate())?;
    Ok(config)
}

fn validate_config(issues: &[ValidationIssue]) -> Result<(), MainError> {
    for issue in issues {
        if issue.level == ValidationLevel::Warning {
            eprintln!("config warning [{}]: {}", issue.code, issue.message);
        }
    }
    if is_valid(issues) {
        return Ok(());
    }

    let errors = issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Error)
        .map(|issue| format!("[{}] {}", issue.code, issue.message))
        .collect::<Vec<_>>();
    Err(MainError::InvalidConfig(format!(
        "invalid config: {}",
        errors.join("; ")
    )))
}

fn open_service(common: &CommonCliArgs, config: &DeckConfig) -> Result<DeckService, MainError> {
    Ok(DeckService::open(
        &common.sqlite_path,
        &common.event_log_root,
        config,
    )?)
}

fn parse_cli_args(args: Vec<String>, program: &str) -> Result<CliCommand, MainError> {
    if args.is_empty() {
        return Ok(CliCommand::Help(usage(program)));
    }

    match args[0].as_str() {
        "run" => parse_run_cli_args(args[1..].to_vec(), program),
        "cancel" => parse_execution_cli_args(args[1..].to_vec(), program, CliCommand::Cancel),
        "show" => parse_execution_cli_args(args[1..].to_vec(), program, CliCommand::Show),
        "list" => parse_list_cli_args(args[1..].to_vec(), program),
        "running" => parse_running_cli_args(args[1..].to_vec(), program),
        "help" | "--help" | "-h" => Ok(CliCommand::Help(usage(program))),
        other => Err(MainError::Args(format!(
            "unknown command: {other}\n\n{}",
            usage(program)
        ))),
    }
}

fn parse_run_cli_args(args: Vec<String>, program: &str) -> Result<CliCommand, MainError> {
    let mut common = CommonCliArgs::default();
    let mut task_id = None;
    let mut command = None;
    let mut workdir = None;
    let mut tick_ms = DEFAULT_RUN_TICK_MS;

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "--help" | "-h" => return Ok(CliCommand::Help(run_usage(program))),
            "--task" => {
                idx += 1;
                task_id = Some(required_value(&args, idx, "--task")?);
            }
            "--command" => {
                idx += 1;
                command = Some(required_value(&args, idx, "--command")?);
            }
            "--dir" => {
                idx += 1;
                workdir = Some(PathBuf::from(required_value(&args, idx, "--dir")?));
            }
            "--tick-ms" => {
                idx += 1;
                let value = required_value(&args, idx, "--tick-ms")?;
                tick_ms = value.parse::<u64>().map_err(|_| {
                    MainError::Args(format!("invalid --tick-ms value: {value} (expected u64)"))
                })?;
                if tick_ms == 0 {
                    return Err(MainError::Args(
                        "invalid --tick-ms value: 0 (must be > 0)".to_string(),
                    ));
                }
            }
            other => {
                if !parse_common_flag(other, &args, &mut idx, &mut common)? {
                    return Err(MainError::Args(format!(
                        "unknown run argument: {other}\n\n{}",
                        run_usage(program)
                    )));
                }
            }
        }
        idx += 1;
    }

    let task_id =
        task_id.ok_or_else(|| MainError::Args("missing required --task <id> for run".to_string()))?;
    let command = command.ok_or_else(|| {
        MainError::Args("missing required --command <command> for run".to_string())
    })?;

    Ok(CliCommand::Run(RunCliArgs {
        common,
        task_id,
        command,
        workdir,
        tick_ms,
    }))
}

fn parse_execution_cli_args(
    args: Vec<String>,
    program: &str,
    build: fn(ExecutionCliArgs) -> CliCommand,
) -> Result<CliCommand, MainError> {
    let mut common = CommonCliArgs::default();
    let mut execution_id = None;

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "--help" | "-h" => return Ok(CliCommand::Help(usage(program))),
            "--id" => {
                idx += 1;
                execution_id = Some(required_value(&args, idx, "--id")?);
            }
            other => {
                if !parse_common_flag(other, &args, &mut idx, &mut common)? {
                    return Err(MainError::Args(format!(
                        "unknown argument: {other}\n\n{}",
                        usage(program)
                    )));
                }
            }
        }
        idx += 1;
    }

    let execution_id = execution_id
        .ok_or_else(|| MainError::Args("missing required --id <execution-id>".to_string()))?;
    Ok(build(ExecutionCliArgs {
        common,
        execution_id,
    }))
}

fn parse_list_cli_args(args: Vec<String>, program: &str) -> Result<CliCommand, MainError> {
    let mut common = CommonCliArgs::default();
    let mut task_id = None;

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "--help" | "-h" => return Ok(CliCommand::Help(usage(program))),
            "--task" => {
                idx += 1;
                task_id = Some(required_value(&args, idx, "--task")?);
            }
            other => {
                if !parse_common_flag(other, &args, &mut idx, &mut common)? {
                    return Err(MainError::Args(format!(
                        "unknown list argument: {other}\n\n{}",
                        usage(program)
                    )));
                }
            }
        }
        idx += 1;
    }

    Ok(CliCommand::List(ListCliArgs { common, task_id }))
}

fn parse_running_cli_args(args: Vec<String>, program: &str) -> Result<CliCommand, MainError> {
    let mut common = CommonCliArgs::default();

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "--help" | "-h" => return Ok(CliCommand::Help(usage(program))),
            other => {
                if !parse_common_flag(other, &args, &mut idx, &mut common)? {
                    return Err(MainError::Args(format!(
                        "unknown running argument: {other}\n\n{}",
                        usage(program)
                    )));
                }
            }
        }
        idx += 1;
    }

    Ok(CliCommand::Running(RunningCliArgs { common }))
}

/// Handle one of the flags shared by every subcommand. Returns false when the
/// flag is not a common one.
fn parse_common_flag(
    flag: &str,
    args: &[String],
    idx: &mut usize,
    common: &mut CommonCliArgs,
) -> Result<bool, MainError> {
    match flag {
        "--config" => {
            *idx += 1;
            common.config_path = PathBuf::from(required_value(args, *idx, "--config")?);
            Ok(true)
        }
        "--sqlite-path" => {
            *idx += 1;
            common.sqlite_path = PathBuf::from(required_value(args, *idx, "--sqlite-path")?);
            Ok(true)
        }
        "--event-log-root" => {
            *idx += 1;
            common.event_log_root =
                PathBuf::from(required_value(args, *idx, "--event-log-root")?);
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn required_value(args: &[String], idx: usize, flag: &str) -> Result<String, MainError> {
    args.get(idx)
        .cloned()
        .ok_or_else(|| MainError::Args(format!("missing value for {flag}")))
}

fn usage(program: &str) -> String {
    format!(
        "Usage: {program} <command> [options]\n\
         \n\
         Commands:\n\
         \x20 run        Start an execution and stream it in the foreground\n\
         \x20 cancel     Cancel an execution tracked by this host (--id <execution-id>)\n\
         \x20 show       Show one execution record and its events (--id <execution-id>)\n\
         \x20 list       List execution records (optionally --task <id>)\n\
         \x20 running    List running execution records\n\
         \x20 help       Show this message\n\
         \n\
         Common options:\n\
         \x20 --config <path>           Config file (default: {DEFAULT_CONFIG_PATH})\n\
         \x20 --sqlite-path <path>      SQLite database (default: {DEFAULT_SQLITE_PATH})\n\
         \x20 --event-log-root <path>   Event log root (default: {DEFAULT_EVENT_LOG_ROOT})"
    )
}

fn run_usage(program: &str) -> String {
    format!(
        "Usage: {program} run --task <id> --command <command> [options]\n\
         \n\
         Options:\n\
         \x20 --dir <path>       Working directory for the command\n\
         \x20 --tick-ms <n>      Foreground poll interval (default: {DEFAULT_RUN_TICK_MS})\n\
         \x20 --config <path>    Config file (default: {DEFAULT_CONFIG_PATH})\n\
         \x20 --sqlite-path <path>\n\
         \x20 --event-log-root <path>"
    )
}
