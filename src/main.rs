use irmut::config::{Config, Filter, SandboxKind};
use irmut::driver::Driver;
use irmut::error::EngineError;
use irmut::loader;
use irmut::operators::OperatorKind;
use irmut::output;
use irmut::state;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "irmut", version, about = "Mutation testing for IR programs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run mutation testing over a set of modules
    Run {
        /// Module files (JSON)
        modules: Vec<PathBuf>,
        /// File listing module paths, one per line
        #[arg(short, long)]
        list: Option<PathBuf>,
        /// Per-test timeout in milliseconds
        #[arg(long, env = "IRMUT_TIMEOUT", default_value = "3000")]
        timeout: u64,
        /// Maximum call distance from a test at which points are mutated
        #[arg(long, env = "IRMUT_MAX_DISTANCE", default_value = "128")]
        max_distance: usize,
        /// Worker threads (default: available parallelism)
        #[arg(short, long, env = "IRMUT_WORKERS")]
        workers: Option<usize>,
        /// Functions with this prefix and no parameters are tests
        #[arg(long, default_value = "test_")]
        test_prefix: String,
        /// Mutant budget as a multiple of the baseline duration
        #[arg(long, default_value = "3")]
        timeout_mult: f64,
        /// Isolation used for every test run
        #[arg(long, value_enum, env = "IRMUT_SANDBOX")]
        sandbox: Option<SandboxKind>,
        /// Only enable these operators (repeatable)
        #[arg(short, long, value_enum)]
        operator: Vec<OperatorKind>,
        /// Only run tests matching these patterns (trailing `*` for prefix)
        #[arg(short, long)]
        test: Vec<String>,
        /// Skip tests matching these patterns
        #[arg(long)]
        exclude_test: Vec<String>,
        /// Never mutate functions matching these patterns
        #[arg(long)]
        exclude_function: Vec<String>,
        /// Run every covering test instead of stopping at the first kill
        #[arg(long)]
        all_kills: bool,
        /// Also mutate the bodies of test functions
        #[arg(long)]
        mutate_tests: bool,
        /// Output JSON instead of human-readable text
        #[arg(long)]
        json: bool,
        /// Exit code only, no output
        #[arg(short, long)]
        quiet: bool,
    },
    /// Show details for a survived mutant by ref
    Show {
        /// Mutant ref (e.g. @m1 or m1)
        #[arg(name = "ref")]
        mutant_ref: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Summary of last run
    Status {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Run {
            modules,
            list,
            timeout,
            max_distance,
            workers,
            test_prefix,
            timeout_mult,
            sandbox,
            operator,
            test,
            exclude_test,
            exclude_function,
            all_kills,
            mutate_tests,
            json,
            quiet,
        } => {
            let mut config = Config {
                timeout_ms: timeout,
                max_distance,
                test_prefix,
                timeout_multiplier: timeout_mult,
                stop_on_first_kill: !all_kills,
                mutate_test_bodies: mutate_tests,
                progress: !json && !quiet,
                filter: Filter {
                    tests: test,
                    exclude_tests: exclude_test,
                    exclude_functions: exclude_function,
                    operators: operator,
                },
                ..Config::default()
            };
            if let Some(workers) = workers {
                config.workers = workers;
            }
            if let Some(sandbox) = sandbox {
                config.sandbox = sandbox;
            }
            cmd_run(modules, list, config, json, quiet)
        }
        Commands::Show { mutant_ref, json } => cmd_show(mutant_ref, json),
        Commands::Status { json } => cmd_status(json),
    };

    process::exit(exit_code);
}

fn exit_code_for(error: &EngineError) -> i32 {
    match error {
        EngineError::ModuleLoad { .. } | EngineError::NoTests { .. } => 2,
        _ => 3,
    }
}

fn cmd_run(modules: Vec<PathBuf>, list: Option<PathBuf>, config: Config, json_mode: bool, quiet: bool) -> i32 {
    let mut paths = modules;
    if let Some(list) = list {
        match loader::read_module_list(&list) {
            Ok(listed) => paths.extend(listed),
            Err(e) => {
                output::print_error(&e.to_string());
                return exit_code_for(&e);
            }
        }
    }
    if paths.is_empty() {
        output::print_error("No modules given. Pass module files or --list <file>.");
        return 2;
    }

    let program = match loader::load_program(&paths) {
        Ok(p) => p,
        Err(e) => {
            output::print_error(&e.to_string());
            return exit_code_for(&e);
        }
    };

    let report = match Driver::new(config).run(&program) {
        Ok(r) => r,
        Err(e) => {
            output::print_error(&e.to_string());
            return exit_code_for(&e);
        }
    };

    if let Err(e) = state::save_last_run(&report) {
        tracing::warn!("{e}");
    }

    let code = if report.survived > 0 { 1 } else { 0 };
    if quiet {
        return code;
    }
    if json_mode {
        match serde_json::to_string(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                output::print_error(&format!("Failed to serialize report: {e}"));
                return 3;
            }
        }
    } else {
        output::print_report(&report);
    }
    code
}

fn cmd_show(mutant_ref: String, json_mode: bool) -> i32 {
    let last_run = match state::load_last_run() {
        Some(r) => r,
        None => {
            output::print_error("No previous run found. Run `irmut run` first.");
            return 2;
        }
    };

    match state::survivor_ref(&last_run, &mutant_ref) {
        Some(index) => {
            let m = &last_run.mutants[index];
            if json_mode {
                match serde_json::to_string(m) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        output::print_error(&format!("Failed to serialize mutant: {e}"));
                        return 3;
                    }
                }
            } else {
                output::print_mutant_detail(&mutant_ref, m);
            }
            0
        }
        None => {
            let valid: Vec<_> = (1..=last_run.survived).map(|i| format!("@m{i}")).collect();
            output::print_error(&format!(
                "Mutant {} not found. Valid refs: {}",
                mutant_ref,
                valid.join(", ")
            ));
            2
        }
    }
}

fn cmd_status(json_mode: bool) -> i32 {
    match state::load_last_run() {
        Some(report) => {
            if json_mode {
                match serde_json::to_string(&report) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        output::print_error(&format!("Failed to serialize report: {e}"));
                        return 3;
                    }
                }
            } else {
                output::print_status(&report);
            }
            0
        }
        None => {
            output::print_error("No previous run found. Run `irmut run` first.");
            2
        }
    }
}
