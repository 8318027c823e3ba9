//! The `labseal` command line: a thin shim over [`Workbench`].

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{value_parser, Arg, Command};
use tracing_subscriber::EnvFilter;

use labseal_core::{Verdict, Workbench, WorkbenchConfig, WorkbenchError};
use labseal_registry::ExperimentId;

fn cli() -> Command {
    Command::new("labseal")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Cryptographically checkable provenance records for experiments")
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .global(true)
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_parser(value_parser!(PathBuf))
                .global(true)
                .help("Directory for registry and key files (overrides config paths)"),
        )
        .subcommand(
            Command::new("provision-identity")
                .about("Generate and persist the analyst signing identity"),
        )
        .subcommand(
            Command::new("create")
                .about("Register and scaffold a new experiment")
                .arg(Arg::new("name").required(true).help("Human-readable name"))
                .arg(
                    Arg::new("location")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Absolute directory the experiment will live in"),
                )
                .arg(
                    Arg::new("input")
                        .long("input")
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory to stage into input/"),
                ),
        )
        .subcommand(
            Command::new("open")
                .about("Open an experiment for work")
                .arg(Arg::new("id").required(true).help("Experiment id")),
        )
        .subcommand(
            Command::new("finalize")
                .about("Hash, snapshot, sign, timestamp, and complete an experiment")
                .arg(Arg::new("id").required(true).help("Experiment id")),
        )
        .subcommand(
            Command::new("verify")
                .about("Re-check a completed experiment against its manifest")
                .arg(Arg::new("id").required(true).help("Experiment id")),
        )
        .subcommand(Command::new("list").about("List all experiments"))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            if let Some(step) = e.step() {
                eprintln!(
                    "finalize stopped at step '{step}'; experiment status {}",
                    if e.state_changed() {
                        "changed before the failure"
                    } else {
                        "is unchanged"
                    }
                );
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode, WorkbenchError> {
    let matches = cli().get_matches();

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => WorkbenchConfig::from_file(path).await?,
        None => WorkbenchConfig::default(),
    };
    if let Some(dir) = matches.get_one::<PathBuf>("data-dir") {
        config = config.with_data_dir(dir);
    }
    let workbench = Workbench::open(config).await?;

    match matches.subcommand() {
        Some(("provision-identity", _)) => {
            let key_id = workbench.provision_identity().await?;
            println!("identity provisioned, key id {key_id}");
        }
        Some(("create", args)) => {
            let name = args.get_one::<String>("name").cloned().unwrap_or_default();
            let location = args
                .get_one::<PathBuf>("location")
                .cloned()
                .unwrap_or_default();
            let input = args.get_one::<PathBuf>("input");
            let record = workbench
                .create_experiment(&name, &location, input.map(PathBuf::as_path))
                .await?;
            println!("created {} at {}", record.id(), record.location().display());
        }
        Some(("open", args)) => {
            let record = workbench.open_experiment(parse_id(args)?).await?;
            println!("opened {} ({})", record.id(), record.status());
        }
        Some(("finalize", args)) => {
            let outcome = workbench.finalize(parse_id(args)?).await?;
            println!(
                "finalized {}: {} input files, {} output files, signed by {}",
                outcome.record.id(),
                outcome.manifest.input_hashes.len(),
                outcome.manifest.output_hashes.len(),
                outcome.signature.key_id,
            );
            match &outcome.timestamp_token {
                Some(token) => println!("timestamped by authority {}", token.authority_key_id),
                None => println!("no timestamp token"),
            }
            for warning in &outcome.warnings {
                eprintln!("warning: {warning}");
            }
        }
        Some(("verify", args)) => {
            let report = workbench.verify(parse_id(args)?).await?;
            println!("verdict: {}", report.verdict);
            for path in report.mismatched_paths() {
                println!("  mismatch: {path}");
            }
            if report.verdict != Verdict::Valid {
                return Ok(ExitCode::from(2));
            }
        }
        Some(("list", _)) => {
            for record in workbench.list().await {
                println!(
                    "{}  {:12}  {}  {}",
                    record.id(),
                    record.status().to_string(),
                    record.created_at().format("%Y-%m-%d %H:%M:%S"),
                    record.name(),
                );
            }
        }
        _ => unreachable!("arg_required_else_help"),
    }
    Ok(ExitCode::SUCCESS)
}

fn parse_id(args: &clap::ArgMatches) -> Result<ExperimentId, WorkbenchError> {
    let raw = args.get_one::<String>("id").cloned().unwrap_or_default();
    raw.parse().map_err(|_| WorkbenchError::InvalidId(raw))
}
