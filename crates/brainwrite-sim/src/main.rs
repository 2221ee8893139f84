use anyhow::Context;
use brainwrite_coordinator::AbandonmentPolicy;
use brainwrite_sim::{run_session, run_stress, SessionConfig, StressConfig};
use clap::builder::PossibleValuesParser;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    match run(&matches).await {
        Ok(passed) => std::process::exit(if passed { 0 } else { 1 }),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(2);
        }
    }
}

fn cli() -> Command {
    Command::new("brainwrite-sim")
        .version(brainwrite_sim::VERSION)
        .about("Brainwrite session simulator and stress driver")
        .subcommand_required(true)
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Print the report as JSON"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Play one seeded board to completion")
                .arg(
                    Arg::new("participants")
                        .long("participants")
                        .default_value("6")
                        .value_parser(value_parser!(usize))
                        .help("Participants to join (1-6)"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("abandon-rate")
                        .long("abandon-rate")
                        .default_value("0.1")
                        .value_parser(value_parser!(f64))
                        .help("Probability a writer walks away from a turn"),
                )
                .arg(
                    Arg::new("policy")
                        .long("policy")
                        .default_value("record_blank")
                        .value_parser(PossibleValuesParser::new(["record_blank", "purge"]))
                        .help("What happens to a writer whose lease expires"),
                ),
        )
        .subcommand(
            Command::new("stress")
                .about("Run concurrent join and write storms")
                .arg(
                    Arg::new("boards")
                        .long("boards")
                        .default_value("8")
                        .value_parser(value_parser!(usize))
                        .help("Boards driven at once"),
                )
                .arg(
                    Arg::new("joiners")
                        .long("joiners")
                        .default_value("20")
                        .value_parser(value_parser!(usize))
                        .help("Join attempts per board"),
                )
                .arg(
                    Arg::new("db")
                        .long("db")
                        .value_parser(value_parser!(PathBuf))
                        .help("SQLite file to run against (in-memory if omitted)"),
                ),
        )
}

async fn run(matches: &ArgMatches) -> anyhow::Result<bool> {
    match matches.subcommand() {
        Some(("simulate", args)) => {
            let policy = match args.get_one::<String>("policy").map(String::as_str) {
                Some("purge") => AbandonmentPolicy::Purge,
                _ => AbandonmentPolicy::RecordBlank,
            };
            let config = SessionConfig {
                seed: required(args, "seed")?,
                participants: required(args, "participants")?,
                abandon_rate: required(args, "abandon-rate")?,
                policy,
            };
            let report = run_session(&config).await?;
            emit(args.get_flag("json"), &report, || report.generate_text())?;
            Ok(report.passed())
        }
        Some(("stress", args)) => {
            let config = StressConfig {
                boards: required(args, "boards")?,
                joiners: required(args, "joiners")?,
                database: args.get_one::<PathBuf>("db").cloned(),
            };
            let report = run_stress(&config).await?;
            emit(args.get_flag("json"), &report, || report.generate_text())?;
            Ok(report.passed())
        }
        _ => anyhow::bail!("no subcommand given"),
    }
}

fn required<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str) -> anyhow::Result<T> {
    args.get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing --{name}"))
}

fn emit<R: Serialize>(json: bool, report: &R, text: impl FnOnce() -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}
