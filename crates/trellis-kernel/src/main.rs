use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use trellis_kernel::config::load_document;
use trellis_kernel::Harness;
use trellis_profile::ProfileContext;

fn cli() -> Command {
    Command::new("trellis")
        .version(trellis_kernel::VERSION)
        .about("Scenario-tree test harness")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("run")
                .about("Build and execute a scenario document")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Scenario document (.toml or .json)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the run report as JSON"),
                )
                .arg(
                    Arg::new("profile-capacity")
                        .long("profile-capacity")
                        .value_parser(value_parser!(usize))
                        .help("Entries kept by the profile log"),
                )
                .arg(
                    Arg::new("profile-out")
                        .long("profile-out")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the profile log here instead of stderr"),
                ),
        )
        .subcommand(
            Command::new("check")
                .about("Build a scenario document and print its tree without executing")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Scenario document (.toml or .json)"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let passed = match matches.subcommand() {
        Some(("run", args)) => run(args).await?,
        Some(("check", args)) => check(args)?,
        _ => unreachable!("subcommand_required"),
    };

    std::process::exit(if passed { 0 } else { 1 });
}

fn document_path(args: &ArgMatches) -> Result<&PathBuf> {
    args.get_one::<PathBuf>("file")
        .context("missing scenario document")
}

async fn run(args: &ArgMatches) -> Result<bool> {
    let path = document_path(args)?;
    let document =
        load_document(path).with_context(|| format!("failed to load {}", path.display()))?;

    let mut config = document.harness.clone();
    if let Some(&capacity) = args.get_one::<usize>("profile-capacity") {
        config.profile_capacity = capacity;
    }

    let profile = Arc::new(ProfileContext::new(config.profile_capacity));
    let mut harness = Harness::with_config(config).with_profile(Arc::clone(&profile));

    let root = document
        .build(&mut harness)
        .with_context(|| format!("failed to build {}", path.display()))?;
    let report = harness.execute(root).await?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.generate_text());
    }

    let teardown = harness.delete_scenario(root)?;
    if teardown.terminated > 0 {
        tracing::warn!(terminated = teardown.terminated, "processes still running at teardown");
    }
    drop(harness);

    dump_profile(profile, args.get_one::<PathBuf>("profile-out").map(PathBuf::as_path))?;
    Ok(report.passed())
}

fn dump_profile(profile: Arc<ProfileContext>, out: Option<&Path>) -> Result<()> {
    let Ok(profile) = Arc::try_unwrap(profile) else {
        tracing::warn!("profile still shared, skipping dump");
        return Ok(());
    };

    let written = match out {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let mut sink = BufWriter::new(file);
            let written = profile.finish(&mut sink)?;
            sink.flush()?;
            written
        }
        None => profile.finish(&mut io::stderr().lock())?,
    };
    tracing::debug!(entries = written, "profile log dumped");
    Ok(())
}

fn check(args: &ArgMatches) -> Result<bool> {
    let path = document_path(args)?;
    let document =
        load_document(path).with_context(|| format!("failed to load {}", path.display()))?;

    let mut harness = Harness::with_config(document.harness.clone());
    let root = document
        .build(&mut harness)
        .with_context(|| format!("failed to build {}", path.display()))?;

    print!("{}", harness.describe(root)?);
    println!("{} entries, references resolved", document.count());

    harness.delete_scenario(root)?;
    Ok(true)
}
