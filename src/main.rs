//! Command-line interface for the archival PDF enhancer.

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::{Arg, ArgAction, Command, ValueEnum};
use eapdf::config::EnhancerConfig;
use eapdf::document::Session;
use eapdf::dpart::DPartTree;
use eapdf::pipeline::Enhancer;
use eapdf::types::parse_manifest;
use tracing::{error, info};

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    /// Error messages only
    Error,
    /// Warning and error messages
    Warn,
    /// Info, warning, and error messages (default)
    Info,
    /// Debug and all messages
    Debug,
    /// Trace and all messages (most verbose)
    Trace,
}

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();

    let log_level = matches.get_one::<LogLevel>("verbose").unwrap_or(&LogLevel::Info);
    init_logging(log_level);

    let input_path = matches.get_one::<String>("input").unwrap();
    let output_path = matches.get_one::<String>("output").unwrap();
    let dpart_path = matches.get_one::<String>("dpart").unwrap();
    let manifest_path = matches.get_one::<String>("attachments").unwrap();
    let config_file = matches.get_one::<String>("config");
    let force_overwrite = matches.get_flag("force");
    let dry_run = matches.get_flag("dry-run");

    if !PathBuf::from(input_path).exists() {
        error!("input file does not exist: {}", input_path);
        process::exit(1);
    }
    if PathBuf::from(output_path).exists() && !force_overwrite {
        error!("output file already exists: {} (use --force to overwrite)", output_path);
        process::exit(1);
    }

    let config = match config_file {
        Some(path) => match load_config_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("failed to load config file: {}", e);
                process::exit(1);
            }
        },
        None => EnhancerConfig::default(),
    };

    let tree_xml = read_or_exit(dpart_path, "part tree");
    let manifest_json = read_or_exit(manifest_path, "attachment manifest");

    let enhancer = match Enhancer::new(config) {
        Ok(enhancer) => enhancer,
        Err(e) => {
            error!("invalid configuration: {}", e);
            process::exit(1);
        }
    };

    let start = std::time::Instant::now();
    let result = if dry_run {
        info!("dry run: all stages execute, no output is written");
        run_dry(&enhancer, input_path, &tree_xml, &manifest_json).await
    } else {
        enhancer
            .enhance(input_path, &tree_xml, &manifest_json, output_path)
            .await
            .map(|_| ())
    };

    match result {
        Ok(()) => {
            info!("completed in {:.2?}", start.elapsed());
        }
        Err(e) => {
            error!("enhancement failed: {}", e);
            process::exit(1);
        }
    }
}

/// Runs every stage against the open document and discards the result.
async fn run_dry(
    enhancer: &Enhancer,
    input_path: &str,
    tree_xml: &str,
    manifest_json: &str,
) -> eapdf::Result<()> {
    let tree = DPartTree::from_xml(tree_xml, enhancer.config().max_tree_depth)?;
    let descriptors = parse_manifest(manifest_json)?;
    let mut session = Session::open(input_path)?;
    enhancer.run_stages(&mut session, &tree, &descriptors).await?;
    Ok(())
}

fn read_or_exit(path: &str, what: &str) -> String {
    match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!("failed to read {} from {}: {}", what, path, e);
            process::exit(1);
        }
    }
}

fn load_config_file(path: &str) -> Result<EnhancerConfig, String> {
    let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&content).map_err(|e| e.to_string())
}

fn build_cli() -> Command {
    Command::new("eapdf")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Post-processes a rendered email-archive PDF into a preservation-grade document")
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("FILE")
                .help("Rendered input PDF")
                .required(true),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Enhanced output PDF")
                .required(true),
        )
        .arg(
            Arg::new("dpart")
                .short('d')
                .long("dpart")
                .value_name("FILE")
                .help("Part-tree XML fragment produced by the exporter")
                .required(true),
        )
        .arg(
            Arg::new("attachments")
                .short('a')
                .long("attachments")
                .value_name("FILE")
                .help("Attachment manifest (JSON)")
                .required(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (JSON)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .value_name("LEVEL")
                .value_parser(clap::builder::EnumValueParser::<LogLevel>::new())
                .help("Log level"),
        )
        .arg(
            Arg::new("force")
                .short('f')
                .long("force")
                .action(ArgAction::SetTrue)
                .help("Overwrite an existing output file"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Run every stage but write no output"),
        )
}

fn init_logging(level: &LogLevel) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let filter_level = match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!("eapdf={}", filter_level)))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");
}
