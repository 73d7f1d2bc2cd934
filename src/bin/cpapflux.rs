//! cpapflux CLI - Command-line interface for cpap-flux
//!
//! Commands:
//! - import: Decode a device card and write the daily report envelope
//! - inspect: Print the chunk headers of one PRS1 file
//! - doctor: Diagnose configuration and card detection

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use cpap_flux::adapters::detect_adapter;
use cpap_flux::adapters::prs1::inspect_file;
use cpap_flux::config::{ConfigError, PipelineConfig, ENV_PREFIX};
use cpap_flux::encoder::ReportEncoder;
use cpap_flux::error::{ErrorClass, ImportError};
use cpap_flux::pipeline::ImportProcessor;
use cpap_flux::{FLUX_VERSION, PRODUCER_NAME};

/// Environment variable holding the tracing filter
const LOG_ENV: &str = "CPAPFLUX_LOG";

/// cpapflux - CPAP therapy data importer
#[derive(Parser)]
#[command(name = "cpapflux")]
#[command(version = FLUX_VERSION)]
#[command(about = "Decode CPAP device cards into daily therapy reports", long_about = None)]
struct Cli {
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log decoding details
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a device card directory
    Import {
        /// Card root directory
        root: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Force pretty-printed JSON even when not writing to a terminal
        #[arg(long)]
        pretty: bool,

        /// Abort on the first unreadable file instead of skipping it
        #[arg(long)]
        strict: bool,
    },

    /// Print the chunk headers of a PRS1 file
    Inspect {
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and card detection
    Doctor {
        /// Card root directory to probe
        #[arg(long)]
        card: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(quiet: bool, verbose: bool) {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<(), CpapCliError> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Import {
            root,
            output,
            pretty,
            strict,
        } => cmd_import(&root, &output, config_path, pretty, strict),
        Commands::Inspect { file, json } => cmd_inspect(&file, json),
        Commands::Doctor { card, json } => cmd_doctor(config_path, card.as_deref(), json),
    }
}

fn cmd_import(
    root: &Path,
    output: &Path,
    config_path: Option<&Path>,
    pretty: bool,
    strict: bool,
) -> Result<(), CpapCliError> {
    let mut config = PipelineConfig::load_from(config_path)?;
    if strict {
        config.import.skip_corrupt_files = false;
    }

    let outcome = ImportProcessor::new(config).import_directory(root)?;
    let to_stdout = output.as_os_str() == "-";
    let pretty = pretty || (to_stdout && atty::is(atty::Stream::Stdout));
    let json = ReportEncoder::new().encode_to_json(&outcome, pretty)?;

    if to_stdout {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{json}")?;
    } else {
        fs::write(output, json)?;
    }

    for skipped in &outcome.skipped {
        eprintln!("skipped {}: {}", skipped.path, skipped.reason);
    }
    Ok(())
}

fn cmd_inspect(file: &Path, json: bool) -> Result<(), CpapCliError> {
    let headers = inspect_file(file)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&headers)?);
        return Ok(());
    }

    println!("{} chunk(s) in {}", headers.len(), file.display());
    for (i, header) in headers.iter().enumerate() {
        println!(
            "  [{i}] {:?} session {} at {} ({} bytes, family {}.{})",
            header.file_kind,
            header.session_number,
            header.timestamp.to_rfc3339(),
            header.block_length,
            header.family,
            header.family_version,
        );
        if let Some(layout) = &header.layout {
            println!(
                "      {} x {} s intervals, {} channel(s)",
                layout.interval_count,
                layout.interval_secs,
                layout.channels.len()
            );
        }
    }
    Ok(())
}

fn cmd_doctor(config_path: Option<&Path>, card: Option<&Path>, json: bool) -> Result<(), CpapCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("{PRODUCER_NAME} version {FLUX_VERSION}"),
    });

    match PipelineConfig::load_from(config_path) {
        Ok(config) => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "Configuration valid (leak redline {} L/min, grouping gap {} h)",
                config.events.leak_redline, config.grouping.max_gap_hours
            ),
        }),
        Err(e) => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        }),
    }

    let overrides: Vec<String> = std::env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with(ENV_PREFIX) && key != LOG_ENV)
        .collect();
    if !overrides.is_empty() {
        checks.push(DoctorCheck {
            name: "environment".to_string(),
            status: CheckStatus::Ok,
            message: format!("Overrides from {}", overrides.join(", ")),
        });
    }

    if let Some(card) = card {
        let check = if !card.is_dir() {
            DoctorCheck {
                name: "card".to_string(),
                status: CheckStatus::Error,
                message: format!("{} is not a directory", card.display()),
            }
        } else {
            match detect_adapter(card) {
                Some(adapter) => DoctorCheck {
                    name: "card".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Detected {} card", adapter.family().as_str()),
                },
                None => DoctorCheck {
                    name: "card".to_string(),
                    status: CheckStatus::Warning,
                    message: "No supported device files found".to_string(),
                },
            }
        };
        checks.push(check);
    }

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: FLUX_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("cpapflux Doctor Report");
        println!("======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(CpapCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum CpapCliError {
    Io(io::Error),
    Import(ImportError),
    Config(ConfigError),
    Json(serde_json::Error),
    DoctorFailed,
}

impl From<io::Error> for CpapCliError {
    fn from(e: io::Error) -> Self {
        CpapCliError::Io(e)
    }
}

impl From<ImportError> for CpapCliError {
    fn from(e: ImportError) -> Self {
        CpapCliError::Import(e)
    }
}

impl From<ConfigError> for CpapCliError {
    fn from(e: ConfigError) -> Self {
        CpapCliError::Config(e)
    }
}

impl From<serde_json::Error> for CpapCliError {
    fn from(e: serde_json::Error) -> Self {
        CpapCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CpapCliError> for CliError {
    fn from(e: CpapCliError) -> Self {
        match e {
            CpapCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CpapCliError::Import(ImportError::Cancelled) => CliError {
                code: "CANCELLED".to_string(),
                message: "Import cancelled".to_string(),
                hint: None,
            },
            CpapCliError::Import(e) => {
                let (code, hint) = match e.class() {
                    ErrorClass::Corrupt => (
                        "CORRUPT_FILE",
                        "The card holds damaged or unsupported files; omit --strict to skip them",
                    ),
                    ErrorClass::Protocol => (
                        "PROTOCOL_ERROR",
                        "The device wrote records this version does not understand",
                    ),
                    ErrorClass::Fatal => ("IMPORT_ERROR", "Check the card path and configuration"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            CpapCliError::Config(e) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some(format!("Check the TOML file and {ENV_PREFIX}* variables")),
            },
            CpapCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            CpapCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
