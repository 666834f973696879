//! e4-relay CLI
//!
//! Commands:
//! - serve: Run the HTTP relay until Ctrl-C
//! - replay: Feed a recorded event log through the pipeline
//! - validate: Validate an event log against the inbound schema
//! - doctor: Diagnose configuration and sink reachability
//! - schema: Print the inbound event schema

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use e4_relay::config::{RelayConfig, DEFAULT_CONFIG_PATH};
use e4_relay::logging::{self, LogSettings};
use e4_relay::schema::{EventLog, RawSensorEvent};
use e4_relay::sinks::{CaptureRecordSink, CaptureStreamSink, InfluxRecordSink};
use e4_relay::{
    server, CalibrationTable, DispatchMode, EventDispatcher, RelayError, SensorKind,
    SmootherBank, PRODUCER_NAME, RELAY_VERSION,
};
use tracing::{info, warn};

/// e4-relay - normalize wearable sensor events and fan them out to OSC and InfluxDB
#[derive(Parser)]
#[command(name = "e4-relay")]
#[command(version = RELAY_VERSION)]
#[command(about = "Relay E4 wristband events to OSC and InfluxDB", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP relay
    Serve {
        /// Configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Listen address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,

        /// OSC destination host (overrides osc.host)
        #[arg(long)]
        osc_host: Option<String>,

        /// OSC destination port (overrides osc.port)
        #[arg(long)]
        osc_port: Option<u16>,

        /// Persist readings to InfluxDB
        #[arg(long)]
        record: bool,

        /// Suppress per-event diagnostic logs
        #[arg(long)]
        quiet: bool,

        /// Answer 400 to undecodable events
        #[arg(long)]
        strict: bool,
    },

    /// Feed a recorded event log through the pipeline
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Capture output in memory and print normalized readings as NDJSON
        #[arg(long)]
        dry_run: bool,

        /// Persist readings (to InfluxDB, or to the capture buffer with --dry-run)
        #[arg(long)]
        record: bool,

        /// Load smoothing state from file
        #[arg(long)]
        load_state: Option<PathBuf>,

        /// Save smoothing state to file after processing
        #[arg(long)]
        save_state: Option<PathBuf>,
    },

    /// Validate an event log
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and sinks
    Doctor {
        /// Configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the inbound event schema
    Schema {
        /// Output JSON Schema format
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one event per line)
    Ndjson,
    /// JSON array of events
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), RelayCliError> {
    match cli.command {
        Commands::Serve {
            config,
            bind,
            osc_host,
            osc_port,
            record,
            quiet,
            strict,
        } => {
            let mut config = RelayConfig::load_from(&config)?;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(host) = osc_host {
                config.osc.host = host;
            }
            if let Some(port) = osc_port {
                config.osc.port = port;
            }
            config.pipeline.record_mode |= record;
            config.pipeline.quiet_mode |= quiet;
            config.pipeline.strict_ingest |= strict;
            cmd_serve(config)
        }

        Commands::Replay {
            input,
            input_format,
            config,
            dry_run,
            record,
            load_state,
            save_state,
        } => {
            let mut config = RelayConfig::load_from(&config)?;
            config.pipeline.record_mode |= record;
            cmd_replay(
                &input,
                input_format,
                &config,
                dry_run,
                load_state.as_deref(),
                save_state.as_deref(),
            )
        }

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Doctor { config, json } => cmd_doctor(&config, json),

        Commands::Schema { json_schema } => cmd_schema(json_schema),
    }
}

fn init_logging(config: &RelayConfig) -> Result<(), RelayCliError> {
    let settings =
        LogSettings::from_config(&config.logging)?.with_ansi(atty::is(atty::Stream::Stderr));
    logging::init(settings)?;
    Ok(())
}

fn cmd_serve(config: RelayConfig) -> Result<(), RelayCliError> {
    config.validate()?;
    init_logging(&config)?;

    let smoothers = SmootherBank::new(config.pipeline.smoothing_scope);
    let dispatcher = EventDispatcher::from_config(&config, smoothers)?;
    info!(
        osc_host = %config.osc.host,
        osc_port = config.osc.port,
        scope = ?config.pipeline.smoothing_scope,
        "dispatcher ready"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let dispatcher = runtime.block_on(server::serve(&config, dispatcher, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
        }
    }))?;

    let stats = dispatcher.stats();
    info!(
        events = stats.events,
        records_written = stats.records_written,
        stream_failures = stats.stream_failures,
        record_failures = stats.record_failures,
        "relay stopped"
    );
    Ok(())
}

fn cmd_replay(
    input: &Path,
    input_format: InputFormat,
    config: &RelayConfig,
    dry_run: bool,
    load_state: Option<&Path>,
    save_state: Option<&Path>,
) -> Result<(), RelayCliError> {
    if !dry_run {
        config.validate()?;
    }
    init_logging(config)?;

    let events = read_events(input, input_format)?;
    if events.is_empty() {
        return Err(RelayCliError::NoEvents);
    }

    let smoothers = match load_state {
        Some(path) => SmootherBank::from_json(&fs::read_to_string(path)?)?,
        None => SmootherBank::new(config.pipeline.smoothing_scope),
    };

    let capture = dry_run.then(|| (CaptureStreamSink::new(), CaptureRecordSink::new()));
    let mut dispatcher = match &capture {
        Some((stream, record)) => EventDispatcher::new(
            CalibrationTable::default(),
            smoothers,
            Box::new(stream.clone()),
            Box::new(record.clone()),
        )?
        .with_topic_prefix(config.osc.prefix.as_str()),
        None => EventDispatcher::from_config(config, smoothers)?,
    };

    let mode = DispatchMode::from(&config.pipeline);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut skipped = 0usize;

    for (index, decoded) in EventLog::decode_all(&events) {
        match decoded {
            Ok(event) => {
                let reading = dispatcher.dispatch(&event, mode);
                if dry_run {
                    writeln!(out, "{}", serde_json::to_string(&reading)?)?;
                }
            }
            Err(e) => {
                skipped += 1;
                warn!(index, error = %e, "skipping invalid event");
            }
        }
    }
    out.flush()?;

    let stats = dispatcher.stats();
    if let Some((stream, record)) = &capture {
        info!(
            messages = stream.messages().len(),
            records = record.records().len(),
            "dry run captured output"
        );
    }
    info!(
        events = stats.events,
        skipped,
        records_written = stats.records_written,
        stream_failures = stats.stream_failures,
        record_failures = stats.record_failures,
        "replay complete"
    );

    if let Some(path) = save_state {
        let smoothers = dispatcher.into_smoothers();
        fs::write(path, smoothers.to_json()?)?;
        info!(path = %path.display(), "saved smoothing state");
    }

    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), RelayCliError> {
    let events = read_events(input, input_format)?;
    let results = EventLog::validate_events(&events);

    let report = ValidationReport {
        total_events: events.len(),
        valid_events: events.len() - results.len(),
        invalid_events: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                event_type: r.event_type.clone(),
                error: r.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total events:   {}", report.total_events);
        println!("Valid events:   {}", report.valid_events);
        println!("Invalid events: {}", report.invalid_events);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Event {} (index {}): {}",
                    err.event_type.as_deref().unwrap_or("untyped"),
                    err.index,
                    err.error
                );
            }
        }
    }

    if report.invalid_events > 0 {
        Err(RelayCliError::ValidationFailed(report.invalid_events))
    } else {
        Ok(())
    }
}

fn cmd_doctor(config_path: &Path, json: bool) -> Result<(), RelayCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "relay_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("e4-relay version {}", RELAY_VERSION),
    });

    let config = match RelayConfig::load_from(config_path) {
        Ok(config) => {
            let source = if config_path.exists() {
                format!("Loaded {}", config_path.display())
            } else {
                format!("{} not found, using defaults", config_path.display())
            };
            checks.push(DoctorCheck {
                name: "config_file".to_string(),
                status: CheckStatus::Ok,
                message: source,
            });
            Some(config)
        }
        Err(e) => {
            checks.push(DoctorCheck {
                name: "config_file".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            });
            None
        }
    };

    checks.push(match CalibrationTable::default().validate() {
        Ok(()) => DoctorCheck {
            name: "calibration".to_string(),
            status: CheckStatus::Ok,
            message: format!("{} calibrated sensors", SensorKind::ALL.len() - 1),
        },
        Err(e) => DoctorCheck {
            name: "calibration".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    });

    if let Some(config) = &config {
        checks.push(match config.validate() {
            Ok(()) => DoctorCheck {
                name: "config_values".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "bind {}, recording {}, smoothing {:?}",
                    config.server.bind, config.pipeline.record_mode, config.pipeline.smoothing_scope
                ),
            },
            Err(e) => DoctorCheck {
                name: "config_values".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            },
        });

        let destination = format!("{}:{}", config.osc.host, config.osc.port);
        checks.push(match destination.to_socket_addrs().map(|mut a| a.next()) {
            Ok(Some(addr)) => DoctorCheck {
                name: "osc_destination".to_string(),
                status: CheckStatus::Ok,
                message: format!("{} resolves to {}", destination, addr),
            },
            Ok(None) => DoctorCheck {
                name: "osc_destination".to_string(),
                status: CheckStatus::Error,
                message: format!("{} resolved to no addresses", destination),
            },
            Err(e) => DoctorCheck {
                name: "osc_destination".to_string(),
                status: CheckStatus::Error,
                message: format!("Cannot resolve {}: {}", destination, e),
            },
        });

        if config.pipeline.record_mode {
            let health = InfluxRecordSink::new(&config.influx).and_then(|sink| sink.health());
            checks.push(match health {
                Ok(()) => DoctorCheck {
                    name: "influxdb".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("{} is healthy", config.influx.url),
                },
                Err(e) => DoctorCheck {
                    name: "influxdb".to_string(),
                    status: CheckStatus::Error,
                    message: format!("{}: {}", config.influx.url, e),
                },
            });
        } else {
            checks.push(DoctorCheck {
                name: "influxdb".to_string(),
                status: CheckStatus::Warning,
                message: "Recording disabled, InfluxDB not checked".to_string(),
            });
        }
    }

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: RELAY_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("e4-relay Doctor Report");
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
        Err(RelayCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(json_schema: bool) -> Result<(), RelayCliError> {
    if json_schema {
        println!("{}", serde_json::to_string_pretty(&input_json_schema())?);
        return Ok(());
    }

    println!("Inbound event schema (POST /data)");
    println!();
    println!("Common fields:");
    println!("  type       acc | bvp | temp | gsr | tag (required)");
    println!("  device     device identifier");
    println!("  run        run tag");
    println!("  timestamp  device timestamp in milliseconds (required)");
    println!();
    println!("Per type:");
    println!("  acc   x, y, z     tilt, calibrated range [-90, 90]");
    println!("  bvp   value       blood-volume pulse, calibrated range [-80, 80]");
    println!("  temp  value       skin temperature, calibrated range [25, 36]");
    println!("  gsr   value       galvanic skin response, calibrated range [0.06, 0.08]");
    println!("  tag   value       label (string, number or bool), passed through");
    println!();
    println!(
        "Stream addresses: /e4/acc/x, /e4/acc/y, /e4/acc/z, /e4/bvp, /e4/temp, /e4/gsr, /e4/tag"
    );

    Ok(())
}

// Helper functions

fn read_events(input: &Path, format: InputFormat) -> Result<Vec<RawSensorEvent>, RelayCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let events = match format {
        InputFormat::Ndjson => EventLog::parse_ndjson(&input_data)?,
        InputFormat::Json => EventLog::parse_array(&input_data)?,
    };
    Ok(events)
}

fn input_json_schema() -> serde_json::Value {
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "E4 sensor event",
        "type": "object",
        "required": ["type", "timestamp"],
        "properties": {
            "type": { "type": "string", "enum": ["acc", "bvp", "temp", "gsr", "tag"] },
            "device": { "type": "string" },
            "run": { "type": "string" },
            "timestamp": { "type": "number" },
            "value": { "type": ["number", "string", "boolean"] },
            "x": { "type": "number" },
            "y": { "type": "number" },
            "z": { "type": "number" }
        },
        "allOf": [
            {
                "if": { "properties": { "type": { "const": "acc" } } },
                "then": { "required": ["x", "y", "z"] },
                "else": { "required": ["value"] }
            }
        ]
    })
}

// Error types

#[derive(Debug)]
enum RelayCliError {
    Io(io::Error),
    Json(serde_json::Error),
    Relay(RelayError),
    NoEvents,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for RelayCliError {
    fn from(e: io::Error) -> Self {
        RelayCliError::Io(e)
    }
}

impl From<serde_json::Error> for RelayCliError {
    fn from(e: serde_json::Error) -> Self {
        RelayCliError::Json(e)
    }
}

impl From<RelayError> for RelayCliError {
    fn from(e: RelayError) -> Self {
        RelayCliError::Relay(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<RelayCliError> for CliError {
    fn from(e: RelayCliError) -> Self {
        match e {
            RelayCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths, permissions and the listen address".to_string()),
            },
            RelayCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            RelayCliError::Relay(e) => {
                let (code, hint) = match &e {
                    RelayError::ConfigError(_) => (
                        "CONFIG_ERROR",
                        "Check config/e4-relay.toml and E4_RELAY_* variables",
                    ),
                    RelayError::InvalidCalibration { .. } => {
                        ("CALIBRATION_ERROR", "Calibration ranges must have distinct finite bounds")
                    }
                    RelayError::DecodeError(_) | RelayError::JsonError(_) => {
                        ("PARSE_ERROR", "Run 'e4-relay schema' for the expected event format")
                    }
                    RelayError::SinkError(_) => {
                        ("SINK_ERROR", "Run 'e4-relay doctor' to check sink reachability")
                    }
                    RelayError::IoError(_) => ("IO_ERROR", "Check file paths and permissions"),
                    RelayError::ServerError(_) => {
                        ("SERVER_ERROR", "Check that the listen address is free")
                    }
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            RelayCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No events found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            RelayCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} events failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            RelayCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_events: usize,
    valid_events: usize,
    invalid_events: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    event_type: Option<String>,
    error: String,
}

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
