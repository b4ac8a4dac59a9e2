//! Modemlink - LTE modem control bridge
//!
//! Brings up a modem on a serial port, runs AT commands through the
//! modem worker and monitors network registration.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use modemlink_core::cli::print_exit_codes;
use modemlink_core::{
    AppConfig, CliResult, ConfigError, ExitCodes, LoggingBridge, LoggingConfig, Modem, ModemError,
    SerialTransport, SessionState, TransportError,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// CLI output format
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format for scripting
    Json,
}

/// Modemlink CLI
#[derive(Parser, Debug)]
#[command(
    name = "modemlink",
    version,
    about = "LTE modem control bridge over a serial link",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "MODEMLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Serial port, overrides the config file
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate, overrides the config file
    #[arg(short, long)]
    baud: Option<u32>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    Ports,

    /// Bring the modem up and run one AT command
    At {
        /// Command text, without line terminator
        command: String,

        /// Response budget in polls
        #[arg(short, long)]
        timeout: Option<u32>,
    },

    /// Bring the modem up and follow its state until Ctrl+C
    Monitor {
        /// Dial command that switches the modem to data mode once attached
        #[arg(long)]
        dial: Option<String>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Print the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        save: bool,
    },

    /// Print the exit code table
    ExitCodes,
}

fn init_logging(config: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let Some(path) = &config.file else {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);
        if config.json {
            builder.json().init();
        } else {
            builder.init();
        }
        return None;
    };

    let dir = path
        .parent()
        .map(PathBuf::from)
        .or_else(modemlink_core::config::log_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .map_or_else(|| "modemlink.log".into(), |n| n.to_os_string());
    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Some(guard)
}

fn load_config(cli: &Cli) -> Result<AppConfig, ConfigError> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(port) = &cli.port {
        config.serial.port.clone_from(port);
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    Ok(config)
}

fn spawn_modem(config: &AppConfig) -> Result<Modem, ModemError> {
    let transport = SerialTransport::open(config.serial.clone())?;
    tracing::info!(link = %transport.connection_info(), "modem link open");
    Modem::spawn(
        transport,
        Box::new(LoggingBridge::new()),
        config.modem.clone(),
    )
}

/// Map an error onto an exit code, keeping the typed cases apart
fn classify(err: anyhow::Error) -> CliResult {
    let err = match err.downcast::<ModemError>() {
        Ok(e) => return e.into(),
        Err(err) => err,
    };
    let err = match err.downcast::<TransportError>() {
        Ok(e) => return e.into(),
        Err(err) => err,
    };
    let err = match err.downcast::<ConfigError>() {
        Ok(e) => return e.into(),
        Err(err) => err,
    };
    CliResult::error(ExitCodes::ERROR, format!("{err:#}"))
}

fn list_ports(cli: &Cli) -> anyhow::Result<CliResult> {
    let ports = modemlink_core::core::transport::list_ports()?;

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            println!("{}", serde_json::Value::Array(json));
        }
        OutputFormat::Text => {
            if ports.is_empty() {
                println!("No serial ports found.");
            }
            for port in &ports {
                println!("{} [{:?}]", port.port_name, port.port_type);
            }
        }
    }
    Ok(CliResult::success())
}

fn run_at(
    cli: &Cli,
    config: &AppConfig,
    command: &str,
    timeout: Option<u32>,
) -> anyhow::Result<CliResult> {
    let modem = spawn_modem(config)?;
    let timeout = timeout.unwrap_or(config.modem.rx_timeout_default);

    let rsp = match modem.send_at(command, timeout) {
        Ok(rsp) => rsp,
        Err(e) => return Ok(CliResult::error(ExitCodes::INVALID_ARGS, e.to_string())),
    };

    match cli.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "command": command,
                "ok": rsp.ok,
                "response": rsp.text_lossy(),
            })
        ),
        OutputFormat::Text => print!("{}", rsp.text_lossy()),
    }

    if rsp.ok {
        Ok(CliResult::success())
    } else {
        Ok(CliResult::command_failed(&rsp.text))
    }
}

fn run_monitor(
    cli: &Cli,
    config: &AppConfig,
    dial: Option<&str>,
    duration: Option<u64>,
) -> anyhow::Result<CliResult> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))
        .context("installing Ctrl+C handler")?;

    let modem = spawn_modem(config)?;
    modem.start();

    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut last = modem.state();
    let mut dialed = false;
    report_state(cli, last);

    while running.load(Ordering::SeqCst) && deadline.map_or(true, |d| Instant::now() < d) {
        std::thread::sleep(Duration::from_millis(100));
        if modem.is_finished() {
            anyhow::bail!("modem worker exited");
        }

        let state = modem.state();
        if state != last {
            report_state(cli, state);
            last = state;
        }

        if let (Some(dial), SessionState::Attached, false) = (dial, state, dialed) {
            dialed = true;
            let rsp = modem
                .enter_link_mode(dial, config.modem.rx_timeout_default)
                .context("invalid dial command")?;
            if !rsp.ok {
                tracing::warn!(response = %rsp.text_lossy().trim(), "dial did not connect");
            }
        }
    }

    if modem.state().is_link_active() {
        modem.stop();
        std::thread::sleep(Duration::from_millis(200));
    }
    Ok(CliResult::success())
}

fn report_state(cli: &Cli, state: SessionState) {
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "state": state })),
        OutputFormat::Text => println!("state: {state}"),
    }
}

fn show_config(config: &AppConfig, cli: &Cli, save: bool) -> anyhow::Result<CliResult> {
    if save {
        config.save(cli.config.as_deref())?;
        return Ok(CliResult::success_with_message("Config saved"));
    }
    let text = toml::to_string_pretty(config).context("serializing config")?;
    print!("{text}");
    Ok(CliResult::success())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return CliResult::from(e).to_exit_code();
        }
    };
    let _guard = init_logging(&config.logging, cli.verbose);

    tracing::debug!("Starting Modemlink v{}", env!("CARGO_PKG_VERSION"));

    let result = match &cli.command {
        Commands::Ports => list_ports(&cli),
        Commands::At { command, timeout } => run_at(&cli, &config, command, *timeout),
        Commands::Monitor { dial, duration } => {
            run_monitor(&cli, &config, dial.as_deref(), *duration)
        }
        Commands::Config { save } => show_config(&config, &cli, *save),
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(CliResult::success())
        }
    };

    let result = result.unwrap_or_else(classify);
    if let Some(msg) = result.message() {
        if result.is_success() {
            eprintln!("{msg}");
        } else {
            eprintln!("error: {msg}");
        }
    }
    result.to_exit_code()
}
