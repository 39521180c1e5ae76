mod app;
mod cli;
mod config;
mod core;
mod platform;
mod ui;
mod utils;

use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::cli::{Cli, Commands};
use crate::config::{CONFIG_FILE_DEFAULT, Config};
use crate::core::controller::{RunHandle, VolumeLifecycleController};
use crate::core::reporter::{ChannelReporter, LogReporter, ProgressReporter};
use crate::core::{ControllerError, FormatMode, RunOutcome, VolumeRequest, VolumeState};
use crate::platform::Platform;
use crate::utils::format_size;

const DEFAULT_LOG_FILTER: &str = "volwipe=info,warn";
const LOG_FILE_NAME: &str = "volwipe.log";
const TICK: Duration = Duration::from_millis(100);
/// Ticks between volume table refreshes in the dialog
const REFRESH_TICKS: u64 = 20;

fn load_config(cli: &Cli) -> Result<Config> {
    if let Some(config_path) = &cli.config {
        return Config::from_file(config_path)
            .with_context(|| format!("Failed to load config {}", config_path.display()));
    }
    Config::load_default().with_context(|| format!("Failed to load config {CONFIG_FILE_DEFAULT}"))
}

fn log_filter(config: &Config) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives = config.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
        EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    })
}

fn init_stderr_logging(config: &Config) {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(config))
        .with_writer(io::stderr)
        .init();
}

/// Logs to a file so the terminal dialog stays intact
fn init_file_logging(config: &Config) -> Option<WorkerGuard> {
    let appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::NEVER)
        .filename_prefix(LOG_FILE_NAME)
        .build(&config.log_dir);

    match appender {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(log_filter(config))
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        Err(e) => {
            eprintln!(
                "Warning: cannot log to {}: {e}",
                config.log_dir.display()
            );
            tracing_subscriber::fmt()
                .with_env_filter(log_filter(config))
                .with_writer(io::sink)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Returning instead of exiting lets the runtime drop what is still alive
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            RunOutcome::Failed.exit_code()
        }
    };
    exit_status(code)
}

fn exit_status(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::GenConfig { output } => {
            Config::default().save_to_file(output)?;
            println!("Wrote default config to {}", output.display());
            Ok(0)
        }
        Commands::ShowConfig => {
            let config = load_config(&cli)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(0)
        }
        Commands::Status { state } => {
            let config = load_config(&cli)?;
            init_stderr_logging(&config);
            print_status(&config, *state).await;
            Ok(0)
        }
        Commands::Format {
            path,
            factory_reset,
            always_reset,
            headless,
        } => {
            let config = load_config(&cli)?;
            if config.volume(path).is_none() {
                anyhow::bail!("{path} is not a configured volume");
            }

            let mode = if *factory_reset {
                FormatMode::FormatAndFactoryReset
            } else {
                FormatMode::FormatOnly
            };
            let request = VolumeRequest::new(path.clone(), mode, *always_reset);

            // Escalation re-executes the binary, so it must happen before
            // logging or the terminal are set up
            utils::ensure_root()?;

            let outcome = if *headless {
                init_stderr_logging(&config);
                run_headless(&config, request).await?
            } else {
                let _guard = init_file_logging(&config);
                run_dialog(&config, request).await?
            };
            Ok(outcome.exit_code())
        }
    }
}

async fn print_status(config: &Config, only: Option<VolumeState>) {
    let platform = platform::build(config);
    let volumes: Vec<_> = platform
        .probe
        .status()
        .await
        .into_iter()
        .filter(|v| only.is_none_or(|state| v.state == state))
        .collect();
    if volumes.is_empty() {
        println!("No matching volumes");
        return;
    }

    println!("{:<24} {:<20} {:>12}  STATE", "PATH", "DEVICE", "SIZE");
    for volume in volumes {
        println!(
            "{:<24} {:<20} {:>12}  {}",
            volume.path,
            volume.device,
            format_size(volume.size_bytes),
            volume.state
        );
    }
}

fn controller(
    config: &Config,
    platform: &Platform,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<VolumeLifecycleController> {
    Ok(VolumeLifecycleController::new(
        platform.service.clone(),
        platform.probe.clone(),
        reporter,
        platform.wipe.clone(),
        platform.keep_alive.clone(),
        config.coupling_table()?,
    ))
}

fn start_run(
    controller: &VolumeLifecycleController,
    request: VolumeRequest,
) -> Result<RunHandle> {
    match controller.start(request) {
        Ok(handle) => Ok(handle),
        Err(e @ ControllerError::RunActive { .. }) => {
            tracing::warn!("{e}; request ignored");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_headless(config: &Config, request: VolumeRequest) -> Result<RunOutcome> {
    let platform = platform::build(config);
    let controller = controller(config, &platform, Arc::new(LogReporter))?;
    let cancellable = !request.always_reset;
    let handle = start_run(&controller, request)?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    let outcome = loop {
        tokio::select! {
            res = &mut ctrl_c, if cancellable && !interrupted => {
                interrupted = true;
                match res {
                    Ok(()) => {
                        tracing::info!("Interrupted, cancelling run for {}", handle.target());
                        handle.cancel();
                    }
                    Err(e) => tracing::warn!("Cannot listen for Ctrl-C: {e}"),
                }
            }
            _ = tokio::time::sleep(TICK) => {
                if handle.is_finished() {
                    break handle.wait().await;
                }
            }
        }
    };

    tracing::info!(?outcome, "Exiting");
    Ok(outcome)
}

async fn run_dialog(config: &Config, request: VolumeRequest) -> Result<RunOutcome> {
    // Safety check: Validate terminal size BEFORE entering raw mode or alternate screen.
    let (cols, rows) = crossterm::terminal::size()?;
    if cols == 0 || rows == 0 || cols > 1000 || rows > 1000 {
        anyhow::bail!(
            "Invalid terminal size detected ({}x{}). Please ensure you're running in a valid terminal.",
            cols,
            rows
        );
    }

    let platform = platform::build(config);
    let (progress_tx, progress_rx) = tokio::sync::mpsc::unbounded_channel();
    let controller = controller(config, &platform, Arc::new(ChannelReporter::new(progress_tx)))?;

    let mut app = App::new(
        &request,
        platform.service.has_privileges(),
        platform.probe.clone(),
        progress_rx,
    );
    app.refresh_volumes().await;

    // Terminal first: nothing has been touched if this fails
    let mut terminal = setup_terminal()?;

    let result = async {
        app.attach(start_run(&controller, request)?);
        run_app(&mut terminal, &mut app).await
    }
    .await;
    let restored = restore_terminal(&mut terminal);

    if let Err(e) = result.and(restored) {
        // The run must not outlive the process
        if let Some(outcome) = app.abandon().await {
            tracing::warn!(?outcome, "Run stopped after dialog error");
        }
        return Err(e);
    }
    Ok(app.finish().await)
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    if let Err(e) = execute!(stdout, EnterAlternateScreen, EnableMouseCapture) {
        let _ = disable_raw_mode();
        return Err(e.into());
    }

    let backend = CrosstermBackend::new(stdout);
    match Terminal::new(backend) {
        Ok(terminal) => Ok(terminal),
        Err(e) => {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
            Err(e.into())
        }
    }
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

async fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    loop {
        app.tick = app.tick.wrapping_add(1);

        if (app.drain_progress() && app.is_finished()) || app.tick % REFRESH_TICKS == 0 {
            app.refresh_volumes().await;
        }

        terminal.draw(|f| ui::draw(f, app))?;

        // Poll for events with timeout for tick
        if event::poll(TICK)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }

                if app.is_finished() {
                    app.should_quit = true;
                } else if key.code == KeyCode::Esc {
                    app.cancel();
                }

                if app.should_quit {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn log_filter_falls_back_on_bad_directive() {
        let config = Config {
            log_filter: Some("volwipe=[".to_string()),
            ..Config::default()
        };
        // Must not panic on an unparsable directive
        let _ = log_filter(&config);
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let cli = Cli::parse_from([
            "volwipe",
            "--config",
            "/nonexistent/volwipe.toml",
            "show-config",
        ]);
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn outcomes_map_to_exit_statuses() {
        let same = |a: ExitCode, b: ExitCode| format!("{a:?}") == format!("{b:?}");
        assert!(same(exit_status(RunOutcome::Success.exit_code()), ExitCode::SUCCESS));
        assert!(same(exit_status(RunOutcome::Cancelled.exit_code()), ExitCode::from(130)));
        assert!(same(exit_status(-1), ExitCode::FAILURE));
    }

    #[test]
    fn default_filter_is_valid() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
        assert!(Path::new(CONFIG_FILE_DEFAULT).is_absolute());
    }
}
