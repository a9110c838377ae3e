use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self as ct_event, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use nix::sys::signal::Signal;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use procpane::app::App;
use procpane::config::{self, Config, DEFAULT_CONFIG_FILE};
use procpane::data::headless::{any_failed, HeadlessPrinter};
use procpane::data::supervisor::Supervisor;
use procpane::event::AppEvent;
use procpane::ui;

#[derive(Parser)]
#[command(
    name = "procpane",
    version,
    about = "Run a group of dev processes and watch them in one pane"
)]
struct Cli {
    /// Process list to supervise
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Print output to stdout instead of starting the TUI
    #[arg(long)]
    headless: bool,

    /// Where TUI mode writes its log [default: <tmp>/procpane.log]
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    init_logging(&cli)?;

    let config = config::load_config(&cli.config)?;
    let kill_signal = config.kill_signal()?;
    let base_dir = config_dir(&cli.config);

    let supervisor =
        Supervisor::launch_all(config.definitions(&base_dir), config.buffer_config()?)?;
    install_panic_hook(supervisor.clone(), cli.headless);

    let result = supervise(&cli, &config, &supervisor, kill_signal);
    stop_on_error(&supervisor, kill_signal, result)
}

/// Everything after launch. Any error escaping here leaves children running.
fn supervise(
    cli: &Cli,
    config: &Config,
    supervisor: &Supervisor,
    kill_signal: Signal,
) -> Result<ExitCode> {
    let (tx, rx) = mpsc::channel::<AppEvent>();
    spawn_signal_listener(tx.clone())?;

    let snapshot_tx = tx;
    let observation = supervisor.observe(move |snapshot| {
        let _ = snapshot_tx.send(AppEvent::Snapshot(snapshot.clone()));
    });

    let result = if cli.headless {
        run_headless(supervisor, config, kill_signal, rx, &mut io::stdout().lock())
    } else {
        run_tui(supervisor.clone(), config, kill_signal, rx).map(|()| ExitCode::SUCCESS)
    };

    observation.cancel();
    result
}

/// Stop every process group before an error takes us down.
fn stop_on_error<T>(
    supervisor: &Supervisor,
    kill_signal: Signal,
    result: Result<T>,
) -> Result<T> {
    if let Err(ref e) = result {
        error!(error = %e, "stopping all processes after error");
        supervisor.kill_all(kill_signal);
    }
    result
}

fn init_logging(cli: &Cli) -> Result<()> {
    let default_level = if cli.verbose {
        "procpane=debug"
    } else {
        "procpane=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if cli.headless {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    } else {
        // The terminal belongs to the UI, so logs go to a file.
        let path = cli
            .log_file
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("procpane.log"));
        let file = File::create(&path)
            .with_context(|| format!("failed to create log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Arc::new(file))
            .init();
    }
    Ok(())
}

/// Relative `cwd` entries resolve against the config file's directory.
fn config_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn install_panic_hook(supervisor: Supervisor, headless: bool) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if !headless {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen);
        }
        supervisor.kill_all(Signal::SIGTERM);
        default_hook(info);
    }));
}

fn spawn_signal_listener(tx: mpsc::Sender<AppEvent>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
    thread::spawn(move || {
        for sig in signals.forever() {
            if tx.send(AppEvent::Signal(sig)).is_err() {
                break;
            }
        }
    });
    Ok(())
}

fn run_tui(
    supervisor: Supervisor,
    config: &Config,
    kill_signal: Signal,
    rx: mpsc::Receiver<AppEvent>,
) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run app
    let result = run_app(&mut terminal, supervisor.clone(), config, kill_signal, rx);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(ref e) = result {
        error!(error = %e, "ui loop failed");
        supervisor.kill_all(kill_signal);
        if !supervisor.wait_until_settled(config.grace_period()) {
            warn!("processes still running after grace period");
        }
    }
    result
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    supervisor: Supervisor,
    config: &Config,
    kill_signal: Signal,
    rx: mpsc::Receiver<AppEvent>,
) -> Result<()> {
    let mut app = App::new(supervisor, config, kill_signal);

    let tick_rate = Duration::from_millis(config.tick_rate());
    let mut last_tick = Instant::now();

    loop {
        // Draw only when dirty
        if app.dirty {
            terminal.draw(|f| ui::draw(f, &app))?;
            app.dirty = false;
        }

        app.output_height = ui::layout::output_rows(terminal.size()?.height);

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());

        if ct_event::poll(timeout)? {
            if let Event::Key(key) = ct_event::read()? {
                if key.kind == KeyEventKind::Press {
                    handle_key(&mut app, key);
                    app.mark_dirty();
                }
            }
        }

        // Coalesce snapshot bursts: only the newest one matters.
        let mut latest = None;
        while let Ok(evt) = rx.try_recv() {
            match evt {
                AppEvent::Snapshot(snapshot) => latest = Some(snapshot),
                AppEvent::Signal(sig) => {
                    info!(signal = sig, "host signal received");
                    app.request_quit();
                }
            }
        }
        if let Some(snapshot) = latest {
            app.handle_snapshot(snapshot);
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
            app.tick();
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keybindings (always active)
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.request_quit();
            return;
        }
        KeyCode::Char('h') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.show_help = !app.show_help;
            return;
        }
        KeyCode::Char('?') => {
            app.show_help = !app.show_help;
            return;
        }
        KeyCode::Esc if app.show_help => {
            app.show_help = false;
            return;
        }
        KeyCode::Char('q') => {
            app.request_quit();
            return;
        }
        _ => {}
    }

    if app.show_help || app.exiting {
        return;
    }

    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.move_down(),
        KeyCode::Char('k') | KeyCode::Up => app.move_up(),
        KeyCode::Char('l') | KeyCode::Right | KeyCode::Enter => app.next_pane(),
        KeyCode::Char('h') | KeyCode::Left | KeyCode::Esc => app.prev_pane(),
        KeyCode::Char('g') => app.jump_top(),
        KeyCode::Char('G') => app.jump_bottom(),
        KeyCode::Char('f') => app.toggle_follow(),
        KeyCode::Char('x') => app.kill_selected_process(),
        KeyCode::Char('X') => app.kill_all_processes(),
        _ => {}
    }
}

/// Stream output to stdout until every process settles. A host signal
/// stops everything and waits out the grace period.
fn run_headless<W: Write>(
    supervisor: &Supervisor,
    config: &Config,
    kill_signal: Signal,
    rx: mpsc::Receiver<AppEvent>,
    out: &mut W,
) -> Result<ExitCode> {
    let mut snapshot = supervisor.get_state();
    let mut printer = HeadlessPrinter::new(snapshot.len());
    let mut deadline: Option<Instant> = None;
    let poll = Duration::from_millis(config.tick_rate());

    loop {
        printer.print(&snapshot, out)?;
        if snapshot.is_settled() {
            break;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                warn!("grace period expired, leaving processes behind");
                break;
            }
        }

        match rx.recv_timeout(poll) {
            Ok(AppEvent::Snapshot(next)) => snapshot = next,
            Ok(AppEvent::Signal(sig)) => {
                info!(signal = sig, "host signal received");
                if deadline.is_none() {
                    supervisor.kill_all(kill_signal);
                    deadline = Some(Instant::now() + config.grace_period());
                } else {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    if deadline.is_none() && any_failed(&snapshot) {
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procpane::model::line_buffer::LineBufferConfig;
    use procpane::model::process::ProcessDefinition;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn test_output_error_stops_every_group() {
        let defs = vec![ProcessDefinition::new(
            "a",
            vec!["sh".into(), "-c".into(), "echo one; exec sleep 30".into()],
        )];
        let supervisor = Supervisor::launch_all(defs, LineBufferConfig::default()).unwrap();
        let deadline = Duration::from_secs(10);
        supervisor
            .wait_until(deadline, |s| s.running_count() == 1)
            .unwrap();

        let (tx, rx) = mpsc::channel();
        let observation = supervisor.observe(move |snapshot| {
            let _ = tx.send(AppEvent::Snapshot(snapshot.clone()));
        });
        let result = run_headless(
            &supervisor,
            &Config::default(),
            Signal::SIGTERM,
            rx,
            &mut BrokenPipe,
        );
        observation.cancel();
        assert!(result.is_err());

        let result = stop_on_error(&supervisor, Signal::SIGTERM, result);
        assert!(result.is_err());
        assert!(supervisor.wait_until_settled(deadline));
    }

    #[test]
    fn test_headless_exit_code_reflects_failures() {
        let defs = vec![
            ProcessDefinition::new("ok", vec!["true".into()]),
            ProcessDefinition::new(
                "bad",
                vec!["sh".into(), "-c".into(), "echo no; exit 2".into()],
            ),
        ];
        let supervisor = Supervisor::launch_all(defs, LineBufferConfig::default()).unwrap();
        let (tx, rx) = mpsc::channel();
        let observation = supervisor.observe(move |snapshot| {
            let _ = tx.send(AppEvent::Snapshot(snapshot.clone()));
        });
        let mut out = Vec::new();
        let code = run_headless(&supervisor, &Config::default(), Signal::SIGTERM, rx, &mut out)
            .unwrap();
        observation.cancel();

        assert_eq!(format!("{:?}", code), format!("{:?}", ExitCode::from(1)));
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("[bad] no\n"));
        assert!(text.contains("[bad] exited with code 2\n"));
        assert!(text.contains("[ok] exited with code 0\n"));
    }

    #[test]
    fn test_config_dir_of_bare_file_is_cwd() {
        assert_eq!(config_dir(Path::new("procpane.toml")), PathBuf::from("."));
        assert_eq!(
            config_dir(Path::new("/srv/app/procpane.toml")),
            PathBuf::from("/srv/app")
        );
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["procpane"]);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert!(!cli.headless);
        assert!(!cli.verbose);
        assert!(cli.log_file.is_none());

        let cli = Cli::parse_from(["procpane", "--headless", "-c", "x.toml", "-v"]);
        assert!(cli.headless);
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("x.toml"));
    }
}
