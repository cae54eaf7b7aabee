// ============================================================================
// MarketOrbit - Visualisation 3D du marché dans le terminal
// ============================================================================
// Chaque instrument est une sphère lumineuse : la taille suit la
// capitalisation, la couleur la pression acheteuse, les particules le volume.
//
// CONCEPTS RUST CLÉS :
// 1. Terminal raw mode : contrôle total du terminal
// 2. Event loop : la RenderLoop cadence forces, particules et rendu
// 3. Worker thread : le runtime tokio vit dans son propre thread
// 4. Cancellation : tokens annulés avant la libération des ressources
// ============================================================================

use std::io;
use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::{Context, Result};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use marketorbit::api::spawn_feed_worker;
use marketorbit::app::App;
use marketorbit::config::Config;
use marketorbit::engine::{RenderLoop, Visualizer};
use marketorbit::ui::{render, scene_viewport, TerminalFrames};

// ============================================================================
// Initialisation du logging
// ============================================================================
// CONCEPT : Logging dans une app TUI
// - Les println! ne fonctionnent pas une fois le TUI lancé
// - On log vers un fichier à la place, avec rotation quotidienne
// ============================================================================

/// Initialise le système de logging vers fichier
///
/// Les logs sont écrits dans :
/// - Linux : ~/.local/share/marketorbit/logs/marketorbit.log
/// - macOS : ~/Library/Application Support/marketorbit/logs/marketorbit.log
/// - sinon : ./logs/marketorbit.log
///
/// # Utilisation
/// ```bash
/// tail -f ~/.local/share/marketorbit/logs/marketorbit.log
/// RUST_LOG=marketorbit=trace cargo run
/// ```
fn init_logging() -> Result<()> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_dir = dirs::data_local_dir()
        .map(|dir| dir.join("marketorbit").join("logs"))
        .unwrap_or_else(|| PathBuf::from("./logs"));

    std::fs::create_dir_all(&log_dir).context("Échec de la création du répertoire de logs")?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir.clone(), "marketorbit.log");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marketorbit=debug,info".into()),
        )
        .init();

    info!(?log_dir, "Logging initialisé");
    Ok(())
}

// ============================================================================
// Point d'entrée du programme
// ============================================================================

fn main() -> Result<()> {
    init_logging().unwrap_or_else(|e| {
        eprintln!("⚠️  Warning: Failed to initialize logging: {}", e);
        eprintln!("   Continuing without logging...");
    });

    info!("MarketOrbit starting up");
    let config = Config::load()?;

    debug!("Setting up terminal");
    let mut terminal = setup_terminal()?;

    let result = run(&mut terminal, &config);

    // Restaure le terminal (même en cas d'erreur)
    debug!("Restoring terminal");
    restore_terminal(&mut terminal)?;

    match &result {
        Ok(_) => info!("Application exited normally"),
        Err(e) => error!(error = ?e, "Application exited with error"),
    }

    result
}

/// Lance le worker, fait tourner la boucle de rendu puis attend le worker
///
/// CONCEPT RUST : mpsc channels
/// - events : worker -> boucle de rendu (std, try_recv entre deux frames)
/// - commands : boucle de rendu -> worker (tokio, recv async)
fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, config: &Config) -> Result<()> {
    let viewport = scene_viewport(terminal.size()?);

    let (event_tx, event_rx) = mpsc::channel();
    let (command_tx, command_rx) = tokio::sync::mpsc::unbounded_channel();
    let feed_token = CancellationToken::new();

    info!("Spawning feed worker thread");
    let worker = spawn_feed_worker(config.feed.clone(), event_tx, command_rx, feed_token.clone())?;

    let visualizer = Visualizer::new(config, viewport, feed_token);
    let mut render_loop = RenderLoop::new(visualizer, App::new(), event_rx, command_tx);
    let mut frames = TerminalFrames::new(config.scene.frame_interval());

    info!("Starting render loop");
    let result = render_loop.run(&mut frames, |app, visualizer| {
        terminal.draw(|frame| render(frame, app, visualizer))?;
        Ok(())
    });

    // run() a annulé le token du worker : il sort de sa boucle
    if worker.join().is_err() {
        error!("Feed worker panicked");
    }

    result
}

// ============================================================================
// Setup et restauration du terminal
// ============================================================================
// IMPORTANT : Toujours restaurer le terminal avant de quitter !
// ============================================================================

/// Configure le terminal en mode TUI
fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;

    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).map_err(|e| e.into())
}

/// Restaure le terminal à son état normal
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
