// ============================================================================
// Worker d'ingestion : polling périodique + chargement des textures
// ============================================================================
// CONCEPT RUST : Background async worker avec channels
// - Thread OS dédié qui héberge un runtime tokio
// - Reçoit des FeedCommand (tokio mpsc, non bloquant côté UI)
// - Renvoie des FeedEvent (std mpsc, lus avec try_recv entre deux frames)
// - S'arrête quand son CancellationToken est annulé
//
// Le thread de rendu n'attend jamais le réseau : il continue à animer la
// scène pendant qu'un fetch est en cours.
// ============================================================================

use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::market::{build_client, fetch_snapshot};
use crate::api::texture::fetch_texture;
use crate::config::FeedConfig;
use crate::models::{NodeRef, SnapshotBatch};

/// Demande de chargement de texture pour un noeud
#[derive(Debug, Clone)]
pub struct TextureRequest {
    pub node: NodeRef,
    pub url: String,
    /// Annulé quand le noeud est retiré du registre
    pub token: CancellationToken,
}

/// Commandes envoyées au worker
#[derive(Debug)]
pub enum FeedCommand {
    /// Fetch immédiat, hors calendrier
    RefreshNow,
    LoadTexture(TextureRequest),
}

/// Résultats renvoyés par le worker
#[derive(Debug)]
pub enum FeedEvent {
    FetchStarted,
    Snapshot(SnapshotBatch),
    FetchFailed { error: String, retry_in: Duration },
    /// Le worker ne peut pas démarrer : aucun nouvel essai
    WorkerStopped { error: String },
    TextureLoaded { node: NodeRef, bytes: Vec<u8> },
    TextureFailed { node: NodeRef, error: String },
}

// ============================================================================
// Backoff exponentiel borné
// ============================================================================

/// delay = min(interval * 2^failures, max) ; remis à zéro au premier succès
#[derive(Debug, Clone)]
pub struct Backoff {
    interval: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(interval: Duration, max: Duration) -> Self {
        Self {
            interval,
            max: max.max(interval),
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn on_success(&mut self) -> Duration {
        self.failures = 0;
        self.interval
    }

    pub fn on_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let factor = 2u32.saturating_pow(self.failures.min(16));
        self.interval.saturating_mul(factor).min(self.max)
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Lance le worker d'ingestion dans un thread dédié
pub fn spawn_feed_worker(
    config: FeedConfig,
    events: mpsc::Sender<FeedEvent>,
    commands: UnboundedReceiver<FeedCommand>,
    token: CancellationToken,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("feed-worker".to_string())
        .spawn(move || {
            // Runtime propre à ce thread
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!(error = ?e, "Failed to create tokio runtime for feed worker");
                    let _ = events.send(FeedEvent::WorkerStopped { error: e.to_string() });
                    return;
                }
            };
            runtime.block_on(run_feed(config, events, commands, token));
            info!("Feed worker exiting");
        })
        .context("Échec du lancement du worker d'ingestion")
}

/// Boucle de polling ; retourne à l'annulation ou à la fermeture des commandes
pub async fn run_feed(
    config: FeedConfig,
    events: mpsc::Sender<FeedEvent>,
    mut commands: UnboundedReceiver<FeedCommand>,
    token: CancellationToken,
) {
    let client = match build_client(&config) {
        Ok(client) => client,
        Err(e) => {
            error!(error = ?e, "Feed worker cannot start");
            let _ = events.send(FeedEvent::WorkerStopped { error: e.to_string() });
            return;
        }
    };

    let mut backoff = Backoff::new(config.poll_interval(), config.max_backoff());

    // Premier fetch immédiat
    let sleep = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(sleep);

    info!(endpoint = %config.endpoint, interval = ?config.poll_interval(), "Feed polling started");

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                info!("Feed polling cancelled");
                break;
            }

            _ = &mut sleep => {
                match poll_cancellable(&client, &config.endpoint, &mut backoff, &events, &token).await {
                    Some(delay) => sleep.as_mut().reset(Instant::now() + delay),
                    None => break,
                }
            }

            command = commands.recv() => match command {
                Some(FeedCommand::RefreshNow) => {
                    debug!("Manual refresh requested");
                    match poll_cancellable(&client, &config.endpoint, &mut backoff, &events, &token).await {
                        Some(delay) => sleep.as_mut().reset(Instant::now() + delay),
                        None => break,
                    }
                }
                Some(FeedCommand::LoadTexture(request)) => {
                    tokio::spawn(load_texture(client.clone(), request, config.max_texture_bytes, events.clone()));
                }
                None => {
                    info!("Feed command channel closed");
                    break;
                }
            }
        }
    }
}

/// Un fetch, interrompu si le token est annulé entre-temps
async fn poll_cancellable(
    client: &reqwest::Client,
    endpoint: &str,
    backoff: &mut Backoff,
    events: &mpsc::Sender<FeedEvent>,
    token: &CancellationToken,
) -> Option<Duration> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        delay = poll_once(client, endpoint, backoff, events) => Some(delay),
    }
}

/// Un cycle d'ingestion ; retourne le délai avant le prochain
pub async fn poll_once(
    client: &reqwest::Client,
    endpoint: &str,
    backoff: &mut Backoff,
    events: &mpsc::Sender<FeedEvent>,
) -> Duration {
    let _ = events.send(FeedEvent::FetchStarted);

    match fetch_snapshot(client, endpoint).await {
        Ok(batch) => {
            let _ = events.send(FeedEvent::Snapshot(batch));
            backoff.on_success()
        }
        Err(e) => {
            let retry_in = backoff.on_failure();
            warn!(error = ?e, failures = backoff.failures(), retry_in = ?retry_in, "Market fetch failed, keeping previous state");
            let _ = events.send(FeedEvent::FetchFailed {
                error: format!("{:#}", e),
                retry_in,
            });
            retry_in
        }
    }
}

async fn load_texture(
    client: reqwest::Client,
    request: TextureRequest,
    max_bytes: usize,
    events: mpsc::Sender<FeedEvent>,
) {
    let TextureRequest { node, url, token } = request;

    tokio::select! {
        biased;

        _ = token.cancelled() => {
            debug!(id = %node.id, "Texture load cancelled");
        }

        result = fetch_texture(&client, &url, max_bytes) => {
            let event = match result {
                Ok(bytes) => FeedEvent::TextureLoaded { node, bytes },
                Err(e) => {
                    warn!(id = %node.id, url = %url, error = ?e, "Texture load failed, keeping default material");
                    FeedEvent::TextureFailed { node, error: e.to_string() }
                }
            };
            let _ = events.send(event);
        }
    }
}

// ============================================================================
// Tests unitaires
// ============================================================================
