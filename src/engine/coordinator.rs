// ============================================================================
// Coordinateur : Visualizer + boucle de rendu
// ============================================================================
// Le Visualizer séquence tout ce qui touche au registre sur un seul thread :
// - apply_snapshot() : réconciliation + particules, en un seul batch
// - tick()           : forces -> particules -> rendu, dans cet ordre
// - shutdown()       : annule les tokens AVANT de libérer la scène
//
// La RenderLoop tire des FrameEvent d'une FrameSource (terminal ou script),
// vide les résultats du worker d'ingestion entre deux frames et délègue
// l'affichage à une closure.
// ============================================================================

use std::sync::mpsc::{self, TryRecvError};

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::poller::{FeedCommand, FeedEvent, TextureRequest};
use crate::app::{App, AppAction};
use crate::config::Config;
use crate::engine::particles::ParticleSystem;
use crate::engine::physics::ForceSimulator;
use crate::engine::registry::{NodeRegistry, ReconcileReport};
use crate::engine::scene::{Scene, TextureOutcome, Viewport};
use crate::models::{NodeRef, SnapshotBatch};
use crate::ui::events::Event;

// ============================================================================
// Visualizer
// ============================================================================

pub struct Visualizer {
    registry: NodeRegistry,
    simulator: ForceSimulator,
    particles: ParticleSystem,
    scene: Scene,
    rng: StdRng,
    feed_token: CancellationToken,
    render_token: CancellationToken,
    frames: u64,
}

impl Visualizer {
    /// `feed_token` est le token du worker d'ingestion ; les tokens de
    /// texture en sont dérivés.
    pub fn new(config: &Config, viewport: Viewport, feed_token: CancellationToken) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        info!(seed, width = viewport.width, height = viewport.height, "Visualizer created");

        Self {
            registry: NodeRegistry::new(config.layout.clone()),
            simulator: ForceSimulator::new(config.physics.clone()),
            particles: ParticleSystem::new(config.particles.clone()),
            scene: Scene::new(viewport, &config.scene),
            rng: StdRng::seed_from_u64(seed),
            feed_token,
            render_token: CancellationToken::new(),
            frames: 0,
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    pub fn feed_token(&self) -> &CancellationToken {
        &self.feed_token
    }

    pub fn render_token(&self) -> &CancellationToken {
        &self.render_token
    }

    /// Faux dès que la boucle est annulée ou la scène détruite
    pub fn is_active(&self) -> bool {
        !self.render_token.is_cancelled() && !self.scene.is_disposed()
    }

    /// Applique un snapshot complet, atomiquement entre deux ticks
    ///
    /// Retourne les chargements de texture à lancer pour les noeuds créés.
    pub fn apply_snapshot(&mut self, batch: &SnapshotBatch) -> (ReconcileReport, Vec<TextureRequest>) {
        if self.scene.is_disposed() {
            debug!(records = batch.len(), "Snapshot arrived after teardown, dropped");
            return (ReconcileReport::default(), Vec::new());
        }

        let report = self.registry.reconcile(batch, self.scene.gpu_mut(), &mut self.rng);
        let rebuilt = self.particles.sync(&mut self.registry, self.scene.gpu_mut(), &mut self.rng);
        debug!(rebuilt, "Particle clouds synchronized");

        let mut requests = Vec::new();
        for node in &report.created {
            let Some(url) = self.registry.resolve(node).and_then(|n| n.image_url.clone()) else {
                continue;
            };
            let token = self.feed_token.child_token();
            if self.registry.attach_texture_token(node, token.clone()) {
                requests.push(TextureRequest {
                    node: node.clone(),
                    url,
                    token,
                });
            }
        }

        (report, requests)
    }

    /// Résultat asynchrone d'un chargement de texture
    pub fn apply_texture(&mut self, node: &NodeRef, bytes: Vec<u8>) -> TextureOutcome {
        self.scene.apply_texture(&mut self.registry, node, bytes)
    }

    /// Échec de chargement : le noeud garde son matériau par défaut
    pub fn texture_failed(&mut self, node: &NodeRef) {
        if let Some(target) = self.registry.resolve_mut(node) {
            target.texture_token = None;
        }
    }

    /// Une frame : forces, particules puis rendu
    pub fn tick(&mut self) {
        if !self.is_active() {
            return;
        }
        self.simulator.step(&mut self.registry);
        self.particles.update(&mut self.registry, &mut self.rng);
        self.scene.render(&self.registry);
        self.frames += 1;
    }

    pub fn handle_resize(&mut self, viewport: Viewport) -> bool {
        self.scene.resize(viewport)
    }

    /// Arrêt ordonné : tokens d'abord, ressources ensuite
    pub fn shutdown(&mut self) {
        if self.scene.is_disposed() {
            return;
        }
        self.feed_token.cancel();
        self.render_token.cancel();
        self.scene.teardown(&mut self.registry);
        info!(
            frames = self.frames,
            live_resources = self.scene.gpu().live_count(),
            "Visualizer shut down"
        );
    }
}

// ============================================================================
// Boucle de rendu
// ============================================================================

/// Événements consommés par la boucle de rendu
#[derive(Debug, Clone)]
pub enum FrameEvent {
    /// Une frame est due
    Frame,
    Resize(Viewport),
    /// Touche à interpréter par App
    Input(Event),
    Quit,
}

/// Source d'événements de frame
///
/// CONCEPT RUST : Trait comme point d'extension
/// - TerminalFrames lit crossterm
/// - Les tests utilisent une liste scriptée
pub trait FrameSource {
    fn next_event(&mut self) -> Result<FrameEvent>;
}

pub struct RenderLoop {
    visualizer: Visualizer,
    app: App,
    feed_events: mpsc::Receiver<FeedEvent>,
    commands: UnboundedSender<FeedCommand>,
    worker_lost: bool,
}

impl RenderLoop {
    pub fn new(
        visualizer: Visualizer,
        app: App,
        feed_events: mpsc::Receiver<FeedEvent>,
        commands: UnboundedSender<FeedCommand>,
    ) -> Self {
        Self {
            visualizer,
            app,
            feed_events,
            commands,
            worker_lost: false,
        }
    }

    pub fn visualizer(&self) -> &Visualizer {
        &self.visualizer
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    /// Tourne jusqu'à la sortie, puis arrête proprement le Visualizer
    ///
    /// `present` reçoit l'état après chaque frame rendue.
    pub fn run<S, P>(&mut self, source: &mut S, mut present: P) -> Result<()>
    where
        S: FrameSource,
        P: FnMut(&App, &Visualizer) -> Result<()>,
    {
        info!("Render loop started");
        let result = self.run_frames(source, &mut present);
        self.visualizer.shutdown();

        match &result {
            Ok(()) => info!(frames = self.visualizer.frame_count(), "Render loop stopped"),
            Err(e) => warn!(error = ?e, "Render loop stopped with error"),
        }
        result
    }

    fn run_frames<S, P>(&mut self, source: &mut S, present: &mut P) -> Result<()>
    where
        S: FrameSource,
        P: FnMut(&App, &Visualizer) -> Result<()>,
    {
        while self.app.is_running() && self.visualizer.is_active() {
            // Résultats du worker : appliqués entre deux frames
            self.drain_feed();

            match source.next_event()? {
                FrameEvent::Frame => {
                    self.visualizer.tick();
                    present(&self.app, &self.visualizer)?;
                }
                FrameEvent::Resize(viewport) => {
                    self.visualizer.handle_resize(viewport);
                }
                FrameEvent::Input(event) => match self.app.handle_event(&event) {
                    AppAction::Quit => info!("User confirmed quit"),
                    AppAction::Refresh => self.request_refresh(),
                    AppAction::None => {}
                },
                FrameEvent::Quit => self.app.quit(),
            }
        }
        Ok(())
    }

    fn request_refresh(&mut self) {
        info!("Manual refresh requested");
        if self.commands.send(FeedCommand::RefreshNow).is_err() {
            warn!("Feed worker unavailable, refresh ignored");
        }
    }

    /// Vide les événements en attente sans bloquer
    ///
    /// CONCEPT : try_recv
    /// - Ok(event) : traite l'événement
    /// - Empty : rien de plus, on rend la frame
    /// - Disconnected : worker arrêté, la scène reste affichée
    fn drain_feed(&mut self) {
        loop {
            match self.feed_events.try_recv() {
                Ok(event) => self.handle_feed_event(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.worker_lost {
                        warn!("Feed worker disconnected");
                        self.worker_lost = true;
                    }
                    break;
                }
            }
        }
    }

    fn handle_feed_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::FetchStarted => self.app.feed_started(),
            FeedEvent::Snapshot(batch) => {
                let (_, requests) = self.visualizer.apply_snapshot(&batch);
                for request in requests {
                    if self.commands.send(FeedCommand::LoadTexture(request)).is_err() {
                        debug!("Feed worker unavailable, texture request dropped");
                    }
                }
                self.app
                    .feed_live(batch.fetched_at, self.visualizer.registry().len());
            }
            FeedEvent::FetchFailed { error, retry_in } => {
                self.app.feed_failed(error, retry_in);
            }
            FeedEvent::WorkerStopped { error } => {
                warn!(error = %error, "Feed worker stopped, no further updates");
                self.app.feed_stopped(error);
            }
            FeedEvent::TextureLoaded { node, bytes } => {
                let outcome = self.visualizer.apply_texture(&node, bytes);
                debug!(id = %node.id, ?outcome, "Texture result handled");
            }
            FeedEvent::TextureFailed { node, error } => {
                warn!(id = %node.id, error = %error, "Texture unavailable, keeping default material");
                self.visualizer.texture_failed(&node);
            }
        }
    }
}

// ============================================================================
// Tests unitaires
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::FeedStatus;
    use crate::models::MarketSnapshot;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use std::collections::VecDeque;
    use std::time::Duration;

    struct ScriptedFrames {
        events: VecDeque<FrameEvent>,
    }

    impl ScriptedFrames {
        fn new(events: Vec<FrameEvent>) -> Self {
            Self {
                events: events.into(),
            }
        }
    }

    impl FrameSource for ScriptedFrames {
        fn next_event(&mut self) -> Result<FrameEvent> {
            Ok(self.events.pop_front().unwrap_or(FrameEvent::Quit))
        }
    }

    fn config() -> Config {
        Config {
            seed: Some(7),
            ..Config::default()
        }
    }

    fn visualizer() -> Visualizer {
        Visualizer::new(&config(), Viewport::new(64, 40), CancellationToken::new())
    }

    fn batch(ids: &[&str]) -> SnapshotBatch {
        SnapshotBatch::new(
            ids.iter()
                .map(|id| MarketSnapshot::new(*id, *id, *id).with_metrics(1.0, 1e9, 5e5, 3.0))
                .collect(),
        )
    }

    fn key(c: char) -> FrameEvent {
        FrameEvent::Input(Event::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::empty())))
    }

    #[test]
    fn test_tick_moves_nodes_and_renders() {
        let mut vis = visualizer();
        vis.apply_snapshot(&batch(&["A", "B", "C"]));
        let before: Vec<_> = vis.registry().nodes().map(|n| n.position()).collect();

        vis.tick();
        let after: Vec<_> = vis.registry().nodes().map(|n| n.position()).collect();
        assert_ne!(before, after);
        assert_eq!(vis.frame_count(), 1);
        assert!(vis.registry().nodes().all(|n| n.particle_count() == 50));
    }

    #[test]
    fn test_texture_requests_only_for_new_nodes_with_image() {
        let mut vis = visualizer();
        let records = vec![
            MarketSnapshot::new("A", "A", "A").with_image("http://img.test/a.png"),
            MarketSnapshot::new("B", "B", "B"),
        ];
        let (report, requests) = vis.apply_snapshot(&SnapshotBatch::new(records.clone()));
        assert_eq!(report.created.len(), 2);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].node.id, "A");

        // Mise à jour : pas de nouveau chargement
        let (_, requests) = vis.apply_snapshot(&SnapshotBatch::new(records));
        assert!(requests.is_empty());
    }

    #[test]
    fn test_eviction_cancels_texture_load() {
        let mut vis = visualizer();
        let first = SnapshotBatch::new(vec![
            MarketSnapshot::new("A", "A", "A").with_image("http://img.test/a.png"),
            MarketSnapshot::new("B", "B", "B"),
        ]);
        let (_, requests) = vis.apply_snapshot(&first);
        let token = requests[0].token.clone();
        assert!(!token.is_cancelled());

        vis.apply_snapshot(&batch(&["B"]));
        assert!(token.is_cancelled());

        // Le résultat tardif est ignoré sans allouer
        let live = vis.scene().gpu().live_count();
        assert_eq!(vis.apply_texture(&requests[0].node, vec![0; 16]), TextureOutcome::StaleNode);
        assert_eq!(vis.scene().gpu().live_count(), live);
    }

    #[test]
    fn test_shutdown_cancels_then_releases() {
        let mut vis = visualizer();
        let first = SnapshotBatch::new(vec![MarketSnapshot::new("A", "A", "A").with_image("http://img.test/a.png")]);
        let (_, requests) = vis.apply_snapshot(&first);
        vis.tick();

        vis.shutdown();
        assert!(vis.feed_token().is_cancelled());
        assert!(vis.render_token().is_cancelled());
        assert!(requests[0].token.is_cancelled());
        assert!(vis.scene().is_disposed());
        assert_eq!(vis.scene().gpu().live_count(), 0);

        // Après teardown : tout est no-op
        let (report, requests) = vis.apply_snapshot(&batch(&["Z"]));
        assert!(report.created.is_empty() && requests.is_empty());
        assert!(vis.registry().is_empty());
        vis.tick();
        assert_eq!(vis.frame_count(), 1);
        assert_eq!(vis.apply_texture(&NodeRef { id: "A".into(), serial: 1 }, vec![1]), TextureOutcome::Disposed);
        assert_eq!(vis.scene().gpu().live_count(), 0);
    }

    #[test]
    fn test_render_loop_applies_feed_between_frames() {
        let (events_tx, events_rx) = mpsc::channel();
        let (commands_tx, mut commands_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut render_loop = RenderLoop::new(visualizer(), App::new(), events_rx, commands_tx);

        events_tx.send(FeedEvent::FetchStarted).unwrap();
        events_tx
            .send(FeedEvent::Snapshot(SnapshotBatch::new(vec![
                MarketSnapshot::new("A", "A", "A").with_image("http://img.test/a.png"),
                MarketSnapshot::new("B", "B", "B"),
            ])))
            .unwrap();

        let mut seen = Vec::new();
        let mut source = ScriptedFrames::new(vec![FrameEvent::Frame, FrameEvent::Frame]);
        render_loop
            .run(&mut source, |app, vis| {
                seen.push((vis.registry().len(), app.status.clone()));
                Ok(())
            })
            .unwrap();

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, 2);
        assert!(matches!(seen[0].1, FeedStatus::Live { instruments: 2, .. }));

        match commands_rx.try_recv() {
            Ok(FeedCommand::LoadTexture(request)) => assert_eq!(request.node.id, "A"),
            other => panic!("unexpected command: {:?}", other),
        }

        // run() se termine par un arrêt complet
        assert!(render_loop.visualizer().scene().is_disposed());
        assert_eq!(render_loop.visualizer().scene().gpu().live_count(), 0);
    }

    #[test]
    fn test_texture_failure_keeps_default_material_without_retry() {
        let (events_tx, events_rx) = mpsc::channel();
        let (commands_tx, mut commands_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut render_loop = RenderLoop::new(visualizer(), App::new(), events_rx, commands_tx);

        events_tx
            .send(FeedEvent::Snapshot(SnapshotBatch::new(vec![
                MarketSnapshot::new("A", "A", "A").with_image("http://img.test/a.png"),
            ])))
            .unwrap();

        let mut frames = 0;
        let mut source = ScriptedFrames::new(vec![FrameEvent::Frame, FrameEvent::Frame]);
        render_loop
            .run(&mut source, |_, vis| {
                let node = vis.registry().get("A").unwrap();
                if frames == 0 {
                    assert!(node.texture_token.is_some());
                    events_tx
                        .send(FeedEvent::TextureFailed {
                            node: node.node_ref(),
                            error: "HTTP 404".to_string(),
                        })
                        .unwrap();
                } else {
                    assert!(node.texture_token.is_none());
                    let material = vis.scene().gpu().material(&node.mesh().material).unwrap();
                    assert!(material.map.is_none());
                }
                frames += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!(frames, 2);
        // Un seul chargement demandé, pas de nouvelle tentative
        assert!(matches!(commands_rx.try_recv(), Ok(FeedCommand::LoadTexture(_))));
        assert!(commands_rx.try_recv().is_err());
    }

    #[test]
    fn test_render_loop_keys_refresh_and_two_step_quit() {
        let (_events_tx, events_rx) = mpsc::channel();
        let (commands_tx, mut commands_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut render_loop = RenderLoop::new(visualizer(), App::new(), events_rx, commands_tx);

        let mut source = ScriptedFrames::new(vec![
            key('r'),
            FrameEvent::Frame,
            key('q'),
            FrameEvent::Frame,
            key('q'),
            // Jamais atteint
            FrameEvent::Frame,
        ]);
        let mut frames = 0;
        render_loop
            .run(&mut source, |_, _| {
                frames += 1;
                Ok(())
            })
            .unwrap();

        assert_eq!(frames, 2);
        assert!(!render_loop.app().is_running());
        assert!(matches!(commands_rx.try_recv(), Ok(FeedCommand::RefreshNow)));
        assert_eq!(source.events.len(), 1);
    }

    #[test]
    fn test_render_loop_keeps_state_on_failure_and_resizes() {
        let (events_tx, events_rx) = mpsc::channel();
        let (commands_tx, _commands_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut render_loop = RenderLoop::new(visualizer(), App::new(), events_rx, commands_tx);

        events_tx.send(FeedEvent::Snapshot(batch(&["A", "B"]))).unwrap();
        let mut source = ScriptedFrames::new(vec![
            FrameEvent::Frame,
            FrameEvent::Resize(Viewport::new(100, 50)),
            FrameEvent::Frame,
        ]);

        let mut sizes = Vec::new();
        let failure_sent = std::cell::Cell::new(false);
        render_loop
            .run(&mut source, |app, vis| {
                sizes.push((vis.scene().viewport(), vis.registry().len(), app.status_line()));
                if !failure_sent.replace(true) {
                    events_tx
                        .send(FeedEvent::FetchFailed {
                            error: "boom".to_string(),
                            retry_in: Duration::from_secs(60),
                        })
                        .unwrap();
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(sizes[0].0, Viewport::new(64, 40));
        assert_eq!(sizes[1].0, Viewport::new(100, 50));
        // L'échec ne touche pas aux noeuds
        assert_eq!(sizes[1].1, 2);
        assert_eq!(sizes[1].2, "error: boom retry in 60s");
    }

    #[test]
    fn test_stopped_worker_shows_terminal_error() {
        let (events_tx, events_rx) = mpsc::channel();
        let (commands_tx, _commands_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut render_loop = RenderLoop::new(visualizer(), App::new(), events_rx, commands_tx);

        events_tx
            .send(FeedEvent::WorkerStopped {
                error: "client HTTP indisponible".to_string(),
            })
            .unwrap();
        drop(events_tx);

        let mut banners = Vec::new();
        let mut source = ScriptedFrames::new(vec![FrameEvent::Frame]);
        render_loop
            .run(&mut source, |app, _| {
                banners.push(app.status_line());
                Ok(())
            })
            .unwrap();

        assert_eq!(banners, vec!["error: client HTTP indisponible (feed stopped)".to_string()]);
    }

    #[test]
    fn test_cancelled_render_token_stops_loop() {
        let (_events_tx, events_rx) = mpsc::channel();
        let (commands_tx, _commands_rx) = tokio::sync::mpsc::unbounded_channel();
        let vis = visualizer();
        vis.render_token().cancel();
        let mut render_loop = RenderLoop::new(vis, App::new(), events_rx, commands_tx);

        let mut frames = 0;
        let mut source = ScriptedFrames::new(vec![FrameEvent::Frame]);
        render_loop
            .run(&mut source, |_, _| {
                frames += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(frames, 0);
    }
}
