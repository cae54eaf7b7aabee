// ============================================================================
// Configuration
// ============================================================================
// Tous les paramètres de la visualisation : endpoint, polling, mapping
// données -> géométrie, physique, particules et rendu.
//
// Ordre de résolution :
// 1. Valeurs par défaut (Default)
// 2. Fichier JSON optionnel : <config_dir>/marketorbit/config.json
// 3. Variables d'environnement MARKETORBIT_*
//
// CONCEPT RUST : #[serde(default)]
// - Les champs absents du fichier JSON prennent la valeur de Default
// - Un fichier partiel (ex: seulement "feed") reste valide
// ============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Configuration complète de l'application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub feed: FeedConfig,
    pub layout: LayoutConfig,
    pub physics: PhysicsConfig,
    pub particles: ParticleConfig,
    pub scene: SceneConfig,

    /// Graine du générateur aléatoire (positions, connexions, particules)
    /// None : graine tirée de l'horloge au démarrage
    pub seed: Option<u64>,
}

/// Ingestion : endpoint et cadence de polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub endpoint: String,
    pub poll_interval_secs: u64,
    /// Plafond du backoff exponentiel après des échecs consécutifs
    pub max_backoff_secs: u64,
    pub request_timeout_secs: u64,
    /// Taille max d'une texture téléchargée
    pub max_texture_bytes: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000/api/market-data".to_string(),
            poll_interval_secs: 30,
            max_backoff_secs: 300,
            request_timeout_secs: 10,
            max_texture_bytes: 2 * 1024 * 1024,
        }
    }
}

impl FeedConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs.max(self.poll_interval_secs.max(1)))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Mapping des métriques de marché vers les propriétés visuelles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub min_size: f32,
    pub max_size: f32,
    /// size = clamp(min_size, max_size, log10(market_cap) * size_scale)
    pub size_scale: f32,

    /// Rayons de la coquille dans laquelle les nouveaux noeuds apparaissent
    pub spawn_inner_radius: f32,
    pub spawn_outer_radius: f32,

    pub min_connections: usize,
    pub max_connections: usize,

    /// energy = clamp(log10(volume + 1) / energy_log_ceiling, 0, 1)
    pub energy_log_ceiling: f64,

    /// Variation 24h (en %) qui sature le buy ratio quand les transactions
    /// ne sont pas disponibles
    pub change_saturation: f64,

    /// Nombre de snapshots consécutifs sans un id avant son éviction
    pub eviction_grace_cycles: u32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            min_size: 0.2,
            max_size: 2.0,
            size_scale: 0.2,
            spawn_inner_radius: 5.0,
            spawn_outer_radius: 15.0,
            min_connections: 1,
            max_connections: 3,
            energy_log_ceiling: 10.0,
            change_saturation: 10.0,
            eviction_grace_cycles: 1,
        }
    }
}

/// Constantes de la simulation de forces
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub attraction: f32,
    pub gravity: f32,
    /// Doit rester dans (0, 1)
    pub damping: f32,
    /// Rotation (radians/tick) appliquée dans le sens de la variation 24h
    pub spin: f32,
    /// En dessous de cette distance, aucune force n'est appliquée
    pub epsilon: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            attraction: 0.0005,
            gravity: 0.002,
            damping: 0.95,
            spin: 0.01,
            epsilon: 1e-4,
        }
    }
}

/// Sous-système de particules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleConfig {
    /// particle_count = floor(volume / volume_divisor)
    pub volume_divisor: f64,
    pub max_particles: usize,
    /// Rayon du nuage, relatif à la taille du noeud
    pub cloud_radius: f32,
    /// Amplitude du bruit pour energy = 1
    pub jitter: f32,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            volume_divisor: 10_000.0,
            max_particles: 1_000,
            cloud_radius: 2.5,
            jitter: 0.15,
        }
    }
}

/// Caméra, lumières et post-processing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub camera_distance: f32,
    pub ambient_intensity: f32,
    pub bloom_threshold: f32,
    pub bloom_strength: f32,
    pub bloom_radius: usize,
    pub frame_rate: u32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 75.0,
            near: 0.1,
            far: 1000.0,
            camera_distance: 30.0,
            ambient_intensity: 0.35,
            bloom_threshold: 0.7,
            bloom_strength: 0.8,
            bloom_radius: 2,
            frame_rate: 30,
        }
    }
}

impl SceneConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.frame_rate.clamp(1, 120)))
    }
}

impl Config {
    /// Charge la configuration (fichier optionnel + variables d'environnement)
    pub fn load() -> Result<Self> {
        let mut config = match default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) => {
                debug!(path = %path.display(), "No config file, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        info!(endpoint = %config.feed.endpoint, poll_secs = config.feed.poll_interval_secs, seed = ?config.seed, "Configuration loaded");
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Lecture impossible de {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Configuration invalide : {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).context("Échec du parsing JSON de la configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Vérifie la cohérence des paramètres avant tout calcul
    pub fn validate(&self) -> Result<()> {
        let layout = &self.layout;
        ensure!(
            layout.min_size.is_finite() && layout.max_size.is_finite() && layout.min_size > 0.0,
            "layout.min_size / max_size doivent être finis et positifs"
        );
        ensure!(
            layout.min_size <= layout.max_size,
            "layout.min_size ({}) > layout.max_size ({})",
            layout.min_size,
            layout.max_size
        );
        ensure!(
            layout.spawn_inner_radius >= 0.0 && layout.spawn_inner_radius <= layout.spawn_outer_radius,
            "layout.spawn_inner_radius ({}) doit être dans [0, spawn_outer_radius ({})]",
            layout.spawn_inner_radius,
            layout.spawn_outer_radius
        );
        ensure!(
            layout.spawn_outer_radius.is_finite(),
            "layout.spawn_outer_radius doit être fini"
        );
        ensure!(
            layout.min_connections <= layout.max_connections,
            "layout.min_connections ({}) > layout.max_connections ({})",
            layout.min_connections,
            layout.max_connections
        );

        let damping = self.physics.damping;
        ensure!(damping > 0.0 && damping < 1.0, "physics.damping ({damping}) doit être dans ]0, 1[");

        let scene = &self.scene;
        ensure!(
            scene.near > 0.0 && scene.near < scene.far,
            "scene.near ({}) doit être dans ]0, far ({})[",
            scene.near,
            scene.far
        );
        Ok(())
    }

    /// Applique les surcharges MARKETORBIT_*
    ///
    /// CONCEPT RUST : closure en paramètre
    /// - `lookup` abstrait std::env::var pour pouvoir tester sans toucher
    ///   à l'environnement du process
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("MARKETORBIT_ENDPOINT") {
            self.feed.endpoint = endpoint;
        }

        if let Some(raw) = lookup("MARKETORBIT_POLL_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) => self.feed.poll_interval_secs = secs,
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid MARKETORBIT_POLL_SECS"),
            }
        }

        if let Some(raw) = lookup("MARKETORBIT_SEED") {
            match raw.parse::<u64>() {
                Ok(seed) => self.seed = Some(seed),
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid MARKETORBIT_SEED"),
            }
        }
    }
}

/// Emplacement du fichier de configuration
/// - Linux : ~/.config/marketorbit/config.json
/// - macOS : ~/Library/Application Support/marketorbit/config.json
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("marketorbit").join("config.json"))
}

// ============================================================================
// Tests unitaires
// ============================================================================
