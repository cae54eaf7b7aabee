// ============================================================================
// Structure : VisualNode
// ============================================================================
// Représentation visuelle d'un instrument dans la scène 3D.
//
// Les champs sont séparés en deux groupes disjoints :
// - Kinematics : position/vitesse/rotation, écrits uniquement par la
//   simulation de forces
// - MarketState : métriques et paramètres de matériau, écrits uniquement
//   par la réconciliation
//
// CONCEPT RUST : pub(crate)
// - Lecture publique via les getters
// - Écriture réservée aux modules du crate (engine::registry, engine::physics)
// ============================================================================

use chrono::{DateTime, Utc};
use glam::Vec3;
use tokio_util::sync::CancellationToken;

use crate::config::LayoutConfig;
use crate::engine::gpu::{GeometryHandle, GpuResources, MaterialHandle};
use crate::engine::particles::ParticleCloud;
use crate::models::snapshot::{InstrumentId, MarketSnapshot};

/// Référence faible vers un noeud
///
/// Ne garde pas le noeud en vie : elle ne se résout que tant qu'un noeud
/// avec le même id ET le même serial est présent dans le registre.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub id: InstrumentId,
    pub serial: u64,
}

/// Champs cinématiques
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kinematics {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Angle autour de l'axe Y (radians)
    pub rotation: f32,
}

/// Champs dérivés du marché
#[derive(Debug, Clone, PartialEq)]
pub struct MarketState {
    pub price: f64,
    pub market_cap: f64,
    pub volume: f64,
    pub change_24h: f64,
    /// Toujours dans [0, 1]
    pub energy: f32,
    /// Toujours dans [0, 1]
    pub buy_ratio: f32,
    /// Teinte en degrés (0 = rouge, 120 = vert)
    pub hue: f32,
    pub color: [f32; 3],
    pub last_update: DateTime<Utc>,
    /// Snapshots consécutifs où l'id était absent
    pub missed_cycles: u32,
}

impl MarketState {
    pub fn from_snapshot(snapshot: &MarketSnapshot, layout: &LayoutConfig, at: DateTime<Utc>) -> Self {
        let buy_ratio = (snapshot.buy_ratio(layout.change_saturation) as f32).clamp(0.0, 1.0);
        let hue = hue_for_buy_ratio(buy_ratio);
        Self {
            price: snapshot.price,
            market_cap: snapshot.market_cap,
            volume: snapshot.volume_24h,
            change_24h: snapshot.change_24h,
            energy: energy_for_volume(snapshot.volume_24h, layout.energy_log_ceiling),
            buy_ratio,
            hue,
            color: hsl_to_rgb(hue, 0.85, 0.55),
            last_update: at,
            missed_cycles: 0,
        }
    }

    /// Les données ne sont plus rafraîchies par l'ingestion
    pub fn is_stale(&self) -> bool {
        self.missed_cycles > 0
    }
}

/// Handles GPU du mesh d'un noeud (possédés exclusivement)
#[derive(Debug)]
pub struct MeshHandles {
    pub geometry: GeometryHandle,
    pub material: MaterialHandle,
}

/// Noeud visuel d'un instrument
#[derive(Debug)]
pub struct VisualNode {
    pub id: InstrumentId,
    pub symbol: String,
    pub name: String,
    pub image_url: Option<String>,
    /// Rayon du mesh, fixé à la création
    pub size: f32,
    pub(crate) serial: u64,
    pub(crate) kinematics: Kinematics,
    pub(crate) market: MarketState,
    pub(crate) connections: Vec<NodeRef>,
    pub(crate) mesh: MeshHandles,
    pub(crate) particles: Option<ParticleCloud>,
    /// Annule le chargement de texture en cours quand le noeud disparaît
    pub(crate) texture_token: Option<CancellationToken>,
}

impl VisualNode {
    pub fn node_ref(&self) -> NodeRef {
        NodeRef {
            id: self.id.clone(),
            serial: self.serial,
        }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn kinematics(&self) -> &Kinematics {
        &self.kinematics
    }

    pub fn position(&self) -> Vec3 {
        self.kinematics.position
    }

    pub fn market(&self) -> &MarketState {
        &self.market
    }

    pub fn connections(&self) -> &[NodeRef] {
        &self.connections
    }

    pub fn mesh(&self) -> &MeshHandles {
        &self.mesh
    }

    pub fn particles(&self) -> Option<&ParticleCloud> {
        self.particles.as_ref()
    }

    pub fn particle_count(&self) -> usize {
        self.particles.as_ref().map_or(0, ParticleCloud::len)
    }

    /// Libère toutes les ressources du noeud et annule ses callbacks
    pub(crate) fn dispose(self, gpu: &mut GpuResources) {
        if let Some(token) = &self.texture_token {
            token.cancel();
        }
        gpu.release(self.mesh.geometry);
        gpu.release(self.mesh.material);
        if let Some(cloud) = self.particles {
            cloud.dispose(gpu);
        }
    }
}

// ============================================================================
// Mapping métriques -> visuel
// ============================================================================
// Fonctions pures : mêmes entrées, mêmes sorties.
// ============================================================================

/// size = clamp(min, max, log10(market_cap) * scale)
///
/// Une capitalisation nulle, négative ou non finie donne la taille minimale.
pub fn size_for_market_cap(market_cap: f64, layout: &LayoutConfig) -> f32 {
    if !(market_cap.is_finite() && market_cap > 0.0) {
        return layout.min_size;
    }
    let raw = market_cap.log10() as f32 * layout.size_scale;
    // Tolère min > max (layout non validé)
    raw.max(layout.min_size).min(layout.max_size)
}

/// energy = clamp(log10(volume + 1) / ceiling, 0, 1)
pub fn energy_for_volume(volume: f64, log_ceiling: f64) -> f32 {
    if !(volume.is_finite() && volume > 0.0) || log_ceiling <= 0.0 {
        return 0.0;
    }
    ((volume + 1.0).log10() / log_ceiling).clamp(0.0, 1.0) as f32
}

/// 0 (ventes) -> rouge, 1 (achats) -> vert
pub fn hue_for_buy_ratio(buy_ratio: f32) -> f32 {
    buy_ratio.clamp(0.0, 1.0) * 120.0
}

/// Conversion HSL -> RGB, composantes dans [0, 1]
pub fn hsl_to_rgb(hue: f32, saturation: f32, lightness: f32) -> [f32; 3] {
    let h = hue.rem_euclid(360.0) / 60.0;
    let c = (1.0 - (2.0 * lightness - 1.0).abs()) * saturation;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = lightness - c / 2.0;
    [r + m, g + m, b + m]
}

// ============================================================================
// Tests unitaires
// ============================================================================
