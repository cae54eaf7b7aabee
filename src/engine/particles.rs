// ============================================================================
// Sous-système de particules
// ============================================================================
// Chaque noeud possède un nuage de points dont la taille dépend du volume
// échangé et dont l'agitation dépend de l'énergie.
//
// - sync() : après chaque réconciliation, (re)crée les nuages dont le
//   nombre de particules a changé (dispose l'ancien buffer AVANT)
// - update() : à chaque tick, bruit aléatoire proportionnel à l'énergie
// ============================================================================

use glam::Vec3;
use rand::Rng;
use tracing::debug;

use crate::config::ParticleConfig;
use crate::engine::gpu::{GpuResources, ParticleBufferHandle};
use crate::engine::registry::NodeRegistry;

/// Nuage de particules d'un noeud (positions relatives au centre du noeud)
#[derive(Debug)]
pub struct ParticleCloud {
    base: Vec<Vec3>,
    offsets: Vec<Vec3>,
    color: [f32; 3],
    buffer: ParticleBufferHandle,
}

impl ParticleCloud {
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[Vec3] {
        &self.offsets
    }

    pub fn base_offsets(&self) -> &[Vec3] {
        &self.base
    }

    pub fn color(&self) -> [f32; 3] {
        self.color
    }

    pub fn buffer(&self) -> &ParticleBufferHandle {
        &self.buffer
    }

    pub(crate) fn dispose(self, gpu: &mut GpuResources) {
        gpu.release(self.buffer);
    }
}

/// Opérateur sur les nuages de particules du registre
#[derive(Debug, Clone)]
pub struct ParticleSystem {
    config: ParticleConfig,
}

impl ParticleSystem {
    pub fn new(config: ParticleConfig) -> Self {
        Self { config }
    }

    /// particle_count = floor(volume / divisor), borné par max_particles
    pub fn target_count(&self, volume: f64) -> usize {
        if !(volume.is_finite() && volume > 0.0) || self.config.volume_divisor <= 0.0 {
            return 0;
        }
        let raw = (volume / self.config.volume_divisor).floor();
        if raw >= self.config.max_particles as f64 {
            self.config.max_particles
        } else {
            raw as usize
        }
    }

    /// Aligne chaque nuage sur le volume courant de son noeud
    ///
    /// Retourne le nombre de nuages reconstruits.
    pub fn sync<R: Rng>(&self, registry: &mut NodeRegistry, gpu: &mut GpuResources, rng: &mut R) -> usize {
        let mut rebuilt = 0;
        for node in registry.nodes_mut() {
            let target = self.target_count(node.market.volume);
            if node.particle_count() == target {
                continue;
            }

            // Dispose avant de remplacer
            if let Some(old) = node.particles.take() {
                old.dispose(gpu);
            }

            if target > 0 {
                let radius = node.size * self.config.cloud_radius;
                node.particles = Some(self.build_cloud(target, radius, node.market.color, gpu, rng));
            }
            rebuilt += 1;
        }

        if rebuilt > 0 {
            debug!(rebuilt, "Particle clouds rebuilt");
        }
        rebuilt
    }

    fn build_cloud<R: Rng>(
        &self,
        count: usize,
        radius: f32,
        color: [f32; 3],
        gpu: &mut GpuResources,
        rng: &mut R,
    ) -> ParticleCloud {
        let base: Vec<Vec3> = (0..count)
            .map(|_| random_unit_vector(rng) * rng.gen_range(radius * 0.5..=radius.max(f32::EPSILON)))
            .collect();
        ParticleCloud {
            offsets: base.clone(),
            base,
            color,
            buffer: gpu.create_particle_buffer(count),
        }
    }

    /// Perturbe les particules et synchronise leur couleur (un tick)
    pub fn update<R: Rng>(&self, registry: &mut NodeRegistry, rng: &mut R) {
        for node in registry.nodes_mut() {
            let amplitude = node.market.energy * self.config.jitter;
            let color = node.market.color;
            let Some(cloud) = node.particles.as_mut() else {
                continue;
            };
            cloud.color = color;
            for (offset, base) in cloud.offsets.iter_mut().zip(&cloud.base) {
                *offset = *base + random_unit_vector(rng) * amplitude;
            }
        }
    }
}

/// Direction uniforme sur la sphère unité
pub(crate) fn random_unit_vector<R: Rng>(rng: &mut R) -> Vec3 {
    let z: f32 = rng.gen_range(-1.0..=1.0);
    let phi: f32 = rng.gen_range(0.0..std::f32::consts::TAU);
    let r = (1.0 - z * z).max(0.0).sqrt();
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::models::{MarketSnapshot, SnapshotBatch};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn batch(volume: f64) -> SnapshotBatch {
        SnapshotBatch::new(vec![
            MarketSnapshot::new("SOL", "SOL", "Solana").with_metrics(150.0, 5.8e10, volume, 8.1),
        ])
    }

    #[test]
    fn test_target_count() {
        let system = ParticleSystem::new(ParticleConfig::default());
        assert_eq!(system.target_count(5e6), 500);
        assert_eq!(system.target_count(9_999.0), 0);
        assert_eq!(system.target_count(1e12), 1_000);
        assert_eq!(system.target_count(f64::INFINITY), 0);
    }

    #[test]
    fn test_sync_rebuilds_only_on_change() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut gpu = GpuResources::new();
        let mut registry = NodeRegistry::new(LayoutConfig::default());
        let system = ParticleSystem::new(ParticleConfig::default());

        registry.reconcile(&batch(5e6), &mut gpu, &mut rng);
        assert_eq!(system.sync(&mut registry, &mut gpu, &mut rng), 1);
        assert_eq!(registry.get("SOL").unwrap().particle_count(), 500);
        let live = gpu.live_count();

        // Même volume : rien à reconstruire
        registry.reconcile(&batch(5e6), &mut gpu, &mut rng);
        assert_eq!(system.sync(&mut registry, &mut gpu, &mut rng), 0);

        // Nouveau volume : l'ancien buffer est libéré, pas de fuite
        registry.reconcile(&batch(2e6), &mut gpu, &mut rng);
        assert_eq!(system.sync(&mut registry, &mut gpu, &mut rng), 1);
        assert_eq!(registry.get("SOL").unwrap().particle_count(), 200);
        assert_eq!(gpu.live_count(), live);
    }

    #[test]
    fn test_update_jitter_is_bounded_by_energy() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut gpu = GpuResources::new();
        let mut registry = NodeRegistry::new(LayoutConfig::default());
        let config = ParticleConfig::default();
        let system = ParticleSystem::new(config.clone());

        registry.reconcile(&batch(5e6), &mut gpu, &mut rng);
        system.sync(&mut registry, &mut gpu, &mut rng);
        system.update(&mut registry, &mut rng);

        let node = registry.get("SOL").unwrap();
        let cloud = node.particles().unwrap();
        let bound = node.market().energy * config.jitter + 1e-4;
        for (offset, base) in cloud.offsets().iter().zip(cloud.base_offsets()) {
            assert!(offset.distance(*base) <= bound);
        }
        assert_eq!(cloud.color(), node.market().color);
    }
}
