// ============================================================================
// Simulation de forces
// ============================================================================
// Un pas par tick, en place sur le registre :
// 1. Attraction vers chaque noeud connecté : dir * k * distance
// 2. Gravité vers l'origine : dir * g
// 3. Intégration amortie : v = (v + f) * damping ; p += v
// 4. Rotation continue dans le sens de la variation 24h
//
// Les points confondus (distance ~ 0) ne contribuent aucune force :
// jamais de NaN issu d'une normalisation.
// ============================================================================

use glam::Vec3;

use crate::config::PhysicsConfig;
use crate::engine::registry::NodeRegistry;

#[derive(Debug, Clone)]
pub struct ForceSimulator {
    config: PhysicsConfig,
}

impl ForceSimulator {
    pub fn new(config: PhysicsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    /// Force nette appliquée à un noeud situé en `position`
    pub fn net_force(&self, position: Vec3, targets: impl IntoIterator<Item = Vec3>) -> Vec3 {
        let mut force = Vec3::ZERO;

        for target in targets {
            let delta = target - position;
            let distance = delta.length();
            if distance > self.config.epsilon {
                force += delta / distance * self.config.attraction * distance;
            }
        }

        let to_origin = -position;
        let distance = to_origin.length();
        if distance > self.config.epsilon {
            force += to_origin / distance * self.config.gravity;
        }

        force
    }

    /// Avance la simulation d'un tick
    pub fn step(&self, registry: &mut NodeRegistry) {
        // Phase 1 : forces calculées sur un état figé
        let forces: Vec<Vec3> = registry
            .nodes()
            .map(|node| {
                let targets = node
                    .connections()
                    .iter()
                    .filter_map(|c| registry.resolve(c))
                    .map(|peer| peer.position());
                self.net_force(node.position(), targets)
            })
            .collect();

        // Phase 2 : intégration (même ordre d'itération, BTreeMap)
        for (node, force) in registry.nodes_mut().zip(forces) {
            let kin = &mut node.kinematics;
            kin.velocity = (kin.velocity + force) * self.config.damping;
            kin.position += kin.velocity;

            if !kin.position.is_finite() {
                kin.position = Vec3::ZERO;
                kin.velocity = Vec3::ZERO;
            }

            let direction = node.market.change_24h.signum() as f32;
            if node.market.change_24h != 0.0 {
                kin.rotation = (kin.rotation + direction * self.config.spin).rem_euclid(std::f32::consts::TAU);
            }
        }
    }
}
