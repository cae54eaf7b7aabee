// ============================================================================
// Registre de noeuds : réconciliation snapshot -> noeuds visuels
// ============================================================================
// Le registre est l'arène qui possède tous les VisualNode, indexés par id.
//
// Réconciliation (un batch = une opération atomique) :
// 1. Id inconnu   -> création (taille, couleur, position aléatoire, mesh)
// 2. Id connu     -> mise à jour des seuls champs de marché + matériau
// 3. Id absent    -> compteur d'absence ; éviction après N cycles avec
//                    libération de toutes les ressources GPU
// 4. Connexions   -> purge des références vers les noeuds évincés, puis
//                    tirage de 1 à 3 pairs pour les nouveaux noeuds
//
// CONCEPT RUST : BTreeMap
// - Ordre d'itération stable (trié par id)
// - Avec un Rng seedé, la topologie obtenue est reproductible
// ============================================================================

use std::collections::{BTreeMap, HashSet};

use glam::Vec3;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LayoutConfig;
use crate::engine::gpu::{GpuResources, Material, SphereGeometry};
use crate::engine::particles::random_unit_vector;
use crate::models::node::{size_for_market_cap, Kinematics, MarketState, MeshHandles};
use crate::models::{InstrumentId, MarketSnapshot, NodeRef, SnapshotBatch, VisualNode};

/// Résultat d'une réconciliation
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcileReport {
    pub created: Vec<NodeRef>,
    pub updated: usize,
    pub evicted: Vec<InstrumentId>,
    /// Absents de ce snapshot mais encore dans la période de grâce
    pub stale: Vec<InstrumentId>,
}

/// Arène des noeuds visuels
#[derive(Debug)]
pub struct NodeRegistry {
    nodes: BTreeMap<InstrumentId, VisualNode>,
    next_serial: u64,
    layout: LayoutConfig,
}

impl NodeRegistry {
    pub fn new(layout: LayoutConfig) -> Self {
        Self {
            nodes: BTreeMap::new(),
            next_serial: 0,
            layout,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&VisualNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &InstrumentId> {
        self.nodes.keys()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &VisualNode> {
        self.nodes.values()
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut VisualNode> {
        self.nodes.values_mut()
    }

    /// Résout une référence faible (id + serial)
    pub fn resolve(&self, node: &NodeRef) -> Option<&VisualNode> {
        self.nodes.get(&node.id).filter(|n| n.serial == node.serial)
    }

    pub(crate) fn resolve_mut(&mut self, node: &NodeRef) -> Option<&mut VisualNode> {
        self.nodes.get_mut(&node.id).filter(|n| n.serial == node.serial)
    }

    /// Associe le token d'annulation du chargement de texture d'un noeud
    pub(crate) fn attach_texture_token(&mut self, node: &NodeRef, token: CancellationToken) -> bool {
        match self.resolve_mut(node) {
            Some(n) => {
                if let Some(previous) = n.texture_token.replace(token) {
                    previous.cancel();
                }
                true
            }
            None => false,
        }
    }

    /// Fusionne un snapshot complet dans le registre
    pub fn reconcile<R: Rng>(
        &mut self,
        batch: &SnapshotBatch,
        gpu: &mut GpuResources,
        rng: &mut R,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut seen: HashSet<&str> = HashSet::with_capacity(batch.len());

        for snapshot in &batch.records {
            if !seen.insert(snapshot.id.as_str()) {
                warn!(id = %snapshot.id, "Duplicate id in snapshot, keeping first occurrence");
                continue;
            }

            match self.nodes.get_mut(&snapshot.id) {
                Some(node) => {
                    apply_market_update(node, snapshot, &self.layout, batch, gpu);
                    report.updated += 1;
                }
                None => {
                    let node = self.create_node(snapshot, batch, gpu, rng);
                    report.created.push(node.node_ref());
                    self.nodes.insert(node.id.clone(), node);
                }
            }
        }

        // Absents : période de grâce puis éviction
        let grace = self.layout.eviction_grace_cycles.max(1);
        for node in self.nodes.values_mut() {
            if seen.contains(node.id.as_str()) {
                continue;
            }
            node.market.missed_cycles += 1;
            if node.market.missed_cycles >= grace {
                report.evicted.push(node.id.clone());
            } else {
                report.stale.push(node.id.clone());
            }
        }

        for id in &report.evicted {
            self.remove(id, gpu);
        }

        self.prune_connections();
        self.connect_new_nodes(&report.created, rng);

        info!(
            created = report.created.len(),
            updated = report.updated,
            evicted = report.evicted.len(),
            stale = report.stale.len(),
            total = self.nodes.len(),
            "Snapshot reconciled"
        );
        report
    }

    fn create_node<R: Rng>(
        &mut self,
        snapshot: &MarketSnapshot,
        batch: &SnapshotBatch,
        gpu: &mut GpuResources,
        rng: &mut R,
    ) -> VisualNode {
        self.next_serial += 1;
        let size = size_for_market_cap(snapshot.market_cap, &self.layout);
        let market = MarketState::from_snapshot(snapshot, &self.layout, batch.fetched_at);

        let geometry = gpu.create_geometry(SphereGeometry {
            radius: size,
            segments: 32,
        });
        let material = gpu.create_material(Material::new(market.color, market.energy * 0.5));

        debug!(id = %snapshot.id, size, hue = market.hue, "Node created");
        VisualNode {
            id: snapshot.id.clone(),
            symbol: snapshot.symbol.clone(),
            name: snapshot.name.clone(),
            image_url: snapshot.image_url.clone(),
            size,
            serial: self.next_serial,
            kinematics: Kinematics {
                position: sample_shell(rng, self.layout.spawn_inner_radius, self.layout.spawn_outer_radius),
                velocity: Vec3::ZERO,
                rotation: 0.0,
            },
            market,
            connections: Vec::new(),
            mesh: MeshHandles { geometry, material },
            particles: None,
            texture_token: None,
        }
    }

    /// Retire un noeud et libère ses ressources
    ///
    /// Les connexions des autres noeuds vers lui sont purgées.
    pub fn remove(&mut self, id: &str, gpu: &mut GpuResources) -> bool {
        match self.nodes.remove(id) {
            Some(node) => {
                debug!(id = %id, "Node evicted");
                node.dispose(gpu);
                self.prune_connections();
                true
            }
            None => false,
        }
    }

    /// Retire tous les noeuds (teardown)
    pub fn clear(&mut self, gpu: &mut GpuResources) {
        let count = self.nodes.len();
        for (_, node) in std::mem::take(&mut self.nodes) {
            node.dispose(gpu);
        }
        debug!(count, "Registry cleared");
    }

    fn prune_connections(&mut self) {
        let alive: HashSet<NodeRef> = self.nodes.values().map(VisualNode::node_ref).collect();
        for node in self.nodes.values_mut() {
            node.connections.retain(|c| alive.contains(c));
        }
    }

    /// Tire 1..=3 pairs distincts pour chaque nouveau noeud
    fn connect_new_nodes<R: Rng>(&mut self, created: &[NodeRef], rng: &mut R) {
        if self.nodes.len() < 2 {
            return;
        }
        let all: Vec<NodeRef> = self.nodes.values().map(VisualNode::node_ref).collect();
        let min = self.layout.min_connections.min(self.layout.max_connections);
        let max = self.layout.max_connections;

        for node_ref in created {
            let candidates: Vec<&NodeRef> = all.iter().filter(|c| c.id != node_ref.id).collect();
            let wanted = rng.gen_range(min..=max).min(candidates.len());
            let peers: Vec<NodeRef> = candidates
                .choose_multiple(rng, wanted)
                .map(|c| (*c).clone())
                .collect();
            if let Some(node) = self.resolve_mut(node_ref) {
                node.connections = peers;
            }
        }
    }
}

/// Met à jour uniquement les champs de marché et le matériau
fn apply_market_update(
    node: &mut VisualNode,
    snapshot: &MarketSnapshot,
    layout: &LayoutConfig,
    batch: &SnapshotBatch,
    gpu: &mut GpuResources,
) {
    node.market = MarketState::from_snapshot(snapshot, layout, batch.fetched_at);
    if let Some(material) = gpu.material_mut(&node.mesh.material) {
        material.color = node.market.color;
        material.emissive = node.market.energy * 0.5;
    }
}

/// Position uniforme dans une coquille sphérique [inner, outer]
fn sample_shell<R: Rng>(rng: &mut R, inner: f32, outer: f32) -> Vec3 {
    let (inner, outer) = if inner <= outer { (inner, outer) } else { (outer, inner) };
    // Uniforme en volume : r^3 uniforme
    let u: f32 = rng.gen_range(0.0..=1.0);
    let r3 = inner.powi(3) + u * (outer.powi(3) - inner.powi(3));
    random_unit_vector(rng) * r3.cbrt()
}

// ============================================================================
// Tests unitaires
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn snap(id: &str, market_cap: f64, volume: f64, change: f64) -> MarketSnapshot {
        MarketSnapshot::new(id, id, id).with_metrics(1.0, market_cap, volume, change)
    }

    fn ids(registry: &NodeRegistry) -> Vec<String> {
        registry.ids().cloned().collect()
    }

    #[test]
    fn test_scenario_single_instrument() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut gpu = GpuResources::new();
        let mut registry = NodeRegistry::new(LayoutConfig::default());

        let report = registry.reconcile(&SnapshotBatch::new(vec![snap("SOL", 5.8e10, 5e6, 8.1)]), &mut gpu, &mut rng);

        assert_eq!(report.created.len(), 1);
        assert_eq!(registry.len(), 1);
        let node = registry.get("SOL").unwrap();
        assert_eq!(node.size, 2.0);
        assert_eq!(node.kinematics().velocity, Vec3::ZERO);
        assert!(node.connections().is_empty());

        let radius = node.position().length();
        assert!((5.0 - 1e-3..=15.0 + 1e-3).contains(&radius));
    }

    #[test]
    fn test_update_keeps_kinematics_and_connections() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut gpu = GpuResources::new();
        let mut registry = NodeRegistry::new(LayoutConfig::default());

        let first = SnapshotBatch::new(vec![snap("A", 1e9, 1e5, 1.0), snap("B", 1e8, 1e5, -1.0)]);
        registry.reconcile(&first, &mut gpu, &mut rng);
        let before = registry.get("A").unwrap();
        let (position, connections, size) = (before.position(), before.connections().to_vec(), before.size);

        let second = SnapshotBatch::new(vec![snap("A", 1e12, 9e8, -9.0), snap("B", 1e8, 1e5, -1.0)]);
        let report = registry.reconcile(&second, &mut gpu, &mut rng);

        assert_eq!(report.updated, 2);
        assert!(report.created.is_empty());
        let after = registry.get("A").unwrap();
        assert_eq!(after.position(), position);
        assert_eq!(after.connections(), connections.as_slice());
        assert_eq!(after.size, size);
        assert_eq!(after.market().market_cap, 1e12);
        assert!(after.market().hue < 60.0);

        let material = gpu.material(&after.mesh().material).unwrap();
        assert_eq!(material.color, after.market().color);
    }

    #[test]
    fn test_creation_is_pure_function_of_metrics() {
        let batch = SnapshotBatch::new(vec![snap("X", 3.3e9, 1e6, 4.0)]);
        let mut gpu = GpuResources::new();

        let mut a = NodeRegistry::new(LayoutConfig::default());
        a.reconcile(&batch, &mut gpu, &mut StdRng::seed_from_u64(10));
        let mut b = NodeRegistry::new(LayoutConfig::default());
        b.reconcile(&batch, &mut gpu, &mut StdRng::seed_from_u64(99));

        let (na, nb) = (a.get("X").unwrap(), b.get("X").unwrap());
        assert_eq!(na.size, nb.size);
        assert_eq!(na.market().hue, nb.market().hue);
    }

    #[test]
    fn test_no_orphaned_nodes_and_resources_released() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut gpu = GpuResources::new();
        let mut registry = NodeRegistry::new(LayoutConfig::default());

        let first = SnapshotBatch::new(vec![snap("A", 1e9, 0.0, 0.0), snap("B", 1e9, 0.0, 0.0), snap("C", 1e9, 0.0, 0.0)]);
        registry.reconcile(&first, &mut gpu, &mut rng);
        assert_eq!(gpu.live_count(), 6);

        let second = SnapshotBatch::new(vec![snap("A", 1e9, 0.0, 0.0), snap("D", 1e9, 0.0, 0.0)]);
        let report = registry.reconcile(&second, &mut gpu, &mut rng);

        assert_eq!(ids(&registry), vec!["A", "D"]);
        assert_eq!(report.evicted, vec!["B".to_string(), "C".to_string()]);
        assert_eq!(gpu.live_count(), 4);

        // Aucune connexion ne pointe vers un noeud absent
        for node in registry.nodes() {
            for c in node.connections() {
                assert!(registry.resolve(c).is_some());
            }
        }
    }

    #[test]
    fn test_grace_period_flags_stale() {
        let layout = LayoutConfig {
            eviction_grace_cycles: 2,
            ..LayoutConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(4);
        let mut gpu = GpuResources::new();
        let mut registry = NodeRegistry::new(layout);

        registry.reconcile(&SnapshotBatch::new(vec![snap("A", 1e9, 0.0, 0.0), snap("B", 1e9, 0.0, 0.0)]), &mut gpu, &mut rng);
        let only_a = SnapshotBatch::new(vec![snap("A", 1e9, 0.0, 0.0)]);

        let report = registry.reconcile(&only_a, &mut gpu, &mut rng);
        assert_eq!(report.stale, vec!["B".to_string()]);
        assert!(registry.get("B").unwrap().market().is_stale());

        let report = registry.reconcile(&only_a, &mut gpu, &mut rng);
        assert_eq!(report.evicted, vec!["B".to_string()]);
        assert!(!registry.contains("B"));
    }

    #[test]
    fn test_connections_are_seeded_and_bounded() {
        let batch = SnapshotBatch::new((0..8).map(|i| snap(&format!("T{i}"), 1e9, 0.0, 0.0)).collect());
        let mut gpu = GpuResources::new();

        let mut a = NodeRegistry::new(LayoutConfig::default());
        a.reconcile(&batch, &mut gpu, &mut StdRng::seed_from_u64(5));
        let mut b = NodeRegistry::new(LayoutConfig::default());
        b.reconcile(&batch, &mut gpu, &mut StdRng::seed_from_u64(5));

        for (na, nb) in a.nodes().zip(b.nodes()) {
            assert_eq!(na.connections(), nb.connections());
            assert_eq!(na.position(), nb.position());
            let count = na.connections().len();
            assert!((1..=3).contains(&count));
            assert!(na.connections().iter().all(|c| c.id != na.id));
        }
    }

    #[test]
    fn test_weak_ref_does_not_resolve_after_recreation() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut gpu = GpuResources::new();
        let mut registry = NodeRegistry::new(LayoutConfig::default());

        registry.reconcile(&SnapshotBatch::new(vec![snap("A", 1e9, 0.0, 0.0)]), &mut gpu, &mut rng);
        let old = registry.get("A").unwrap().node_ref();

        registry.reconcile(&SnapshotBatch::new(vec![snap("B", 1e9, 0.0, 0.0)]), &mut gpu, &mut rng);
        registry.reconcile(&SnapshotBatch::new(vec![snap("A", 1e9, 0.0, 0.0)]), &mut gpu, &mut rng);

        assert!(registry.contains("A"));
        assert!(registry.resolve(&old).is_none());
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut gpu = GpuResources::new();
        let mut registry = NodeRegistry::new(LayoutConfig::default());
        registry.reconcile(&SnapshotBatch::new(vec![snap("A", 1e9, 0.0, 0.0), snap("B", 1e6, 0.0, 0.0)]), &mut gpu, &mut rng);

        let token = CancellationToken::new();
        let a = registry.get("A").unwrap().node_ref();
        assert!(registry.attach_texture_token(&a, token.clone()));

        registry.clear(&mut gpu);
        assert!(registry.is_empty());
        assert_eq!(gpu.live_count(), 0);
        assert!(token.is_cancelled());
    }
}
