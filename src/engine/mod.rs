// ============================================================================
// Module : engine
// ============================================================================
// Moteur de visualisation : ressources GPU logicielles, registre de noeuds,
// simulation de forces, particules, rendu et coordination.
// ============================================================================

pub mod gpu;          // Arène de ressources (handles typés)
pub mod registry;     // Réconciliation snapshot -> noeuds
pub mod physics;      // Forces et intégration
pub mod particles;    // Nuages de particules par noeud
pub mod composer;     // Rasterisation + bloom
pub mod scene;        // Caméra, lumières, cycle de vie
pub mod coordinator;  // Visualizer + boucle de rendu

pub use coordinator::{FrameEvent, FrameSource, RenderLoop, Visualizer};
pub use registry::{NodeRegistry, ReconcileReport};
pub use scene::{Scene, TextureOutcome, Viewport};
