// ============================================================================
// Module : models
// ============================================================================
// Structures de données : snapshots de marché et noeuds visuels
// ============================================================================

pub mod node;     // Noeud visuel + mapping métriques -> visuel
pub mod snapshot; // Snapshot d'ingestion

pub use node::{Kinematics, MarketState, MeshHandles, NodeRef, VisualNode};
pub use snapshot::{InstrumentId, MarketSnapshot, SnapshotBatch};
