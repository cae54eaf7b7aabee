// ============================================================================
// Module : ui
// ============================================================================
// Gère toute l'interface utilisateur (Terminal User Interface)
// ============================================================================

pub mod events;     // Clavier, redimensionnement, cadence des frames
pub mod dashboard;  // Rendu de l'interface principale
pub mod scene_view; // Framebuffer -> demi-blocs colorés

// Re-exports pour simplifier les imports
pub use events::{Event, EventHandler, TerminalFrames};
pub use dashboard::{render, scene_viewport};
