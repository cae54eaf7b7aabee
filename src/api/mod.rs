// ============================================================================
// Module : api
// ============================================================================
// Ingestion des données de marché : client HTTP, normalisation des payloads,
// worker de polling et chargement des textures.
// ============================================================================

pub mod market;   // Fetch + normalisation des snapshots
pub mod poller;   // Worker d'ingestion (thread + runtime tokio)
pub mod texture;  // Téléchargement des images d'instruments

// Re-export des éléments principaux
pub use market::{build_client, fetch_snapshot, parse_payload};
pub use poller::{spawn_feed_worker, Backoff, FeedCommand, FeedEvent, TextureRequest};
pub use texture::fetch_texture;
