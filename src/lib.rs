// ============================================================================
// MarketOrbit - Library
// ============================================================================
// Expose les modules publics pour le binaire et les tests
// ============================================================================

pub mod api;       // Ingestion des données de marché
pub mod app;       // État du shell terminal
pub mod config;    // Configuration (fichier + variables d'environnement)
pub mod engine;    // Moteur de visualisation
pub mod models;    // Structures de données
pub mod ui;        // Interface utilisateur
