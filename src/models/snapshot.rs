// ============================================================================
// Structure : MarketSnapshot
// ============================================================================
// Métriques d'un instrument pour un cycle d'ingestion.
// Construit à la frontière d'ingestion (api::market), immuable ensuite.
// ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identité d'un instrument (clé du registre de noeuds)
pub type InstrumentId = String;

/// Métriques normalisées d'un instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub id: InstrumentId,
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub market_cap: f64,
    pub volume_24h: f64,
    /// Variation sur 24h en pourcentage
    pub change_24h: f64,
    pub image_url: Option<String>,

    /// Nombre de transactions d'achat/vente sur 24h (variante MarketData)
    pub buys: Option<u64>,
    pub sells: Option<u64>,
}

impl MarketSnapshot {
    /// Crée un snapshot sans métriques (toutes à 0)
    pub fn new(id: impl Into<String>, symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            name: name.into(),
            price: 0.0,
            market_cap: 0.0,
            volume_24h: 0.0,
            change_24h: 0.0,
            image_url: None,
            buys: None,
            sells: None,
        }
    }

    pub fn with_metrics(mut self, price: f64, market_cap: f64, volume_24h: f64, change_24h: f64) -> Self {
        self.price = price;
        self.market_cap = market_cap;
        self.volume_24h = volume_24h;
        self.change_24h = change_24h;
        self
    }

    pub fn with_transactions(mut self, buys: u64, sells: u64) -> Self {
        self.buys = Some(buys);
        self.sells = Some(sells);
        self
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Fraction d'achats parmi les transactions, toujours dans [0, 1]
    ///
    /// Sans compteurs de transactions (ou compteurs à zéro), dérive le ratio
    /// de la variation 24h : 0.5 + change / (2 * saturation).
    pub fn buy_ratio(&self, change_saturation: f64) -> f64 {
        match (self.buys, self.sells) {
            (Some(buys), Some(sells)) if buys > 0 || sells > 0 => {
                // En f64 : la somme de deux u64 peut déborder
                let total = buys as f64 + sells as f64;
                (buys as f64 / total).clamp(0.0, 1.0)
            }
            _ => {
                let span = 2.0 * change_saturation.max(f64::EPSILON);
                let ratio = 0.5 + self.change_24h / span;
                if ratio.is_finite() {
                    ratio.clamp(0.0, 1.0)
                } else {
                    0.5
                }
            }
        }
    }
}

/// Un cycle d'ingestion complet
#[derive(Debug, Clone)]
pub struct SnapshotBatch {
    pub records: Vec<MarketSnapshot>,
    pub fetched_at: DateTime<Utc>,
}

impl SnapshotBatch {
    pub fn new(records: Vec<MarketSnapshot>) -> Self {
        Self {
            records,
            fetched_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
