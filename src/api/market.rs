// ============================================================================
// API Client : endpoint de données de marché
// ============================================================================
// Récupère la liste plate des instruments et la normalise en MarketSnapshot.
//
// Deux formes de réponse sont acceptées (la normalisation se fait ICI, pas
// dans le registre de noeuds) :
//
// 1. Records "plats", en tableau nu ou dans { data: [...] } :
//    { id, symbol, name, price | token_prices.price, market_cap,
//      volume_24h, change_24h, imageUrl? }
//
// 2. Records "MarketData" dans { success, data: [...] } :
//    { price.usd, marketCap, volume.h24, priceChange.h24?,
//      transactions.h24.{buys,sells}, imageUrl? }
//
// CONCEPT RUST : #[serde(untagged)]
// - serde essaie chaque variant dans l'ordre jusqu'à ce qu'un match réussisse
// - Permet d'accepter "42.5" (string) aussi bien que 42.5 (nombre)
// ============================================================================

use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::config::FeedConfig;
use crate::models::{MarketSnapshot, SnapshotBatch};

// ============================================================================
// Structures pour parser la réponse JSON
// ============================================================================

/// Enveloppe de la réponse
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Payload {
    Bare(Vec<Value>),
    Wrapped {
        #[serde(default)]
        success: Option<bool>,
        #[serde(default)]
        data: Option<Vec<Value>>,
        #[serde(default)]
        error: Option<Value>,
    },
}

/// Nombre tolérant : accepte nombres et chaînes numériques
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Number {
    Float(f64),
    Text(String),
}

impl Number {
    fn value(&self) -> f64 {
        let v = match self {
            Number::Float(v) => *v,
            Number::Text(s) => s.trim().parse().unwrap_or(0.0),
        };
        if v.is_finite() {
            v
        } else {
            0.0
        }
    }
}

fn num(n: &Option<Number>) -> f64 {
    n.as_ref().map_or(0.0, Number::value)
}

/// Record plat
#[derive(Debug, Deserialize)]
struct FlatRecord {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    price: Option<Number>,
    #[serde(default)]
    token_prices: Option<TokenPrices>,
    #[serde(default)]
    market_cap: Option<Number>,
    #[serde(default)]
    volume_24h: Option<Number>,
    #[serde(default)]
    change_24h: Option<Number>,
    #[serde(default, rename = "imageUrl", alias = "image_url")]
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenPrices {
    #[serde(default)]
    price: Option<Number>,
}

/// Record MarketData (champs imbriqués, camelCase)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketDataRecord {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    name: Option<String>,
    price: UsdPrice,
    #[serde(default)]
    market_cap: Option<Number>,
    #[serde(default)]
    volume: Option<Window>,
    #[serde(default)]
    price_change: Option<Window>,
    #[serde(default)]
    transactions: Option<Transactions>,
    #[serde(default)]
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsdPrice {
    #[serde(default)]
    usd: Option<Number>,
}

/// Valeur sur une fenêtre de 24h
#[derive(Debug, Deserialize)]
struct Window {
    #[serde(default)]
    h24: Option<Number>,
}

#[derive(Debug, Deserialize)]
struct Transactions {
    #[serde(default)]
    h24: Option<BuySell>,
}

#[derive(Debug, Deserialize)]
struct BuySell {
    #[serde(default)]
    buys: Option<u64>,
    #[serde(default)]
    sells: Option<u64>,
}

/// Id en string ou en nombre ; chaîne vide = absent
fn id_string(value: &Option<Value>) -> Option<String> {
    let id = match value.as_ref()? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl FlatRecord {
    fn into_snapshot(self) -> Option<MarketSnapshot> {
        let symbol = non_empty(self.symbol);
        let id = id_string(&self.id).or_else(|| symbol.clone())?;
        let symbol = symbol.unwrap_or_else(|| id.clone());
        let name = non_empty(self.name).unwrap_or_else(|| symbol.clone());

        let price = match &self.price {
            Some(p) => p.value(),
            None => self.token_prices.as_ref().map_or(0.0, |t| num(&t.price)),
        };

        let mut snapshot = MarketSnapshot::new(id, symbol, name).with_metrics(
            price,
            num(&self.market_cap),
            num(&self.volume_24h),
            num(&self.change_24h),
        );
        snapshot.image_url = non_empty(self.image_url);
        Some(snapshot)
    }
}

impl MarketDataRecord {
    fn into_snapshot(self) -> Option<MarketSnapshot> {
        let symbol = non_empty(self.symbol);
        let id = id_string(&self.id)
            .or_else(|| non_empty(self.address))
            .or_else(|| symbol.clone())?;
        let symbol = symbol.unwrap_or_else(|| id.clone());
        let name = non_empty(self.name).unwrap_or_else(|| symbol.clone());

        let mut snapshot = MarketSnapshot::new(id, symbol, name).with_metrics(
            num(&self.price.usd),
            num(&self.market_cap),
            self.volume.as_ref().map_or(0.0, |w| num(&w.h24)),
            self.price_change.as_ref().map_or(0.0, |w| num(&w.h24)),
        );
        if let Some(counts) = self.transactions.and_then(|t| t.h24) {
            snapshot.buys = counts.buys;
            snapshot.sells = counts.sells;
        }
        snapshot.image_url = non_empty(self.image_url);
        Some(snapshot)
    }
}

// ============================================================================
// Normalisation
// ============================================================================

/// Normalise un record : la forme est détectée par le type de `price`
fn normalize_record(value: Value) -> Result<Option<MarketSnapshot>> {
    let nested = value.get("price").map_or(false, Value::is_object);
    if nested {
        let record: MarketDataRecord = serde_json::from_value(value).context("Record MarketData invalide")?;
        Ok(record.into_snapshot())
    } else {
        let record: FlatRecord = serde_json::from_value(value).context("Record plat invalide")?;
        Ok(record.into_snapshot())
    }
}

/// Convertit le corps JSON en liste de snapshots
///
/// - success: false -> erreur
/// - records invalides ou sans identité -> ignorés (comptés dans les logs)
/// - id dupliqué -> la première occurrence gagne
/// - liste vide -> erreur (l'état précédent est conservé par l'appelant)
pub fn parse_payload(body: Value) -> Result<Vec<MarketSnapshot>> {
    let payload: Payload = serde_json::from_value(body).context("Format de réponse inattendu")?;

    let records = match payload {
        Payload::Bare(records) => records,
        Payload::Wrapped { success: Some(false), error, .. } => {
            anyhow::bail!("L'endpoint a signalé un échec : {}", error.unwrap_or(Value::Null));
        }
        Payload::Wrapped { data: Some(data), .. } => data,
        Payload::Wrapped { data: None, .. } => anyhow::bail!("Réponse sans champ data"),
    };

    let total = records.len();
    let mut seen = HashSet::with_capacity(total);
    let mut snapshots = Vec::with_capacity(total);
    let mut skipped = 0;
    let mut duplicates = 0;

    for value in records {
        match normalize_record(value) {
            Ok(Some(snapshot)) => {
                if seen.insert(snapshot.id.clone()) {
                    snapshots.push(snapshot);
                } else {
                    duplicates += 1;
                }
            }
            Ok(None) => skipped += 1,
            Err(e) => {
                debug!(error = ?e, "Skipping malformed record");
                skipped += 1;
            }
        }
    }

    if skipped > 0 || duplicates > 0 {
        warn!(skipped, duplicates, total, "Some records were not ingested");
    }

    if snapshots.is_empty() {
        anyhow::bail!("Aucun instrument valide dans la réponse ({} records)", total);
    }

    Ok(snapshots)
}

// ============================================================================
// Client HTTP
// ============================================================================

/// Construit le client HTTP partagé (polling + textures)
pub fn build_client(config: &FeedConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("marketorbit/", env!("CARGO_PKG_VERSION")))
        .timeout(config.request_timeout())
        .build()
        .context("Échec de la création du client HTTP")
}

/// Récupère un snapshot complet depuis l'endpoint
#[instrument(skip(client))]
pub async fn fetch_snapshot(client: &reqwest::Client, url: &str) -> Result<SnapshotBatch> {
    debug!("Sending HTTP request to market endpoint");
    let response = client
        .get(url)
        .send()
        .await
        .context("Échec de la requête HTTP vers l'endpoint de marché")?;

    let status = response.status();
    debug!(status = %status, "Received HTTP response");

    if !status.is_success() {
        error!(status = %status, "Market endpoint returned error status");
        anyhow::bail!("L'endpoint de marché a retourné une erreur : HTTP {}", status);
    }

    let body: Value = response
        .json()
        .await
        .context("Échec du parsing JSON de la réponse")?;

    let records = parse_payload(body)?;
    info!(instruments = records.len(), "Successfully fetched market snapshot");
    Ok(SnapshotBatch::new(records))
}

// ============================================================================
// Tests unitaires
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_array_of_flat_records() {
        let body = json!([
            { "id": "SOL", "symbol": "SOL", "name": "Solana", "price": 150.2,
              "market_cap": 5.8e10, "volume_24h": 5e6, "change_24h": 8.1,
              "imageUrl": "https://img.test/sol.png" },
            { "id": "BONK", "symbol": "BONK", "name": "Bonk",
              "token_prices": { "price": "0.000021" },
              "market_cap": "1500000000", "volume_24h": null, "change_24h": -3.2 }
        ]);

        let snapshots = parse_payload(body).unwrap();
        assert_eq!(snapshots.len(), 2);

        let sol = &snapshots[0];
        assert_eq!(sol.id, "SOL");
        assert_eq!(sol.market_cap, 5.8e10);
        assert_eq!(sol.image_url.as_deref(), Some("https://img.test/sol.png"));
        assert_eq!(sol.buys, None);

        let bonk = &snapshots[1];
        assert!((bonk.price - 0.000021).abs() < 1e-12);
        assert_eq!(bonk.market_cap, 1.5e9);
        assert_eq!(bonk.volume_24h, 0.0);
    }

    #[test]
    fn test_data_wrapper() {
        let body = json!({ "data": [ { "id": 7, "symbol": "JUP", "price": 1.1 } ] });
        let snapshots = parse_payload(body).unwrap();
        assert_eq!(snapshots[0].id, "7");
        assert_eq!(snapshots[0].name, "JUP");
    }

    #[test]
    fn test_market_data_variant() {
        let body = json!({
            "success": true,
            "data": [{
                "address": "So111", "symbol": "SOL", "name": "Solana",
                "price": { "usd": 151.0 },
                "marketCap": 5.8e10,
                "volume": { "h24": 5e6 },
                "priceChange": { "h24": -2.5 },
                "transactions": { "h24": { "buys": 30, "sells": 10 } },
                "imageUrl": "https://img.test/sol.png"
            }]
        });

        let snapshots = parse_payload(body).unwrap();
        let sol = &snapshots[0];
        assert_eq!(sol.id, "So111");
        assert_eq!(sol.price, 151.0);
        assert_eq!(sol.volume_24h, 5e6);
        assert_eq!(sol.change_24h, -2.5);
        assert_eq!((sol.buys, sol.sells), (Some(30), Some(10)));
        assert!((sol.buy_ratio(10.0) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_huge_transaction_counts_keep_ratio_in_range() {
        let body = json!({
            "success": true,
            "data": [{
                "address": "W1", "symbol": "WHALE",
                "price": { "usd": 1.0 },
                "transactions": { "h24": { "buys": u64::MAX, "sells": 2 } }
            }]
        });

        let snapshots = parse_payload(body).unwrap();
        assert_eq!(snapshots[0].buys, Some(u64::MAX));
        let ratio = snapshots[0].buy_ratio(10.0);
        assert!((0.0..=1.0).contains(&ratio));
        assert!(ratio > 0.99);
    }

    #[test]
    fn test_success_false_is_an_error() {
        let body = json!({ "success": false, "data": [], "error": "rate limited" });
        let err = parse_payload(body).unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_invalid_and_duplicate_records_are_skipped() {
        let body = json!([
            { "name": "no identity" },
            { "id": "A", "symbol": "A", "market_cap": 1.0 },
            { "id": "A", "symbol": "A", "market_cap": 2.0 },
            "not an object",
            { "id": "B", "symbol": "B", "market_cap": "NaN" }
        ]);

        let snapshots = parse_payload(body).unwrap();
        let ids: Vec<_> = snapshots.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(snapshots[0].market_cap, 1.0);
        assert_eq!(snapshots[1].market_cap, 0.0);
    }

    #[test]
    fn test_empty_payload_is_an_error() {
        assert!(parse_payload(json!([])).is_err());
        assert!(parse_payload(json!({ "data": [] })).is_err());
        assert!(parse_payload(json!({ "unexpected": 1 })).is_err());
    }
}
