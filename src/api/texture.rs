// ============================================================================
// Chargement des textures (imageUrl des instruments)
// ============================================================================
// Télécharge les octets d'une image. Le décodage n'est pas nécessaire pour
// le rendu terminal : la présence de la texture est appliquée au matériau.
// ============================================================================

use anyhow::{Context, Result};
use tracing::{debug, instrument};

/// Récupère une image, en refusant les réponses plus grosses que `max_bytes`
#[instrument(skip(client))]
pub async fn fetch_texture(client: &reqwest::Client, url: &str, max_bytes: usize) -> Result<Vec<u8>> {
    let response = client
        .get(url)
        .send()
        .await
        .context("Échec de la requête de texture")?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("Texture indisponible : HTTP {}", status);
    }

    if let Some(len) = response.content_length() {
        check_size(len as usize, max_bytes)?;
    }

    let bytes = response
        .bytes()
        .await
        .context("Échec de la lecture du corps de la texture")?;
    check_size(bytes.len(), max_bytes)?;

    debug!(bytes = bytes.len(), "Texture downloaded");
    Ok(bytes.to_vec())
}

fn check_size(len: usize, max_bytes: usize) -> Result<()> {
    if len == 0 {
        anyhow::bail!("Texture vide");
    }
    if len > max_bytes {
        anyhow::bail!("Texture trop volumineuse : {} octets (max {})", len, max_bytes);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_size() {
        assert!(check_size(10, 100).is_ok());
        assert!(check_size(0, 100).is_err());
        assert!(check_size(101, 100).is_err());
    }
}
