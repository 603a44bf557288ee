//! Crawl site list, read once at scheduler startup.

use std::path::Path;

use anyhow::{Context, Result};

use newsdesk::Site;

/// Load the site list from a JSON array of `{name, url, language?}`.
pub async fn load_sites(path: &Path) -> Result<Vec<Site>> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read sites file {}", path.display()))?;
    parse_sites(&raw).with_context(|| format!("Invalid sites file {}", path.display()))
}

fn parse_sites(raw: &[u8]) -> Result<Vec<Site>> {
    let sites: Vec<Site> = serde_json::from_slice(raw)?;
    if let Some(blank) = sites.iter().position(|s| s.url.trim().is_empty()) {
        anyhow::bail!("site #{} has an empty url", blank);
    }
    Ok(sites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_sites_keeps_file_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sites.json");
        tokio::fs::write(
            &path,
            br#"[
                {"name": "bugle", "url": "https://bugle.example", "language": "en"},
                {"name": "sentinel", "url": "https://sentinel.example"}
            ]"#,
        )
        .await
        .unwrap();

        let sites = load_sites(&path).await.unwrap();
        assert_eq!(
            sites,
            vec![
                Site::new("bugle", "https://bugle.example").with_language("en"),
                Site::new("sentinel", "https://sentinel.example"),
            ]
        );
    }

    #[test]
    fn test_blank_url_is_rejected() {
        let err = parse_sites(br#"[{"name": "x", "url": "  "}]"#).unwrap_err();
        assert!(err.to_string().contains("empty url"));
    }

    #[tokio::test]
    async fn test_missing_file_names_path() {
        let err = load_sites(Path::new("/nonexistent/sites.json")).await.unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/sites.json"));
    }
}
