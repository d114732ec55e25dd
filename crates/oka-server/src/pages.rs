//! Static HTML pages served by every listener.

use bytes::Bytes;
use oka_config::PagesSettings;
use oka_proxy::DEFAULT_GATEWAY_ERROR_PAGE;
use std::path::Path;
use tracing::{debug, warn};

/// Challenge page used when the configured file cannot be read.
///
/// Reloads itself so a browser that accepted the cookies retries with them.
pub const DEFAULT_CHALLENGE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<meta http-equiv="refresh" content="5">
<title>Checking your browser</title>
<style>
body { font-family: system-ui, sans-serif; display: flex; min-height: 100vh; margin: 0; align-items: center; justify-content: center; background: #f4f5f7; }
main { background: #fff; padding: 2rem 2.5rem; border-radius: 8px; box-shadow: 0 4px 16px rgba(0, 0, 0, 0.08); text-align: center; max-width: 420px; }
h1 { font-size: 1.4rem; color: #222; }
p { color: #555; }
</style>
</head>
<body>
<main>
<h1>Checking your browser</h1>
<p>This site is protected against automated traffic.</p>
<p>You will be redirected in a few seconds.</p>
</main>
<script>setTimeout(function () { window.location.reload(); }, 5000);</script>
</body>
</html>
"#;

/// Page bodies shared by every listener.
#[derive(Debug, Clone)]
pub struct Pages {
    /// Verification challenge
    pub challenge: Bytes,
    /// Upstream failure
    pub gateway_error: Bytes,
}

impl Default for Pages {
    fn default() -> Self {
        Self {
            challenge: Bytes::from_static(DEFAULT_CHALLENGE_PAGE.as_bytes()),
            gateway_error: Bytes::from_static(DEFAULT_GATEWAY_ERROR_PAGE.as_bytes()),
        }
    }
}

impl Pages {
    /// Read both pages, keeping the built-in page for any file that is missing.
    pub async fn load(settings: &PagesSettings) -> Self {
        let defaults = Self::default();
        Self {
            challenge: read_or(&settings.challenge, defaults.challenge).await,
            gateway_error: read_or(&settings.gateway_error, defaults.gateway_error).await,
        }
    }
}

async fn read_or(path: &Path, fallback: Bytes) -> Bytes {
    match tokio::fs::read(path).await {
        Ok(content) if !content.is_empty() => {
            debug!(path = %path.display(), bytes = content.len(), "Loaded page");
            Bytes::from(content)
        }
        Ok(_) => {
            warn!(path = %path.display(), "Page file is empty, using built-in page");
            fallback
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Page file unavailable, using built-in page");
            fallback
        }
    }
}
