//! One-time browser authentication.
//!
//! Home Assistant's frontend keeps its credentials in `localStorage`. Writing
//! them once through a throwaway tab logs in every tab opened afterwards, since
//! all tabs share the session's storage.

use std::time::Duration;

use serde::Serialize;

use crate::browser::Browser;
use crate::error::Error;

/// Token entry the frontend reads from the `hassTokens` storage key.
#[derive(Debug, Serialize)]
struct HassTokens<'a> {
    #[serde(rename = "hassUrl")]
    hass_url: &'a str,
    access_token: &'a str,
    token_type: &'static str,
}

/// Credentials and preferences injected into the browser session.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_token: String,
    pub language: String,
}

/// Storage entries written by [`authenticate`].
fn storage_entries(
    base_url: &str,
    credentials: &Credentials,
) -> Result<Vec<(&'static str, String)>, Error> {
    let tokens = HassTokens {
        hass_url: base_url,
        access_token: &credentials.access_token,
        token_type: "Bearer",
    };

    Ok(vec![
        ("hassTokens", serde_json::to_string(&tokens)?),
        ("selectedLanguage", serde_json::to_string(&credentials.language)?),
    ])
}

/// Log the browser session into the dashboard.
///
/// Opens one tab on `base_url`, stores the access token and language
/// preference, and closes the tab again. Run once before any page is rendered.
///
/// # Errors
///
/// Any failure here leaves the session unauthenticated, which the caller
/// should treat as fatal.
pub async fn authenticate(
    browser: &dyn Browser,
    base_url: &str,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<(), Error> {
    tracing::info!("Visiting '{}' to login...", base_url);
    let context = browser.new_context().await?;

    let result = async {
        context.navigate(base_url, timeout).await?;

        tracing::info!("Adding authentication entry to browser's local storage...");
        let entries = storage_entries(base_url, credentials)?;
        context.set_local_storage(&entries).await
    }
    .await;

    context.close().await?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Call, FakeBrowser};

    fn credentials() -> Credentials {
        Credentials {
            access_token: "long-lived-token".to_string(),
            language: "de".to_string(),
        }
    }

    #[test]
    fn test_storage_entries() {
        let entries = storage_entries("http://hass.local:8123", &credentials()).unwrap();

        assert_eq!(entries[0].0, "hassTokens");
        let tokens: serde_json::Value = serde_json::from_str(&entries[0].1).unwrap();
        assert_eq!(tokens["hassUrl"], "http://hass.local:8123");
        assert_eq!(tokens["access_token"], "long-lived-token");
        assert_eq!(tokens["token_type"], "Bearer");

        assert_eq!(entries[1], ("selectedLanguage", "\"de\"".to_string()));
    }

    #[tokio::test]
    async fn test_authenticate_uses_one_context() {
        let browser = FakeBrowser::new();
        authenticate(
            &browser,
            "http://hass.local:8123",
            &credentials(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let calls = browser.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0], Call::NewContext);
        assert_eq!(calls[1], Call::Navigate("http://hass.local:8123".to_string()));
        assert!(matches!(&calls[2], Call::SetLocalStorage(keys) if keys == &["hassTokens", "selectedLanguage"]));
        assert_eq!(calls[3], Call::Close);
    }

    #[tokio::test]
    async fn test_authenticate_closes_context_on_failure() {
        let browser = FakeBrowser::new().failing_on("hass.local");
        let err = authenticate(
            &browser,
            "http://hass.local:8123",
            &credentials(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Browser(_)));
        assert_eq!(browser.calls().last(), Some(&Call::Close));
    }
}
