//! Ephemeral session credentials from the backend collaborator endpoint.

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use voxdeck_core::{Result, VoxDeckError};

/// Session parameters minted by the backend.
///
/// Only `client_secret.value` is load-bearing: it authenticates the SDP
/// exchange with the realtime API.
#[derive(Debug, Clone, Deserialize)]
pub struct EphemeralSession {
    pub client_secret: ClientSecret,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub value: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

/// Request an ephemeral credential, optionally selecting a voice.
pub async fn fetch_ephemeral_session(
    client: &reqwest::Client,
    url: &str,
    voice: Option<&str>,
) -> Result<EphemeralSession> {
    let mut body = serde_json::Map::new();
    if let Some(voice) = voice {
        body.insert("voice".into(), json!(voice));
    }

    debug!(url, ?voice, "Requesting ephemeral session");

    let response = client
        .post(url)
        .json(&body)
        .send()
        .await
        .map_err(|e| VoxDeckError::Credential(format!("Session request failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(VoxDeckError::Credential(format!(
            "Session endpoint returned {status}: {body}"
        )));
    }

    response
        .json()
        .await
        .map_err(|e| VoxDeckError::Credential(format!("Invalid session response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_deserialization() {
        let json = r#"{
            "client_secret": {"value": "ek_test_123", "expires_at": 1750000000},
            "model": "gpt-4o-realtime-preview-2025-06-03",
            "voice": "verse"
        }"#;
        let session: EphemeralSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.client_secret.value, "ek_test_123");
        assert_eq!(session.client_secret.expires_at, Some(1750000000));
        assert_eq!(session.voice.as_deref(), Some("verse"));
    }

    #[test]
    fn test_minimal_session_deserialization() {
        let json = r#"{"client_secret": {"value": "ek"}}"#;
        let session: EphemeralSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.client_secret.value, "ek");
        assert!(session.model.is_none());
        assert!(session.client_secret.expires_at.is_none());
    }
}
