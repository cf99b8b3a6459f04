use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::settings::InsightsSettings;

/// Shown whenever the lookup fails for any reason. The feature is
/// non-critical: no retry, no backoff, never an error to the caller.
pub const INSIGHTS_UNAVAILABLE: &str =
    "Could not fetch safety insights. Please check API configuration.";

const NO_INSIGHTS: &str = "No detailed insights found.";

/// A citation the service grounded its answer on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightSource {
    pub title: Option<String>,
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightReport {
    pub text: String,
    pub sources: Vec<InsightSource>,
}

impl InsightReport {
    fn unavailable() -> Self {
        Self {
            text: INSIGHTS_UNAVAILABLE.to_string(),
            sources: Vec::new(),
        }
    }
}

// Response shape of the generateContent endpoint, reduced to the
// fields read here. Everything is optional; a partial answer must not
// turn into a decode failure.

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
    #[serde(default, rename = "groundingMetadata")]
    grounding_metadata: GroundingMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Default, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct GroundingMetadata {
    #[serde(default, rename = "groundingChunks")]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
struct GroundingChunk {
    maps: Option<ChunkRef>,
    web: Option<ChunkRef>,
}

#[derive(Debug, Deserialize)]
struct ChunkRef {
    title: Option<String>,
    uri: Option<String>,
}

impl GenerateContentResponse {
    fn into_report(self) -> InsightReport {
        let mut text = String::new();
        let mut sources = Vec::new();
        if let Some(candidate) = self.candidates.into_iter().next() {
            text = candidate
                .content
                .parts
                .into_iter()
                .map(|p| p.text)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            for chunk in candidate.grounding_metadata.grounding_chunks {
                if let Some(entry) = chunk.maps.or(chunk.web) {
                    sources.push(InsightSource {
                        title: entry.title,
                        uri: entry.uri,
                    });
                }
            }
        }
        if text.is_empty() {
            text = NO_INSIGHTS.to_string();
        }
        InsightReport { text, sources }
    }
}

/// One-shot client for the maps-grounded generative-AI lookup the
/// admin view offers ("analyze surroundings").
pub struct InsightsClient {
    enabled: bool,
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl InsightsClient {
    pub fn new(config: &InsightsSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();
        Self {
            enabled: config.enabled,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            client,
        }
    }

    /// Ask for nearby emergency facilities and crowd-control advice for
    /// the given coordinates. Infallible by contract: every failure
    /// collapses into the static apology report. When the lookup is
    /// disabled in the configuration, no request leaves the process.
    pub async fn analyze_surroundings(&self, lat: f64, lng: f64) -> InsightReport {
        if !self.enabled {
            debug!("insight lookup disabled in configuration");
            return InsightReport::unavailable();
        }
        match self.request(lat, lng).await {
            Ok(report) => report,
            Err(e) => {
                warn!("insight lookup failed: {}", e);
                InsightReport::unavailable()
            }
        }
    }

    async fn request(
        &self,
        lat: f64,
        lng: f64,
    ) -> Result<InsightReport, Box<dyn std::error::Error + Send + Sync>> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let prompt = format!(
            "I am managing a potential crowd stampede emergency. The user is at coordinates {}, {}. \
             Find nearby emergency facilities like hospitals, police stations, and large open areas \
             (parks, stadiums) that could serve as assembly points. \
             Provide specific advice for crowd control in this exact area if possible.",
            lat, lng
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "tools": [{ "googleMaps": {} }],
            "toolConfig": {
                "retrievalConfig": {
                    "latLng": { "latitude": lat, "longitude": lng }
                }
            }
        });

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(format!("insight service returned HTTP {}", response.status()).into());
        }
        let parsed: GenerateContentResponse = response.json().await?;
        Ok(parsed.into_report())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn test_client(port: u16) -> InsightsClient {
        InsightsClient::new(&InsightsSettings {
            enabled: true,
            base_url: format!("http://127.0.0.1:{}", port),
            model: "gemini-2.5-flash".to_string(),
            api_key: "test-key".to_string(),
            timeout_seconds: 2,
        })
    }

    /// Serve exactly one canned HTTP response on a local socket.
    fn one_shot_server(body: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 8192];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        port
    }

    #[tokio::test]
    async fn test_successful_lookup() {
        let body = r#"{
            "candidates": [{
                "content": { "parts": [{ "text": "Head to the stadium west of you." }] },
                "groundingMetadata": {
                    "groundingChunks": [
                        { "maps": { "title": "City Stadium", "uri": "https://maps.example/stadium" } }
                    ]
                }
            }]
        }"#;
        let port = one_shot_server(body);
        let report = test_client(port).analyze_surroundings(19.076, 72.8777).await;
        assert_eq!(report.text, "Head to the stadium west of you.");
        assert_eq!(report.sources.len(), 1);
        assert_eq!(report.sources[0].title.as_deref(), Some("City Stadium"));
    }

    #[tokio::test]
    async fn test_empty_candidates_yield_placeholder_text() {
        let port = one_shot_server(r#"{"candidates": []}"#);
        let report = test_client(port).analyze_surroundings(19.076, 72.8777).await;
        assert_eq!(report.text, NO_INSIGHTS);
        assert!(report.sources.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_client_skips_the_request() {
        // The server would answer with real insights; a disabled client
        // must never contact it.
        let body = r#"{
            "candidates": [{
                "content": { "parts": [{ "text": "Head to the stadium west of you." }] }
            }]
        }"#;
        let port = one_shot_server(body);
        let client = InsightsClient::new(&InsightsSettings {
            enabled: false,
            base_url: format!("http://127.0.0.1:{}", port),
            model: "gemini-2.5-flash".to_string(),
            api_key: "test-key".to_string(),
            timeout_seconds: 2,
        });
        let report = client.analyze_surroundings(19.076, 72.8777).await;
        assert_eq!(report.text, INSIGHTS_UNAVAILABLE);
        assert!(report.sources.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_falls_back() {
        let port = one_shot_server("this is not json");
        let report = test_client(port).analyze_surroundings(19.076, 72.8777).await;
        assert_eq!(report.text, INSIGHTS_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_connection_refused_falls_back() {
        // Port 1 should refuse the connection.
        let report = test_client(1).analyze_surroundings(19.076, 72.8777).await;
        assert_eq!(report.text, INSIGHTS_UNAVAILABLE);
        assert!(report.sources.is_empty());
    }

    #[tokio::test]
    async fn test_http_error_falls_back() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 8192];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(
                    b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n",
                );
            }
        });
        let report = test_client(port).analyze_surroundings(19.076, 72.8777).await;
        assert_eq!(report.text, INSIGHTS_UNAVAILABLE);
    }
}
