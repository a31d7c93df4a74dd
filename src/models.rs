use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::preprocess::{FaceLocator, ImagePreprocessor, NoFaceLocator, Preprocessor};
use crate::session::UNKNOWN_NAME;
use crate::settings::{AppConfig, ProviderSettings};

const DETECT_PROMPT: &str = "You are a celebrity recognition expert AI.\n\
Identify the person in the image. If known, respond in this format:\n\n\
- **Full Name**:\n\
- **Profession**:\n\
- **Nationality**:\n\
- **Famous For**:\n\
- **Top Achievements**:\n\n\
If unknown, return \"Unknown\".";

const NO_ANSWER: &str = "Sorry, I couldn't find an answer.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    /// Full analysis as returned by the model.
    pub text: String,
    pub name: String,
}

#[async_trait]
pub trait CelebrityDetector: Send + Sync {
    async fn identify(&self, image: &[u8]) -> anyhow::Result<Identification>;
}

#[async_trait]
pub trait QaEngine: Send + Sync {
    async fn ask_about_celebrity(&self, name: &str, question: &str) -> anyhow::Result<String>;
}

/// The external collaborators one detect/ask round needs.
#[derive(Clone)]
pub struct Capabilities {
    pub preprocessor: Arc<dyn Preprocessor>,
    pub detector: Arc<dyn CelebrityDetector>,
    pub qa: Arc<dyn QaEngine>,
}

#[derive(Clone)]
pub enum Modules {
    Ready(Capabilities),
    Unavailable(String),
}

impl Modules {
    /// Builds the default capabilities. A failure here disables detection and chat
    /// but leaves the rest of the service running.
    pub fn load(config: &AppConfig) -> Self {
        match OpenAICompatible::from_config(config) {
            Ok(client) => {
                let client = Arc::new(client);
                let locator: Arc<dyn FaceLocator> = Arc::new(NoFaceLocator);
                Modules::Ready(Capabilities {
                    preprocessor: Arc::new(ImagePreprocessor::new(locator)),
                    detector: client.clone(),
                    qa: client,
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load detection modules");
                Modules::Unavailable(e.to_string())
            }
        }
    }

    pub fn capabilities(&self) -> Result<&Capabilities, &str> {
        match self {
            Modules::Ready(c) => Ok(c),
            Modules::Unavailable(reason) => Err(reason),
        }
    }
}

#[derive(Clone)]
pub struct OpenAICompatible {
    base_url: Url,
    api_key: Option<String>,
    params: ProviderSettings,
    http: reqwest::Client,
}

impl OpenAICompatible {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.provider.base_url)
            .map_err(|e| anyhow::anyhow!("invalid provider base url {:?}: {e}", config.provider.base_url))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            anyhow::bail!("unsupported provider url scheme: {}", base_url.scheme());
        }
        Ok(Self {
            base_url,
            api_key: config.api_key.clone(),
            params: config.provider.clone(),
            http: reqwest::Client::new(),
        })
    }

    async fn complete(&self, content: serde_json::Value, temperature: f32, max_tokens: u32) -> anyhow::Result<String> {
        let url = format!("{}/chat/completions", self.base_url.as_str().trim_end_matches('/'));
        let body = OaiChatRequest {
            model: &self.params.model,
            messages: vec![serde_json::json!({"role": "user", "content": content})],
            temperature,
            max_tokens,
        };
        let mut rb = self.http.post(url).json(&body);
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }
        let resp = rb.send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("model call failed: {}", resp.status());
        }
        let v: OaiChatResponse = resp.json().await?;
        Ok(v.choices.into_iter().next().map(|c| c.message.content).unwrap_or_default())
    }
}

#[derive(Debug, Serialize)]
struct OaiChatRequest<'a> {
    model: &'a str,
    messages: Vec<serde_json::Value>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OaiChatResponse {
    choices: Vec<OaiChoice>,
}

#[derive(Debug, Deserialize)]
struct OaiChoice {
    message: OaiMessage,
}

#[derive(Debug, Deserialize)]
struct OaiMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl CelebrityDetector for OpenAICompatible {
    async fn identify(&self, image: &[u8]) -> anyhow::Result<Identification> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let content = serde_json::json!([
            {"type": "text", "text": DETECT_PROMPT},
            {"type": "image_url", "image_url": {"url": format!("data:image/jpeg;base64,{encoded}")}},
        ]);
        let text = self
            .complete(content, self.params.detect_temperature, self.params.detect_max_tokens)
            .await?;
        let name = extract_name(&text);
        tracing::debug!(%name, "detector replied");
        Ok(Identification { text, name })
    }
}

#[async_trait]
impl QaEngine for OpenAICompatible {
    async fn ask_about_celebrity(&self, name: &str, question: &str) -> anyhow::Result<String> {
        let prompt = format!(
            "You are an AI assistant that knows a lot about celebrities. \
             Answer questions about {name} concisely and accurately.\n\nQuestion: {question}"
        );
        let answer = self
            .complete(serde_json::Value::String(prompt), self.params.qa_temperature, self.params.qa_max_tokens)
            .await?;
        if answer.trim().is_empty() {
            return Ok(NO_ANSWER.into());
        }
        Ok(answer)
    }
}

/// Pulls the value of the `- **Full Name**:` line out of a detector reply.
pub fn extract_name(reply: &str) -> String {
    reply
        .lines()
        .map(str::trim)
        .find(|line| line.to_lowercase().starts_with("- **full name**:"))
        .and_then(|line| line.split_once(':'))
        .map(|(_, rest)| rest.trim().trim_matches('*').trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use std::sync::Mutex;

    #[test]
    fn extract_name_reads_full_name_line() {
        let reply = "- **Full Name**: Jane Doe\n- **Profession**: Actor\n";
        assert_eq!(extract_name(reply), "Jane Doe");
        assert_eq!(extract_name("  - **full name**: **Tom Hanks**"), "Tom Hanks");
    }

    #[test]
    fn extract_name_falls_back_to_unknown() {
        assert_eq!(extract_name("Unknown"), UNKNOWN_NAME);
        assert_eq!(extract_name("- **Full Name**:   \n"), UNKNOWN_NAME);
        assert_eq!(extract_name(""), UNKNOWN_NAME);
    }

    #[test]
    fn bad_base_url_makes_modules_unavailable() {
        let mut cfg = AppConfig::default();
        cfg.provider.base_url = "not a url".into();
        assert!(matches!(Modules::load(&cfg), Modules::Unavailable(_)));
        cfg.provider.base_url = "ftp://example.com".into();
        assert!(matches!(Modules::load(&cfg), Modules::Unavailable(_)));
        assert!(Modules::load(&AppConfig::default()).capabilities().is_ok());
    }

    async fn fake_provider(reply: &'static str) -> (String, std::sync::Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>) {
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |headers: axum::http::HeaderMap, Json(body): Json<serde_json::Value>| {
                let captured = captured.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    captured.lock().unwrap().push((auth, body));
                    Json(serde_json::json!({"choices": [{"message": {"content": reply}}]}))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/v1", addr), seen)
    }

    #[tokio::test]
    async fn identify_sends_image_and_parses_name() {
        let (base, seen) = fake_provider("- **Full Name**: Jane Doe\n- **Profession**: Actor").await;
        let mut cfg = AppConfig::default();
        cfg.provider.base_url = base;
        cfg.api_key = Some("k-123".into());
        let client = OpenAICompatible::from_config(&cfg).unwrap();

        let got = client.identify(b"jpegbytes").await.unwrap();
        assert_eq!(got.name, "Jane Doe");
        assert!(got.text.contains("Profession"));

        let calls = seen.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.as_deref(), Some("Bearer k-123"));
        let url = calls[0].1["messages"][0]["content"][1]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
        assert_eq!(calls[0].1["max_tokens"], 1024);
    }

    #[tokio::test]
    async fn ask_mentions_name_and_question() {
        let (base, seen) = fake_provider("Forrest Gump, Cast Away.").await;
        let mut cfg = AppConfig::default();
        cfg.provider.base_url = base;
        let client = OpenAICompatible::from_config(&cfg).unwrap();

        let answer = client.ask_about_celebrity("Tom Hanks", "What movies?").await.unwrap();
        assert_eq!(answer, "Forrest Gump, Cast Away.");
        let calls = seen.lock().unwrap();
        assert!(calls[0].0.is_none());
        let prompt = calls[0].1["messages"][0]["content"].as_str().unwrap();
        assert!(prompt.contains("Tom Hanks"));
        assert!(prompt.contains("What movies?"));
    }

    #[tokio::test]
    async fn provider_error_status_is_an_error() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { axum::http::StatusCode::UNAUTHORIZED }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let mut cfg = AppConfig::default();
        cfg.provider.base_url = format!("http://{}/v1", addr);
        let client = OpenAICompatible::from_config(&cfg).unwrap();
        let err = client.identify(b"x").await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }
}
