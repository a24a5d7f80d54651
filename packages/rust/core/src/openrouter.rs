//! OpenRouter chat-completions client.
//!
//! OpenAI-compatible `POST {base_url}/chat/completions` with bearer auth.
//! Transient failures (connect/timeout, 429, 5xx) are retried with
//! exponential backoff; other 4xx responses fail immediately.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::{debug, instrument, warn};
use url::Url;

use cogreader_shared::{OpenRouterConfig, ReaderError, Result, Summary};

use crate::glossary::DefinitionGenerator;
use crate::prompt::{self, SYSTEM_PROMPT};
use crate::summarizer::{SummaryOutput, SummaryRequest, Summarizer};

/// User-Agent header for API requests.
const USER_AGENT: &str = concat!("cogreader/", env!("CARGO_PKG_VERSION"));

/// First retry delay; doubles per attempt.
const BASE_BACKOFF_MS: u64 = 500;

/// A failed attempt, classified for the retry loop.
enum Attempt {
    Retry(ReaderError),
    Fatal(ReaderError),
}

/// Low-level completion client shared by the summarizer and definition generator.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenRouterClient {
    pub fn new(config: &OpenRouterConfig, api_key: String, model: Option<&str>) -> Result<Self> {
        let mut base = Url::parse(&config.base_url)
            .map_err(|e| ReaderError::config(format!("invalid openrouter.base_url: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join("chat/completions")
            .map_err(|e| ReaderError::config(format!("invalid openrouter.base_url: {e}")))?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ReaderError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model: model.unwrap_or(&config.default_model).to_string(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a system + user message pair and return the assistant text.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let mut attempt = 0;
        loop {
            match self.send_once(&body).await {
                Ok(text) => return Ok(text),
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Retry(e)) if attempt < self.max_retries => {
                    let delay = BASE_BACKOFF_MS << attempt.min(6);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay,
                        error = %e,
                        "retrying completion"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(Attempt::Retry(e)) => return Err(e),
            }
        }
    }

    async fn send_once(&self, body: &serde_json::Value) -> std::result::Result<String, Attempt> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Attempt::Retry(ReaderError::Network(format!("{}: {e}", self.endpoint))))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let err = ReaderError::Network(format!(
                "HTTP {status} from {}: {}",
                self.endpoint,
                detail.chars().take(200).collect::<String>()
            ));
            return Err(if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                Attempt::Retry(err)
            } else {
                Attempt::Fatal(err)
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| {
                Attempt::Fatal(ReaderError::parse(format!("invalid completion body: {e}")))
            })?;

        data["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Attempt::Fatal(ReaderError::parse("completion has no message content")))
    }
}

// ---------------------------------------------------------------------------
// Summarizer
// ---------------------------------------------------------------------------

/// Summarizer backed by an OpenRouter model.
pub struct OpenRouterSummarizer {
    client: OpenRouterClient,
    name: String,
}

impl OpenRouterSummarizer {
    pub fn new(client: OpenRouterClient) -> Self {
        let name = format!("openrouter:{}", client.model());
        Self { client, name }
    }
}

#[async_trait]
impl Summarizer for OpenRouterSummarizer {
    #[instrument(
        skip_all,
        fields(section_id = %request.section_id, task = request.task.as_str(), pass = request.pass)
    )]
    async fn summarize(&self, request: &SummaryRequest) -> Result<SummaryOutput> {
        let user = prompt::render_user_prompt(request);
        let raw = self
            .client
            .complete(SYSTEM_PROMPT, &user)
            .await
            .map_err(|e| ReaderError::Summarization(e.to_string()))?;
        debug!(len = raw.len(), "completion received");
        prompt::parse_response(&raw, request.max_key_concepts)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Definition generator
// ---------------------------------------------------------------------------

const DEFINITION_PROMPT: &str = "You write one-sentence glossary definitions. Use only the \
section summaries provided. Reply with the definition sentence and nothing else.";

/// Glossary definition refinement using the same model.
pub struct LlmDefinitionGenerator {
    client: OpenRouterClient,
}

impl LlmDefinitionGenerator {
    pub fn new(client: OpenRouterClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DefinitionGenerator for LlmDefinitionGenerator {
    async fn define(&self, term: &str, related: &[&Summary]) -> Result<String> {
        let mut user = format!("Concept: {term}\n\n");
        for summary in related {
            user.push_str(&format!("[{}] {}\n", summary.section_id, summary.summary_text));
        }

        let text = self.client.complete(DEFINITION_PROMPT, &user).await?;
        let text = text.trim().trim_matches('"').trim().to_string();
        if text.is_empty() {
            return Err(ReaderError::Summarization(format!("empty definition for '{term}'")));
        }
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarizer::SummaryTask;
    use cogreader_shared::ContextMode;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> OpenRouterConfig {
        OpenRouterConfig {
            base_url: base_url.to_string(),
            max_retries: 2,
            timeout_secs: 5,
            ..Default::default()
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
    }

    fn request() -> SummaryRequest {
        SummaryRequest {
            task: SummaryTask::Section,
            pass: 1,
            mode: ContextMode::Cumulative,
            section_id: "intro".into(),
            title: "Intro".into(),
            source_text: "Intro text.".into(),
            context: vec![],
            max_key_concepts: 2,
            max_source_chars: 1000,
        }
    }

    #[tokio::test]
    async fn summarizes_via_chat_completions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                r#"{"summary": "An intro.", "key_concepts": ["A", "B", "C"]}"#,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenRouterClient::new(
            &config(&format!("{}/api/v1", server.uri())),
            "test-key".into(),
            Some("test/model"),
        )
        .unwrap();
        let summarizer = OpenRouterSummarizer::new(client);
        assert_eq!(summarizer.name(), "openrouter:test/model");

        let out = summarizer.summarize(&request()).await.unwrap();
        assert_eq!(out.summary, "An intro.");
        assert_eq!(out.key_concepts, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion(r#"{"summary": "Recovered."}"#)),
            )
            .mount(&server)
            .await;

        let client = OpenRouterClient::new(&config(&server.uri()), "k".into(), None).unwrap();
        let out = OpenRouterSummarizer::new(client).summarize(&request()).await.unwrap();
        assert_eq!(out.summary, "Recovered.");
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenRouterClient::new(&config(&server.uri()), "k".into(), None).unwrap();
        let err = OpenRouterSummarizer::new(client).summarize(&request()).await.unwrap_err();
        assert!(matches!(err, ReaderError::Summarization(_)));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn definition_generator_trims_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion("  \"A package manager.\"  ")),
            )
            .mount(&server)
            .await;

        let client = OpenRouterClient::new(&config(&server.uri()), "k".into(), None).unwrap();
        let generator = LlmDefinitionGenerator::new(client);
        let summary = Summary::new("setup".into(), "Uses Cargo.".into(), vec!["Cargo".into()], 1);
        let def = generator.define("Cargo", &[&summary]).await.unwrap();
        assert_eq!(def, "A package manager.");
    }

    #[test]
    fn rejects_invalid_base_url() {
        let result = OpenRouterClient::new(&config("not a url"), "k".into(), None);
        assert!(matches!(result, Err(ReaderError::Config { .. })));
    }
}
