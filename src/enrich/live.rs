//! Live enrichment provider over an OpenAI-compatible HTTP JSON API.

use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{
    backoff_delay, placeholder_enrichment, truncate_chars, Enrichment, EnrichmentBackend,
    EnrichmentError,
};
use crate::config::EnrichmentConfig;

/// Content slice sent to the LLM for keyword/description generation.
const MAX_PROMPT_CONTENT: usize = 2_000;
/// Text slice sent to the embeddings endpoint.
const MAX_EMBED_TEXT: usize = 3_000;
/// Health checks use a short timeout so startup never hangs on a dead API.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LiveProvider {
    client: Client,
    chat_endpoint: String,
    embeddings_endpoint: String,
    llm_model: String,
    embedding_model: String,
    dimension: usize,
    max_tries: u32,
    retry_base: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct LlmReply {
    #[serde(default)]
    keywords: String,
    #[serde(default)]
    description: String,
}

impl LiveProvider {
    pub fn new(config: &EnrichmentConfig, dimension: usize) -> Result<Self, EnrichmentError> {
        if config.token.trim().is_empty() {
            return Err(EnrichmentError::Unavailable(
                "no API token configured".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", config.token.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|e| EnrichmentError::InvalidResponse(format!("bad token: {e}")))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| EnrichmentError::Unavailable(e.to_string()))?;

        let base = config.endpoint.trim_end_matches('/');
        Ok(Self {
            client,
            chat_endpoint: format!("{base}/chat/completions"),
            embeddings_endpoint: format!("{base}/embeddings"),
            llm_model: config.llm_model.clone(),
            embedding_model: config.embedding_model.clone(),
            dimension,
            max_tries: config.retries.max(1),
            retry_base: Duration::from_secs(1),
        })
    }

    /// POST a JSON payload, retrying on timeouts, connection failures and
    /// retryable statuses (429 and 5xx). Client errors are not retried.
    fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        payload: &Req,
    ) -> Result<Resp, EnrichmentError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let response = self.client.post(url).json(payload).send();

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .json::<Resp>()
                            .map_err(|e| EnrichmentError::InvalidResponse(e.to_string()));
                    }

                    let body = resp.text().unwrap_or_else(|_| "<body unavailable>".to_string());
                    if retryable_status(status) && attempt < self.max_tries {
                        let delay = backoff_delay(self.retry_base, attempt);
                        log::info!(
                            "enrichment request to {url} failed ({status}), retry {attempt}/{} in {delay:?}",
                            self.max_tries
                        );
                        thread::sleep(delay);
                        continue;
                    }
                    return Err(EnrichmentError::Unavailable(format!(
                        "{url} returned {status}: {body}"
                    )));
                }
                Err(err) => {
                    if attempt < self.max_tries {
                        let delay = backoff_delay(self.retry_base, attempt);
                        log::info!(
                            "enrichment request to {url} errored ({err}), retry {attempt}/{} in {delay:?}",
                            self.max_tries
                        );
                        thread::sleep(delay);
                        continue;
                    }
                    return Err(EnrichmentError::Unavailable(err.to_string()));
                }
            }
        }
    }

    fn build_prompt(title: &str, content: &str) -> String {
        let content = truncate_chars(content, MAX_PROMPT_CONTENT);
        format!(
            "Analyze this web page and generate:\n\
             1. Keywords: 5-10 relevant keywords/phrases separated by commas\n\
             2. Description: A concise 1-2 sentence summary\n\n\
             Title: {title}\n\
             Content: {content}\n\n\
             Please respond in this exact JSON format:\n\
             {{\n    \"keywords\": \"keyword1, keyword2, keyword3, ...\",\n    \"description\": \"Brief description of the page content\"\n}}"
        )
    }

    /// Parse the model's reply, tolerating code fences and non-JSON output.
    fn parse_reply(raw: &str) -> Option<Enrichment> {
        let mut text = raw.trim();
        if let Some(stripped) = text.strip_prefix("```json") {
            text = stripped;
        } else if let Some(stripped) = text.strip_prefix("```") {
            text = stripped;
        }
        if let Some(stripped) = text.strip_suffix("```") {
            text = stripped;
        }
        let text = text.trim();

        if let Ok(reply) = serde_json::from_str::<LlmReply>(text) {
            if !reply.keywords.is_empty() || !reply.description.is_empty() {
                return Some(Enrichment {
                    description: reply.description,
                    keywords: split_keywords(&reply.keywords),
                });
            }
        }

        // Last resort: scan for "keywords:" / "description:" lines.
        let mut keywords = String::new();
        let mut description = String::new();
        for line in text.lines() {
            let line = line.trim().trim_matches(|c| c == '"' || c == ',');
            let lower = line.to_lowercase();
            if let Some(idx) = line.find(':') {
                let value = line[idx + 1..].trim().trim_matches('"').to_string();
                if lower.starts_with("\"keywords") || lower.starts_with("keywords") {
                    keywords = value;
                } else if lower.starts_with("\"description") || lower.starts_with("description") {
                    description = value;
                }
            }
        }

        if keywords.is_empty() && description.is_empty() {
            return None;
        }
        Some(Enrichment {
            description,
            keywords: split_keywords(&keywords),
        })
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn split_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

impl EnrichmentBackend for LiveProvider {
    fn generate_keywords_and_description(
        &self,
        title: &str,
        content: &str,
    ) -> Result<Enrichment, EnrichmentError> {
        let prompt = Self::build_prompt(title, content);
        let request = ChatRequest {
            model: &self.llm_model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: 0.3,
            max_tokens: 300,
        };

        match self.post_json::<_, ChatResponse>(&self.chat_endpoint, &request) {
            Ok(response) => {
                let reply = response
                    .choices
                    .first()
                    .map(|c| c.message.content.as_str())
                    .unwrap_or_default();
                match Self::parse_reply(reply) {
                    Some(enrichment) => Ok(enrichment),
                    None => {
                        log::warn!("could not parse LLM reply, using placeholder enrichment");
                        Ok(placeholder_enrichment(title, content))
                    }
                }
            }
            Err(err) => {
                log::warn!("keyword generation failed ({err}), using placeholder enrichment");
                Ok(placeholder_enrichment(title, content))
            }
        }
    }

    fn generate_embedding(&self, text: &str) -> Result<Vec<f32>, EnrichmentError> {
        let text = truncate_chars(text, MAX_EMBED_TEXT);
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: vec![text],
        };

        let response: EmbeddingResponse =
            self.post_json(&self.embeddings_endpoint, &request)?;
        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                EnrichmentError::InvalidResponse("no embedding in response".to_string())
            })?;

        if embedding.len() != self.dimension {
            return Err(EnrichmentError::InvalidResponse(format!(
                "provider returned dimension {}, expected {}",
                embedding.len(),
                self.dimension
            )));
        }
        Ok(embedding)
    }

    fn health_check(&self) -> bool {
        let request = ChatRequest {
            model: &self.llm_model,
            messages: vec![ChatMessage {
                role: "user",
                content: "Hello",
            }],
            temperature: 0.0,
            max_tokens: 10,
        };

        match self
            .client
            .post(&self.chat_endpoint)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .json(&request)
            .send()
        {
            Ok(resp) => resp.status().is_success(),
            Err(err) => {
                log::debug!("health check failed: {err}");
                false
            }
        }
    }
}
