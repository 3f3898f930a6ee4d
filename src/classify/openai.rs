//! Occupancy estimation through an OpenAI-compatible chat completions API.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{parse_occupancy, OccupancyClassifier};

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MAX_TOKENS: u32 = 4;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const SYSTEM_PROMPT: &str = "You are an assistant that classifies room occupancy. \
     Only return a single number – the count of people in the image.";
const USER_PROMPT: &str =
    "This is an image of a room. Return just a single number reflecting how many people are present.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub model: String,
    /// Scheme and host, without `/v1`.
    pub base_url: String,
    pub max_tokens: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl OpenAiConfig {
    pub fn validate(&self) -> Result<()> {
        if self.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(anyhow!("OPENAI_API_KEY must be set"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("model name must not be empty"));
        }
        if self.max_tokens == 0 {
            return Err(anyhow!("max_tokens must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiClassifier {
    config: OpenAiConfig,
    api_key: String,
    agent: ureq::Agent,
}

impl OpenAiClassifier {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        config.validate()?;
        let api_key = config.api_key.clone().unwrap_or_default();
        Ok(Self {
            config,
            api_key,
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn request_body(&self, image_url: &str) -> serde_json::Value {
        json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {
                    "role": "user",
                    "content": [
                        {"type": "text", "text": USER_PROMPT},
                        {"type": "image_url", "image_url": {"url": image_url}},
                    ],
                },
            ],
            "max_tokens": self.config.max_tokens,
        })
    }
}

impl OccupancyClassifier for OpenAiClassifier {
    fn estimate(&mut self, image_url: &str) -> Result<u32> {
        let response = match self
            .agent
            .post(&self.endpoint())
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(self.request_body(image_url))
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(anyhow!(
                    "chat completion returned HTTP {}: {}",
                    code,
                    body.trim()
                ));
            }
            Err(err) => {
                return Err(anyhow::Error::new(err).context("chat completion request"));
            }
        };

        let completion: ChatCompletion = response
            .into_json()
            .context("parse chat completion response")?;
        let reply = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("chat completion has no message content"))?;
        log::debug!("model {} replied {:?}", self.config.model, reply);
        parse_occupancy(&reply)
    }
}
