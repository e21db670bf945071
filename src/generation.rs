//! Text-generation backend contract.
//!
//! The engine only relies on `generate(prompt, max_output_tokens)`; model
//! identity and transport live behind the `TextGenerator` trait.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config_loader::BackendConfig;
use crate::errors::{SafeLock, SimError, SimResult};

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Single request/response round trip. Fails on transport errors,
    /// timeouts, non-success status and empty completions.
    async fn generate(&self, prompt: &str, max_output_tokens: u32) -> SimResult<String>;

    /// Short identifier used in logs and readiness checks.
    fn name(&self) -> &str {
        "generator"
    }
}

/// Chat-completions style HTTP backend with a fixed per-call timeout.
pub struct HttpTextGenerator {
    http: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

const SYSTEM_PROMPT: &str = "You are the narrator and evaluator of an interactive \
    personality simulation. Follow the output format requested in each prompt exactly.";

impl HttpTextGenerator {
    pub fn new(config: &BackendConfig) -> SimResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SimError::network("build_http_client", e))?;

        Ok(Self {
            http,
            url: config.url.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &str, max_output_tokens: u32) -> SimResult<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "max_tokens": max_output_tokens
        });

        let mut request = self.http.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| SimError::network("generate", e))?;

        let status = resp.status();
        if !status.is_success() {
            warn!("Generation backend returned {}", status);
            return Err(SimError::backend("generate", format!("status {status}")));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SimError::network("decode_completion", e))?;
        let answer = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        if answer.trim().is_empty() {
            return Err(SimError::backend("generate", "empty completion"));
        }

        debug!("Completion received ({} chars)", answer.len());
        Ok(answer)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Replays canned completions in order. Used by `play --script` and tests.
///
/// Each entry is either a completion or an error to surface; once the
/// script runs out every call fails as a backend error.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a completion.
    pub fn push_reply(&self, reply: impl Into<String>) -> SimResult<()> {
        self.replies.safe_lock()?.push_back(Ok(reply.into()));
        Ok(())
    }

    /// Queue a failure, surfaced as a backend error.
    pub fn push_failure(&self, message: impl Into<String>) -> SimResult<()> {
        self.replies.safe_lock()?.push_back(Err(message.into()));
        Ok(())
    }

    /// Prompts seen so far, oldest first.
    pub fn prompts(&self) -> SimResult<Vec<String>> {
        Ok(self.prompts.safe_lock()?.clone())
    }

    pub fn remaining(&self) -> SimResult<usize> {
        Ok(self.replies.safe_lock()?.len())
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, _max_output_tokens: u32) -> SimResult<String> {
        self.prompts.safe_lock()?.push(prompt.to_string());
        match self.replies.safe_lock()?.pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(SimError::backend("generate", message)),
            None => Err(SimError::backend("generate", "script exhausted")),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_generator_replays_in_order() {
        let generator = ScriptedGenerator::new(["one", "two"]);
        generator.push_failure("boom").unwrap();
        assert_eq!(generator.generate("a", 10).await.unwrap(), "one");
        assert_eq!(generator.generate("b", 10).await.unwrap(), "two");
        let err = generator.generate("c", 10).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(generator.generate("d", 10).await.is_err());
        assert_eq!(generator.prompts().unwrap(), vec!["a", "b", "c", "d"]);
    }
}
