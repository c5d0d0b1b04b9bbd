//! Language-model client and response cleanup helpers.
//!
//! One blocking HTTP call per completion against a messages-style endpoint.
//! Token counts come back with every completion so the run ledger can price
//! the run. Models wrap answers in code fences or chat them up with prose;
//! [`strip_code_fences`] and [`extract_json`] normalize that before parsing.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use ureq::Agent;

use crate::config::LmConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

pub struct LmClient {
    agent: Agent,
    endpoint: String,
    model: String,
    api_key: String,
}

impl LmClient {
    /// Build a client from settings, reading the API key out of the
    /// configured environment variable.
    pub fn from_config(config: &LmConfig) -> Result<Self> {
        let api_key = env::var(&config.api_key_env)
            .with_context(|| format!("missing api key in ${}", config.api_key_env))?;
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(300)))
            .build()
            .into();
        Ok(Self {
            agent,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
        })
    }

    pub fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<Completion> {
        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "system": system,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let mut response = self
            .agent
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .send_json(&body)
            .with_context(|| format!("lm request to {}", self.endpoint))?;
        let value: Value = response
            .body_mut()
            .read_json()
            .context("decode lm response")?;

        let text = value
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("lm response missing content text"))?
            .to_string();
        let usage = TokenUsage {
            input_tokens: value
                .pointer("/usage/input_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            output_tokens: value
                .pointer("/usage/output_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        };
        Ok(Completion { text, usage })
    }
}

/// Strip a surrounding markdown code fence, with or without a language tag.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let Some(after_open) = trimmed.find('\n') else {
        return trimmed.to_string();
    };
    let inner = &trimmed[after_open + 1..];
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    inner.trim().to_string()
}

/// The outermost JSON object embedded in the text, if any. Models often
/// surround the object with commentary, so this scans for balanced braces
/// rather than trusting the whole reply.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_fences_handles_language_tags() {
        assert_eq!(strip_code_fences("```html\n<p>hi</p>\n```"), "<p>hi</p>");
        assert_eq!(strip_code_fences("```\nplain\n```"), "plain");
        assert_eq!(strip_code_fences("  no fences  "), "no fences");
    }

    #[test]
    fn strip_fences_leaves_inner_fences_alone() {
        let text = "```markdown\nuse ```rust``` for code\n```";
        assert_eq!(strip_code_fences(text), "use ```rust``` for code");
    }

    #[test]
    fn extract_json_finds_embedded_object() {
        let reply = "Sure! Here is the verdict:\n{\"status\": \"APPROVE\", \"nested\": {\"a\": 1}}\nLet me know.";
        assert_eq!(
            extract_json(reply),
            Some("{\"status\": \"APPROVE\", \"nested\": {\"a\": 1}}")
        );
    }

    #[test]
    fn extract_json_ignores_braces_inside_strings() {
        let reply = r#"{"reason": "uses { and } in text"}"#;
        assert_eq!(extract_json(reply), Some(reply));
    }

    #[test]
    fn extract_json_rejects_unbalanced_text() {
        assert_eq!(extract_json("no object here"), None);
        assert_eq!(extract_json("{\"open\": true"), None);
    }

    #[test]
    fn token_usage_accumulates() {
        let mut total = TokenUsage::default();
        total.add(TokenUsage {
            input_tokens: 100,
            output_tokens: 40,
        });
        total.add(TokenUsage {
            input_tokens: 10,
            output_tokens: 2,
        });
        assert_eq!(total.input_tokens, 110);
        assert_eq!(total.output_tokens, 42);
    }
}
