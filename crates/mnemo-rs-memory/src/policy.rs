//! Capture filtering for working memory messages.

use crate::error::MemoryError;
use crate::text::truncate_chars;
use mnemo_rs_config::ProviderConfig;
use regex::Regex;

/// Policy for deciding what working memory keeps.
#[derive(Debug, Clone)]
pub struct CapturePolicy {
    /// Patterns that drop a message entirely.
    pub deny_patterns: Vec<String>,
    /// Patterns replaced in captured content.
    pub redact_patterns: Vec<String>,
    /// Optional maximum message length in characters.
    pub max_message_chars: Option<usize>,
    /// Detect secrets using entropy heuristics.
    pub detect_secrets: bool,
    pub secret_entropy_threshold: f32,
    pub redaction_replacement: String,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            deny_patterns: Vec::new(),
            redact_patterns: Vec::new(),
            max_message_chars: None,
            detect_secrets: true,
            secret_entropy_threshold: 3.7,
            redaction_replacement: "[REDACTED]".to_string(),
        }
    }
}

impl CapturePolicy {
    /// Read policy keys from working memory backend parameters.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, MemoryError> {
        let defaults = Self::default();
        Ok(Self {
            deny_patterns: config.param_strings("deny_patterns")?,
            redact_patterns: config.param_strings("redact_patterns")?,
            max_message_chars: config.param_u64("max_message_chars")?.map(|n| n as usize),
            detect_secrets: config
                .param_bool("detect_secrets")?
                .unwrap_or(defaults.detect_secrets),
            secret_entropy_threshold: config
                .param_f64("secret_entropy_threshold")?
                .map(|n| n as f32)
                .unwrap_or(defaults.secret_entropy_threshold),
            redaction_replacement: config
                .param_str("redaction_replacement")?
                .map(str::to_string)
                .unwrap_or(defaults.redaction_replacement),
        })
    }

    /// Compile patterns once for repeated use.
    pub fn compile(&self) -> Result<CaptureFilter, MemoryError> {
        Ok(CaptureFilter {
            deny: compile_all(&self.deny_patterns)?,
            redact: compile_all(&self.redact_patterns)?,
            secret: Regex::new(r"[A-Za-z0-9+/=_\-]{20,}")
                .map_err(|err| MemoryError::Regex(err.to_string()))?,
            policy: self.clone(),
        })
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, MemoryError> {
    patterns
        .iter()
        .map(|pattern| Regex::new(pattern).map_err(|err| MemoryError::Regex(err.to_string())))
        .collect()
}

/// Compiled form of a [`CapturePolicy`].
#[derive(Debug, Clone)]
pub struct CaptureFilter {
    deny: Vec<Regex>,
    redact: Vec<Regex>,
    secret: Regex,
    policy: CapturePolicy,
}

impl CaptureFilter {
    /// Filtered content, or None when a deny pattern matches.
    pub fn apply(&self, content: &str) -> Option<String> {
        if self.deny.iter().any(|regex| regex.is_match(content)) {
            return None;
        }
        let replacement = self.policy.redaction_replacement.as_str();
        let mut content = content.to_string();
        for regex in &self.redact {
            content = regex.replace_all(&content, replacement).to_string();
        }
        if self.policy.detect_secrets {
            content = self.redact_high_entropy(&content);
        }
        if let Some(max_chars) = self.policy.max_message_chars {
            content = truncate_chars(&content, max_chars);
        }
        Some(content)
    }

    fn redact_high_entropy(&self, content: &str) -> String {
        let threshold = self.policy.secret_entropy_threshold;
        let replacement = self.policy.redaction_replacement.as_str();
        self.secret
            .replace_all(content, |caps: &regex::Captures<'_>| {
                let token = caps.get(0).map_or("", |m| m.as_str());
                if shannon_entropy(token) >= threshold {
                    replacement.to_string()
                } else {
                    token.to_string()
                }
            })
            .to_string()
    }
}

/// Shannon entropy in bits per byte.
fn shannon_entropy(token: &str) -> f32 {
    let bytes = token.as_bytes();
    if bytes.is_empty() {
        return 0.0;
    }
    let mut counts = [0usize; 256];
    for byte in bytes {
        counts[*byte as usize] += 1;
    }
    let len = bytes.len() as f32;
    counts
        .iter()
        .filter(|count| **count > 0)
        .map(|count| {
            let p = *count as f32 / len;
            -p * p.log2()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::{CapturePolicy, shannon_entropy};
    use mnemo_rs_config::ProviderConfig;
    use pretty_assertions::assert_eq;

    #[test]
    fn deny_patterns_drop_content() {
        let filter = CapturePolicy {
            deny_patterns: vec!["(?i)password".to_string()],
            ..CapturePolicy::default()
        }
        .compile()
        .expect("compile");
        assert_eq!(filter.apply("my Password is hunter2"), None);
        assert_eq!(filter.apply("hello").as_deref(), Some("hello"));
    }

    #[test]
    fn redacts_and_truncates() {
        let filter = CapturePolicy {
            redact_patterns: vec!["token".to_string()],
            redaction_replacement: "REDACTED".to_string(),
            max_message_chars: Some(5),
            detect_secrets: false,
            ..CapturePolicy::default()
        }
        .compile()
        .expect("compile");
        assert_eq!(filter.apply("token-1234").as_deref(), Some("REDAC"));
    }

    #[test]
    fn high_entropy_tokens_are_redacted() {
        let filter = CapturePolicy::default().compile().expect("compile");
        let content = filter
            .apply("key sk_live_9fQ2xL7pR4vT1mZ8nB3cK6")
            .expect("content");
        assert_eq!(content, "key [REDACTED]");
        assert!(shannon_entropy("aaaaaaaaaaaaaaaaaaaaaaaa") < 0.1);
    }

    #[test]
    fn policy_reads_backend_params() {
        let config = ProviderConfig::new("memory")
            .with_param("deny_patterns", serde_json::json!(["secret"]))
            .with_param("detect_secrets", false);
        let policy = CapturePolicy::from_config(&config).expect("policy");
        assert_eq!(policy.deny_patterns, vec!["secret".to_string()]);
        assert!(!policy.detect_secrets);
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let policy = CapturePolicy {
            deny_patterns: vec!["(".to_string()],
            ..CapturePolicy::default()
        };
        assert!(policy.compile().is_err());
    }
}
