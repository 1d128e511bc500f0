// LLM topic extractor — HTTP client for an OpenAI-compatible
// chat-completions API.
//
// The model is asked to read a chunk of reviews and return short topic
// phrases as a JSON list. The response is treated as untrusted output:
// code fences are stripped, malformed entries are skipped per entry, and
// candidates referencing review ids that were not in the prompt are
// dropped. Nothing here tries to make the model consistent — that is the
// matcher's job.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::traits::{CandidateTopic, Review, TopicExtractor};

/// Reviews shorter than this are skipped before prompting — "Good" or
/// "Worst app" carries no extractable topic and wastes tokens.
const MIN_REVIEW_CHARS: usize = 4;

const EXTRACTION_PROMPT: &str = "\
You are an expert user researcher. Your task is to analyze a batch of app \
store reviews and extract specific issues, requests, or feedback points.

For each review, if it contains a clear issue, bug report, feature request, \
or specific praise/complaint, extract it as a short, concise topic string \
(3-6 words). Ignore generic reviews like \"Good\", \"Nice\", \"Worst app\" \
unless they specify WHY.

Reviews:
{reviews}

Return the output as a JSON list of objects:
[
    { \"reviewId\": \"...\", \"topic\": \"...\" },
    ...
]
If a review has no specific content, do not include it in the list. Return \
only the JSON list, no other text.";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Topic extractor backed by an OpenAI-style chat-completions endpoint.
pub struct LlmTopicExtractor {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmTopicExtractor {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("groundswell/0.1 (review-trend-analysis)")
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    fn build_prompt(reviews: &[Review]) -> Option<String> {
        let mut reviews_text = String::new();
        for r in reviews {
            if r.content.chars().count() < MIN_REVIEW_CHARS {
                continue;
            }
            reviews_text.push_str(&format!("ID: {}\nText: {}\n---\n", r.review_id, r.content));
        }

        if reviews_text.is_empty() {
            return None;
        }
        Some(EXTRACTION_PROMPT.replace("{reviews}", &reviews_text))
    }
}

#[async_trait]
impl TopicExtractor for LlmTopicExtractor {
    async fn extract_topics(&self, reviews: &[Review]) -> Result<Vec<CandidateTopic>> {
        let Some(prompt) = Self::build_prompt(reviews) else {
            return Ok(Vec::new());
        };

        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Extractor API request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Extractor API returned {}: {}", status, text);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse extractor response")?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default();

        let known_ids: HashSet<&str> = reviews.iter().map(|r| r.review_id.as_str()).collect();
        let candidates = parse_extraction(content, &known_ids);

        debug!(
            reviews = reviews.len(),
            candidates = candidates.len(),
            "Extracted topic candidates"
        );
        Ok(candidates)
    }
}

/// Parse the model's JSON list into candidates, skipping anything
/// malformed. The model occasionally wraps output in markdown fences or
/// invents review ids; both are tolerated without failing the chunk.
fn parse_extraction(content: &str, known_ids: &HashSet<&str>) -> Vec<CandidateTopic> {
    let trimmed = strip_code_fence(content);

    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) else {
        warn!("Extractor response was not a JSON list, skipping chunk output");
        return Vec::new();
    };

    let mut candidates = Vec::new();
    for item in items {
        let Some(obj) = item.as_object() else { continue };
        let Some(review_id) = obj.get("reviewId").and_then(Value::as_str) else {
            continue;
        };
        let Some(topic) = obj.get("topic").and_then(Value::as_str) else {
            continue;
        };
        let label = topic.trim();
        if label.is_empty() {
            continue;
        }
        if !known_ids.contains(review_id) {
            warn!(review_id, "Extractor referenced an unknown review id, dropping");
            continue;
        }
        candidates.push(CandidateTopic {
            label: label.to_string(),
            review_id: review_id.to_string(),
        });
    }
    candidates
}

/// Strip a leading/trailing markdown code fence if present.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the fence line
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches('\n')
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&'static str]) -> HashSet<&'static str> {
        list.iter().copied().collect()
    }

    #[test]
    fn parses_well_formed_list() {
        let content = r#"[
            {"reviewId": "r1", "topic": "rude driver"},
            {"reviewId": "r2", "topic": "app crashes on checkout"}
        ]"#;
        let out = parse_extraction(content, &ids(&["r1", "r2"]));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].label, "rude driver");
        assert_eq!(out[1].review_id, "r2");
    }

    #[test]
    fn strips_markdown_fences() {
        let content = "```json\n[{\"reviewId\": \"r1\", \"topic\": \"late delivery\"}]\n```";
        let out = parse_extraction(content, &ids(&["r1"]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "late delivery");
    }

    #[test]
    fn skips_malformed_entries_not_whole_chunk() {
        let content = r#"[
            {"reviewId": "r1", "topic": "rude driver"},
            {"reviewId": "r2"},
            {"topic": "orphaned topic"},
            {"reviewId": "r3", "topic": ""},
            42
        ]"#;
        let out = parse_extraction(content, &ids(&["r1", "r2", "r3"]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].review_id, "r1");
    }

    #[test]
    fn drops_unknown_review_ids() {
        let content = r#"[{"reviewId": "hallucinated", "topic": "ghost topic"}]"#;
        let out = parse_extraction(content, &ids(&["r1"]));
        assert!(out.is_empty());
    }

    #[test]
    fn non_json_response_yields_nothing() {
        let out = parse_extraction("Sorry, I can't help with that.", &ids(&["r1"]));
        assert!(out.is_empty());
    }

    #[test]
    fn prompt_skips_trivial_reviews() {
        let reviews = vec![
            Review {
                review_id: "r1".to_string(),
                content: "ok".to_string(),
                score: Some(3),
                at: None,
            },
            Review {
                review_id: "r2".to_string(),
                content: "Delivery guy was incredibly rude at the door".to_string(),
                score: Some(1),
                at: None,
            },
        ];
        let prompt = LlmTopicExtractor::build_prompt(&reviews).unwrap();
        assert!(!prompt.contains("ID: r1"));
        assert!(prompt.contains("ID: r2"));
    }

    #[test]
    fn prompt_is_none_when_all_reviews_trivial() {
        let reviews = vec![Review {
            review_id: "r1".to_string(),
            content: "ok".to_string(),
            score: None,
            at: None,
        }];
        assert!(LlmTopicExtractor::build_prompt(&reviews).is_none());
    }
}
