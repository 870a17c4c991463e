use crate::model::{Feedback, Turn};
use crate::prompts::{self, PromptSet};
use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Summary used when the scorer returns no usable summary.
pub const FALLBACK_SUMMARY: &str = "No summary provided.";
/// Summary used when the score response could not be read at all.
pub const POOR_PERFORMANCE_SUMMARY: &str = "Your answers were too short or incomplete to evaluate. \
Give complete, specific answers that show how you think through a problem.";
/// Score assumed when a free-text score response contains no number.
pub const FALLBACK_SCORE: u8 = 5;

const MAX_FEEDBACK_ITEMS: usize = 3;

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub content: String,
}

// A raw text-completion capability. Everything above it (questions, feedback,
// scoring) is built from prompts and parsing, so tests mock this trait and
// exercise the real parsing code.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Sends one prompt and returns the raw text of the first choice.
    /// `json_mode` asks the provider for a JSON object response.
    async fn complete(&self, prompt: &str, json_mode: bool) -> Result<String>;
}

/// OpenAI-compatible chat-completions client.
pub struct ChatClient {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl ChatClient {
    pub fn new(api_key: SecretString, model: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl LanguageModel for ChatClient {
    async fn complete(&self, prompt: &str, json_mode: bool) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "temperature": if json_mode { 0.2 } else { 0.7 }
        });
        if json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("Chat completion request failed")?
            .error_for_status()
            .context("Chat completion returned an error status")?
            .json::<LlmResponse>()
            .await
            .context("Failed to decode chat completion response")?;

        let answer = &resp
            .choices
            .first()
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))?
            .message
            .content;
        Ok(answer.clone())
    }
}

/// Result of reading an oracle response: either the expected shape, or the
/// raw text when it could not be understood.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleReply<T> {
    Parsed(T),
    Unparsed(String),
}

/// Returns the first balanced top-level `{...}` in `text`, skipping braces
/// inside JSON strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn string_list(value: &Value, key: &str) -> Option<Vec<String>> {
    let items = value.get(key)?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .take(MAX_FEEDBACK_ITEMS)
            .collect(),
    )
}

pub fn parse_feedback(raw: &str) -> OracleReply<Feedback> {
    let Some(value) = extract_json_object(raw).and_then(|json| serde_json::from_str::<Value>(json).ok())
    else {
        return OracleReply::Unparsed(raw.to_string());
    };

    let good = string_list(&value, "good");
    let confident = string_list(&value, "confident");
    let improvement = string_list(&value, "improvement");
    if good.is_some() || confident.is_some() || improvement.is_some() {
        return OracleReply::Parsed(Feedback::Structured {
            good: good.unwrap_or_default(),
            confident: confident.unwrap_or_default(),
            improvement: improvement.unwrap_or_default(),
        });
    }

    // Older prompt shape: {"analysis": "...", "tips": [...]}
    if let Some(analysis) = value.get("analysis").and_then(Value::as_str) {
        let mut text = analysis.trim().to_string();
        if let Some(tips) = string_list(&value, "tips") {
            for tip in tips {
                text.push_str(&format!(" {tip}."));
            }
        }
        return OracleReply::Parsed(Feedback::Freeform { text });
    }

    OracleReply::Unparsed(raw.to_string())
}

/// Never fails: unreadable responses become freeform text, or a neutral
/// structure when there is no text at all.
pub fn feedback_or_neutral(reply: OracleReply<Feedback>) -> Feedback {
    match reply {
        OracleReply::Parsed(feedback) => feedback,
        OracleReply::Unparsed(raw) if raw.trim().is_empty() => Feedback::neutral(),
        OracleReply::Unparsed(raw) => {
            tracing::warn!("Feedback response was not valid JSON, keeping it as free text");
            Feedback::Freeform {
                text: raw.trim().to_string(),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, Deserialize)]
pub struct InterviewScore {
    pub score: u8,
    pub summary: String,
}

pub fn clamp_score(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}

pub fn parse_score(raw: &str) -> InterviewScore {
    if let Some(value) = extract_json_object(raw).and_then(|json| serde_json::from_str::<Value>(json).ok())
    {
        let score = match value.get("score") {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
            _ => 0.0,
        };
        let summary = value
            .get("summary")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(FALLBACK_SUMMARY)
            .to_string();
        return InterviewScore {
            score: clamp_score(score),
            summary,
        };
    }

    // No JSON at all: take the first integer in the text as the score.
    let digits: String = raw
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let score = digits
        .parse::<f64>()
        .map(clamp_score)
        .unwrap_or(FALLBACK_SCORE);
    let stripped: String = raw.chars().filter(|c| !c.is_ascii_digit()).collect();
    let summary = match stripped.trim() {
        "" => POOR_PERFORMANCE_SUMMARY.to_string(),
        text => text.to_string(),
    };
    InterviewScore { score, summary }
}

pub fn transcript_text(turns: &[Turn]) -> String {
    turns
        .iter()
        .enumerate()
        .map(|(idx, turn)| {
            format!(
                "---\nQuestion {}: {}\nCandidate's Response: {}\nInitial Feedback: {}",
                idx + 1,
                turn.question(),
                if turn.is_skipped() { "(skipped)" } else { turn.response() },
                turn.feedback().summary_text()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// The `FeedbackOracle` trait is the seam between the session controller and
// whatever produces feedback. The controller only ever sees this trait, so
// tests substitute `MockFeedbackOracle`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FeedbackOracle: Send + Sync {
    async fn feedback(&self, question: &str, answer: &str, role: &str, level: &str) -> Result<Feedback>;

    async fn score(&self, role: &str, difficulty: &str, turns: &[Turn]) -> Result<InterviewScore>;
}

/// `FeedbackOracle` backed by a language model and prompt templates.
pub struct LlmOracle {
    model: Arc<dyn LanguageModel>,
    prompts: Arc<PromptSet>,
    strictness: String,
}

impl LlmOracle {
    pub fn new(model: Arc<dyn LanguageModel>, prompts: Arc<PromptSet>) -> Self {
        Self {
            model,
            prompts,
            strictness: prompts::DEFAULT_STRICTNESS.to_string(),
        }
    }

    pub fn with_strictness(mut self, strictness: impl Into<String>) -> Self {
        self.strictness = strictness.into();
        self
    }
}

#[async_trait]
impl FeedbackOracle for LlmOracle {
    async fn feedback(&self, question: &str, answer: &str, role: &str, level: &str) -> Result<Feedback> {
        let prompt = self.prompts.render(
            prompts::FEEDBACK,
            &[("question", question), ("answer", answer), ("role", role), ("level", level)],
        );
        let raw = self
            .model
            .complete(&prompt, true)
            .await
            .context("Feedback request failed")?;
        Ok(feedback_or_neutral(parse_feedback(&raw)))
    }

    async fn score(&self, role: &str, difficulty: &str, turns: &[Turn]) -> Result<InterviewScore> {
        let count = turns.len().to_string();
        let transcript = transcript_text(turns);
        let prompt = self.prompts.render(
            prompts::SCORE,
            &[
                ("role", role),
                ("difficulty", difficulty),
                ("count", &count),
                ("transcript", &transcript),
                ("strictness", &self.strictness),
            ],
        );
        let raw = self
            .model
            .complete(&prompt, true)
            .await
            .context("Score request failed")?;
        Ok(parse_score(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_extract_json_object_ignores_surrounding_prose() {
        let text = "Sure! Here you go:\n{\"a\": {\"b\": \"}{\"}, \"c\": 1}\nHope that helps {not json}";
        assert_eq!(
            extract_json_object(text),
            Some("{\"a\": {\"b\": \"}{\"}, \"c\": 1}")
        );
        assert_eq!(extract_json_object("no braces"), None);
        assert_eq!(extract_json_object("{\"unterminated\": 1"), None);
    }

    #[test]
    fn test_parse_feedback_structured() {
        let raw = r#"Here is my evaluation: {"good": ["a", "b", "c", "d"], "confident": ["x"], "improvement": []}"#;
        assert_eq!(
            parse_feedback(raw),
            OracleReply::Parsed(Feedback::Structured {
                good: vec!["a".into(), "b".into(), "c".into()],
                confident: vec!["x".into()],
                improvement: vec![],
            })
        );
    }

    #[test]
    fn test_parse_feedback_analysis_shape() {
        let raw = r#"{"analysis": "Solid answer.", "tips": ["Mention indexes"]}"#;
        assert_eq!(
            parse_feedback(raw),
            OracleReply::Parsed(Feedback::Freeform {
                text: "Solid answer. Mention indexes.".into()
            })
        );
    }

    #[test]
    fn test_unparseable_feedback_falls_back() {
        let reply = parse_feedback("The answer was fine but short.");
        assert_eq!(reply, OracleReply::Unparsed("The answer was fine but short.".into()));
        assert_eq!(
            feedback_or_neutral(reply),
            Feedback::Freeform {
                text: "The answer was fine but short.".into()
            }
        );
        assert_eq!(feedback_or_neutral(parse_feedback("  ")), Feedback::neutral());
        assert_eq!(feedback_or_neutral(parse_feedback("{\"other\": 1}")), Feedback::Freeform {
            text: "{\"other\": 1}".into()
        });
    }

    #[test]
    fn test_scores_are_clamped() {
        for (raw, expected) in [
            (r#"{"score": 150, "summary": "s"}"#, 100),
            (r#"{"score": -20, "summary": "s"}"#, 0),
            (r#"{"score": 72.6, "summary": "s"}"#, 73),
            (r#"{"score": "64", "summary": "s"}"#, 64),
        ] {
            assert_eq!(parse_score(raw).score, expected, "input: {raw}");
        }
        assert_eq!(clamp_score(f64::NAN), 0);
        assert_eq!(clamp_score(f64::INFINITY), 100);
    }

    #[test]
    fn test_score_summary_fallbacks() {
        let parsed = parse_score(r#"{"score": 40}"#);
        assert_eq!(parsed.summary, FALLBACK_SUMMARY);

        let free_text = parse_score("I would give this 250 points overall.");
        assert_eq!(free_text.score, 100);
        assert_eq!(free_text.summary, "I would give this  points overall.");

        let nothing = parse_score("");
        assert_eq!(nothing.score, FALLBACK_SCORE);
        assert_eq!(nothing.summary, POOR_PERFORMANCE_SUMMARY);
    }

    #[tokio::test]
    async fn test_llm_oracle_feedback_requests_json() {
        let mut model = MockLanguageModel::new();
        model
            .expect_complete()
            .withf(|prompt, json_mode| *json_mode && prompt.contains("Question: What is a mutex?"))
            .times(1)
            .returning(|_, _| Ok(r#"{"good": ["clear"], "confident": [], "improvement": ["depth"]}"#.to_string()));

        let oracle = LlmOracle::new(Arc::new(model), Arc::new(PromptSet::builtin()));
        let feedback = oracle
            .feedback("What is a mutex?", "A lock.", "Backend Engineer", "Medium")
            .await
            .unwrap();

        assert_eq!(
            feedback,
            Feedback::Structured {
                good: vec!["clear".into()],
                confident: vec![],
                improvement: vec!["depth".into()],
            }
        );
    }

    #[tokio::test]
    async fn test_llm_oracle_propagates_transport_errors() {
        let mut model = MockLanguageModel::new();
        model
            .expect_complete()
            .returning(|_, _| Err(anyhow::anyhow!("connection refused")));

        let oracle = LlmOracle::new(Arc::new(model), Arc::new(PromptSet::builtin()));
        assert!(oracle.feedback("Q", "A", "R", "Easy").await.is_err());
    }

    #[tokio::test]
    async fn test_llm_oracle_score_includes_transcript() {
        let mut model = MockLanguageModel::new();
        model
            .expect_complete()
            .withf(|prompt, _| {
                prompt.contains("Question 1: Q1")
                    && prompt.contains("Candidate's Response: (skipped)")
                    && prompt.contains("Questions asked: 2")
            })
            .times(1)
            .returning(|_, _| Ok(r#"{"score": 101, "summary": "Good effort."}"#.to_string()));

        let turns = vec![
            Turn::answered("Q1", "A1", Feedback::Freeform { text: "ok".into() }),
            Turn::skipped("Q2"),
        ];
        let oracle = LlmOracle::new(Arc::new(model), Arc::new(PromptSet::builtin()));
        let score = oracle.score("SRE", "Hard", &turns).await.unwrap();

        assert_eq!(score.score, 100);
        assert_eq!(score.summary, "Good effort.");
    }

    // This is an integration test that makes a live call to the chat API.
    // It is ignored by default; run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn test_live_feedback() {
        dotenvy::dotenv_override().ok();
        let api_key = env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY not set");
        let client = ChatClient::new(
            SecretString::from(api_key),
            "gpt-4o".to_string(),
            "https://api.openai.com/v1".to_string(),
        );
        let oracle = LlmOracle::new(Arc::new(client), Arc::new(PromptSet::builtin()));

        let feedback = oracle
            .feedback(
                "What is the difference between a process and a thread?",
                "A process has its own address space, threads share one.",
                "Backend Engineer",
                "Medium",
            )
            .await
            .expect("feedback call failed");

        println!("Feedback: {:?}", feedback);
        assert!(!feedback.is_error());
    }
}
