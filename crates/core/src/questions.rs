use crate::model::{Difficulty, InterviewSetup};
use crate::oracle::LanguageModel;
use crate::prompts::{self, PromptSet};
use crate::resume::ResumeDigest;
use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;

/// Opening questions that can be asked before the role-specific ones.
pub const INTRODUCTORY_QUESTIONS: &[&str] = &[
    "Tell me about yourself.",
    "Walk me through your most recent role and what you were responsible for.",
    "Why are you interested in this position?",
    "Describe a project you are particularly proud of.",
    "What are you hoping to learn in your next role?",
];

/// How many questions to generate and how many introductory ones to put in
/// front. Introductory questions are never added to a literal question bank.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionPolicy {
    pub question_count: usize,
    pub introductory_count: usize,
}

impl Default for QuestionPolicy {
    fn default() -> Self {
        Self {
            question_count: 5,
            introductory_count: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuestionRequest {
    pub role: String,
    pub difficulty: Difficulty,
    pub topics: Vec<String>,
    pub resume: Option<ResumeDigest>,
    pub literal_bank: Vec<String>,
}

impl From<&InterviewSetup> for QuestionRequest {
    fn from(setup: &InterviewSetup) -> Self {
        Self {
            role: setup.role.clone(),
            difficulty: setup.difficulty,
            topics: setup.topics.clone(),
            resume: setup.resume.clone(),
            literal_bank: setup.question_bank.clone(),
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait QuestionSource: Send + Sync {
    async fn generate(&self, request: &QuestionRequest) -> Result<Vec<String>>;
}

/// Strips list numbering/bullets, drops blank lines and keeps at most `cap`.
pub fn clean_questions(text: &str, cap: usize) -> Vec<String> {
    text.lines()
        .map(strip_numbering)
        .map(|line| line.trim_matches('"').trim().to_string())
        .filter(|line| !line.is_empty())
        .take(cap)
        .collect()
}

fn strip_numbering(line: &str) -> &str {
    let line = line.trim();
    let line = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("• "))
        .unwrap_or(line);

    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim();
        }
    }
    line
}

/// True when a generated question still contains template markers such as
/// `[Specific Technology]`.
pub fn has_placeholder(question: &str) -> bool {
    let bracketed = question
        .find('[')
        .is_some_and(|open| question[open + 1..].contains(']'));
    bracketed || question.contains("mentioned in resume")
}

/// `QuestionSource` that asks a language model for questions.
pub struct LlmQuestionSource {
    model: Arc<dyn LanguageModel>,
    prompts: Arc<PromptSet>,
    policy: QuestionPolicy,
}

impl LlmQuestionSource {
    pub fn new(model: Arc<dyn LanguageModel>, prompts: Arc<PromptSet>, policy: QuestionPolicy) -> Self {
        Self { model, prompts, policy }
    }

    async fn request(&self, key: &str, request: &QuestionRequest) -> Result<Vec<String>> {
        let count = self.policy.question_count.to_string();
        let topics = if request.topics.is_empty() {
            String::new()
        } else {
            format!(
                "Focus on the following topics:\n{}",
                request
                    .topics
                    .iter()
                    .map(|t| format!("- {t}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            )
        };
        let resume = request
            .resume
            .as_ref()
            .map(|r| r.prompt_context(&request.role))
            .unwrap_or_default();

        let prompt = self.prompts.render(
            key,
            &[
                ("count", &count),
                ("role", &request.role),
                ("difficulty", request.difficulty.as_str()),
                ("topics", &topics),
                ("resume", &resume),
            ],
        );
        let raw = self
            .model
            .complete(&prompt, false)
            .await
            .with_context(|| format!("Question generation failed for prompt '{key}'"))?;
        Ok(clean_questions(&raw, self.policy.question_count))
    }
}

#[async_trait]
impl QuestionSource for LlmQuestionSource {
    async fn generate(&self, request: &QuestionRequest) -> Result<Vec<String>> {
        if !request.literal_bank.is_empty() {
            tracing::info!("Using {} questions from the literal bank", request.literal_bank.len());
            return Ok(request.literal_bank.clone());
        }

        tracing::info!(
            "Generating {} questions for '{}' ({})",
            self.policy.question_count,
            request.role,
            request.difficulty
        );
        let mut questions = self.request(prompts::QUESTIONS, request).await?;

        if questions.iter().any(|q| has_placeholder(q)) {
            tracing::warn!("Detected placeholder text in generated questions, regenerating");
            questions = self.request(prompts::QUESTIONS_STRICT, request).await?;
        }

        if questions.is_empty() {
            anyhow::bail!("No questions were generated");
        }

        let mut plan: Vec<String> = INTRODUCTORY_QUESTIONS
            .iter()
            .take(self.policy.introductory_count)
            .map(|q| q.to_string())
            .collect();
        plan.extend(questions);
        Ok(plan)
    }
}
