//! Prompt templates for the language-model oracle.
//!
//! Templates use `{{name}}` placeholders. Built-in defaults can be replaced
//! per key (`questions`, `questions_strict`, `feedback`, `score`), usually
//! from a directory of `.md` files.

use std::collections::HashMap;

pub const QUESTIONS: &str = "questions";
pub const QUESTIONS_STRICT: &str = "questions_strict";
pub const FEEDBACK: &str = "feedback";
pub const SCORE: &str = "score";

const DEFAULT_QUESTIONS: &str = r#"You are an expert interview question generator. Generate a list of {{count}} interview questions based on the provided criteria.

Job Role: {{role}}
Difficulty: {{difficulty}}
{{topics}}
{{resume}}

CRITICAL RULES:
1. Generate {{count}} insightful and relevant questions for this interview scenario
2. If resume information is provided, use the ACTUAL technologies, companies, and experiences mentioned
3. NEVER use placeholder text like "[Specific Technology]" or "[Specific Application]"
4. If specific details are missing, ask general but relevant questions for the role
5. Each question should be complete and ready to ask
6. Return only the questions, one per line, without numbering or additional text"#;

const DEFAULT_QUESTIONS_STRICT: &str = r#"Generate {{count}} direct interview questions for a {{role}} position at {{difficulty}} difficulty level.
{{topics}}

Requirements:
- Ask direct, specific questions
- No placeholder text or brackets
- Questions should be complete and ready to ask
- Make them relevant to the role and difficulty level

Return only the questions, one per line, without numbering."#;

const DEFAULT_FEEDBACK: &str = r#"You are an expert interview coach. Analyze the candidate's response for the given question, role, and experience level.

Question: {{question}}
Response: {{answer}}
Role: {{role}}
Experience Level: {{level}}

For technical questions focus on accuracy, depth and problem-solving approach.
For behavioral questions focus on structure, relevance and communication clarity.

Return ONLY valid JSON in this exact format, with exactly three short items per list:
{
  "good": ["...", "...", "..."],
  "confident": ["...", "...", "..."],
  "improvement": ["...", "...", "..."]
}"#;

const DEFAULT_SCORE: &str = r#"You are an expert career coach providing a final evaluation for a mock interview.

Interview Context:
- Role: {{role}}
- Difficulty: {{difficulty}}
- Questions asked: {{count}}

Interview Transcript:
{{transcript}}
---

Score the whole interview from 0 to 100.
{{strictness}}

Write a concise (3-4 sentences) summary addressed to the candidate as "you".

Respond in the following JSON format:
{
  "score": <number between 0 and 100>,
  "summary": "<your summary here>"
}"#;

/// Scoring guidance inserted into the score prompt. Kept separate from the
/// template because the strictness rubric is policy.
pub const DEFAULT_STRICTNESS: &str = "Be strict and realistic. Unanswered or skipped questions count against the candidate. \
Answers like \"I don't know\" or one-word replies earn almost nothing. \
Reserve scores above 80 for complete, accurate, detailed answers to most questions.";

#[derive(Debug, Clone)]
pub struct PromptSet {
    templates: HashMap<String, String>,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptSet {
    pub fn builtin() -> Self {
        let templates = [
            (QUESTIONS, DEFAULT_QUESTIONS),
            (QUESTIONS_STRICT, DEFAULT_QUESTIONS_STRICT),
            (FEEDBACK, DEFAULT_FEEDBACK),
            (SCORE, DEFAULT_SCORE),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { templates }
    }

    /// Replaces built-in templates with the given ones. Unknown keys are
    /// ignored with a warning.
    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        for (key, template) in overrides {
            if self.templates.contains_key(&key) {
                tracing::debug!("Overriding prompt '{}'", key);
                self.templates.insert(key, template);
            } else {
                tracing::warn!("Ignoring unknown prompt override '{}'", key);
            }
        }
        self
    }

    /// Fills `{{name}}` placeholders in one pass over the template. Values are
    /// inserted verbatim, so a value containing `{{...}}` is never expanded.
    /// Unknown placeholders are left as they are.
    pub fn render(&self, key: &str, vars: &[(&str, &str)]) -> String {
        let template = self.templates.get(key).map(String::as_str).unwrap_or_default();
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let Some(close) = after.find("}}") else {
                rest = &rest[open..];
                break;
            };
            let name = &after[..close];
            match vars.iter().find(|(var, _)| *var == name) {
                Some((_, value)) => out.push_str(value),
                None => out.push_str(&rest[open..open + 2 + close + 2]),
            }
            rest = &after[close + 2..];
        }
        out.push_str(rest);
        out
    }
}
