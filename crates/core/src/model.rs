//! Interview data model: setup, questions, turns and feedback.

use crate::resume::ResumeDigest;
use serde::{Deserialize, Serialize};

/// Feedback text used when a question is skipped instead of answered.
pub const SKIPPED_FEEDBACK: &str = "Question skipped.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Difficulty {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(SetupError::UnknownDifficulty(other.to_string())),
        }
    }
}

/// Invalid setup data. This is the only error class that aborts a session
/// before it starts.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SetupError {
    #[error("Job role must be at least 2 characters, got {0:?}")]
    RoleTooShort(String),
    #[error("Unknown difficulty level: {0}")]
    UnknownDifficulty(String),
    #[error("An interview needs at least one question")]
    NoQuestions,
    #[error("Question {0} is blank")]
    BlankQuestion(usize),
}

/// Everything the user chose before the interview starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewSetup {
    pub role: String,
    pub difficulty: Difficulty,
    pub topics: Vec<String>,
    pub question_bank: Vec<String>,
    pub resume: Option<ResumeDigest>,
}

impl InterviewSetup {
    pub fn new(role: impl Into<String>, difficulty: Difficulty) -> Result<Self, SetupError> {
        let role = role.into().trim().to_string();
        if role.chars().count() < 2 {
            return Err(SetupError::RoleTooShort(role));
        }
        Ok(Self {
            role,
            difficulty,
            topics: Vec::new(),
            question_bank: Vec::new(),
            resume: None,
        })
    }

    /// Comma separated topics, blanks dropped.
    pub fn with_topics(mut self, topics: &str) -> Self {
        self.topics = topics
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        self
    }

    /// One question per line, blanks dropped.
    pub fn with_question_bank(mut self, bank: &str) -> Self {
        self.question_bank = bank
            .lines()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .collect();
        self
    }

    pub fn with_resume(mut self, resume: ResumeDigest) -> Self {
        self.resume = Some(resume);
        self
    }
}

/// Setup plus the questions to ask, validated and frozen.
#[derive(Debug, Clone)]
pub struct InterviewPlan {
    setup: InterviewSetup,
    questions: Vec<String>,
}

impl InterviewPlan {
    pub fn new(setup: InterviewSetup, questions: Vec<String>) -> Result<Self, SetupError> {
        if questions.is_empty() {
            return Err(SetupError::NoQuestions);
        }
        if let Some(idx) = questions.iter().position(|q| q.trim().is_empty()) {
            return Err(SetupError::BlankQuestion(idx + 1));
        }
        Ok(Self { setup, questions })
    }

    pub fn setup(&self) -> &InterviewSetup {
        &self.setup
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    pub fn question(&self, idx: usize) -> Option<&str> {
        self.questions.get(idx).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// Feedback attached to one answered (or skipped) question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Feedback {
    Structured {
        good: Vec<String>,
        confident: Vec<String>,
        improvement: Vec<String>,
    },
    Freeform {
        text: String,
    },
    Skipped,
    Error {
        message: String,
    },
}

impl Feedback {
    pub fn neutral() -> Self {
        Feedback::Structured {
            good: Vec::new(),
            confident: Vec::new(),
            improvement: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Feedback::Error { .. })
    }

    /// Text read aloud during the FEEDBACK phase.
    pub fn spoken_text(&self) -> String {
        match self {
            Feedback::Structured {
                good,
                confident,
                improvement,
            } => {
                let mut parts = Vec::new();
                if !good.is_empty() {
                    parts.push(format!("What went well: {}", good.join(". ")));
                }
                if !confident.is_empty() {
                    parts.push(format!("You sounded confident when: {}", confident.join(". ")));
                }
                if !improvement.is_empty() {
                    parts.push(format!("To improve: {}", improvement.join(". ")));
                }
                if parts.is_empty() {
                    "Thanks, let's keep going.".to_string()
                } else {
                    format!("Here's some feedback. {}", parts.join(" "))
                }
            }
            Feedback::Freeform { text } => format!("Here's some feedback. {text}"),
            Feedback::Skipped => "Okay, skipping that one.".to_string(),
            Feedback::Error { message } => message.clone(),
        }
    }

    /// Flat text used in scoring prompts and stored records.
    pub fn summary_text(&self) -> String {
        match self {
            Feedback::Structured {
                good,
                confident,
                improvement,
            } => {
                let section = |label: &str, items: &[String]| {
                    if items.is_empty() {
                        None
                    } else {
                        Some(format!("{label}: {}", items.join("; ")))
                    }
                };
                [
                    section("Good", good),
                    section("Confident", confident),
                    section("Improve", improvement),
                ]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join("\n")
            }
            Feedback::Freeform { text } => text.clone(),
            Feedback::Skipped => SKIPPED_FEEDBACK.to_string(),
            Feedback::Error { message } => format!("[error] {message}"),
        }
    }
}

/// One question/answer/feedback triple. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    question: String,
    response: String,
    feedback: Feedback,
}

impl Turn {
    pub fn answered(question: impl Into<String>, response: impl Into<String>, feedback: Feedback) -> Self {
        Self {
            question: question.into(),
            response: response.into(),
            feedback,
        }
    }

    pub fn skipped(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            response: String::new(),
            feedback: Feedback::Skipped,
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn feedback(&self) -> &Feedback {
        &self.feedback
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.feedback, Feedback::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_rejects_short_role() {
        let result = InterviewSetup::new(" a ", Difficulty::Easy);
        assert_eq!(result.unwrap_err(), SetupError::RoleTooShort("a".to_string()));
    }

    #[test]
    fn test_setup_splits_topics_and_bank() {
        let setup = InterviewSetup::new("Backend Engineer", Difficulty::Medium)
            .unwrap()
            .with_topics("databases, ,caching ")
            .with_question_bank("Q1\n\n  Q2  \n");

        assert_eq!(setup.topics, vec!["databases", "caching"]);
        assert_eq!(setup.question_bank, vec!["Q1", "Q2"]);
    }

    #[test]
    fn test_plan_validation() {
        let setup = InterviewSetup::new("Backend Engineer", Difficulty::Hard).unwrap();
        assert_eq!(
            InterviewPlan::new(setup.clone(), vec![]).unwrap_err(),
            SetupError::NoQuestions
        );
        assert_eq!(
            InterviewPlan::new(setup.clone(), vec!["Q1".into(), "  ".into()]).unwrap_err(),
            SetupError::BlankQuestion(2)
        );
        let plan = InterviewPlan::new(setup, vec!["Q1".into()]).unwrap();
        assert_eq!(plan.question(0), Some("Q1"));
        assert_eq!(plan.question(1), None);
    }

    #[test]
    fn test_difficulty_parsing_is_case_insensitive() {
        assert_eq!("medium".parse::<Difficulty>().unwrap(), Difficulty::Medium);
        assert_eq!("HARD".parse::<Difficulty>().unwrap(), Difficulty::Hard);
        assert!("extreme".parse::<Difficulty>().is_err());
    }

    #[test]
    fn test_feedback_texts() {
        let feedback = Feedback::Structured {
            good: vec!["clear structure".into()],
            confident: vec![],
            improvement: vec!["add an example".into()],
        };
        assert_eq!(
            feedback.spoken_text(),
            "Here's some feedback. What went well: clear structure To improve: add an example"
        );
        assert_eq!(feedback.summary_text(), "Good: clear structure\nImprove: add an example");
        assert_eq!(Turn::skipped("Q").feedback().summary_text(), SKIPPED_FEEDBACK);
        assert_eq!(Feedback::neutral().spoken_text(), "Thanks, let's keep going.");
    }
}
