use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub title: String,
    pub company: String,
    pub duration: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Education {
    pub degree: String,
    pub institution: String,
    #[serde(default)]
    pub year: Option<String>,
}

/// Structured summary of a parsed resume. Parsing itself happens elsewhere;
/// this crate only consumes the digest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeDigest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub job_role: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub experience: Vec<Experience>,
    #[serde(default)]
    pub education: Vec<Education>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl ResumeDigest {
    pub fn has_content(&self) -> bool {
        !self.skills.is_empty() || !self.experience.is_empty() || !self.education.is_empty()
    }

    /// Resume block embedded in the question-generation prompt.
    pub fn prompt_context(&self, fallback_role: &str) -> String {
        if !self.has_content() {
            return format!(
                "No detailed resume information available. Generate general but relevant questions for the {fallback_role} role."
            );
        }

        let mut lines = vec![
            "CANDIDATE RESUME INFORMATION:".to_string(),
            format!("Job Role: {}", self.job_role.as_deref().unwrap_or(fallback_role)),
        ];
        if !self.skills.is_empty() {
            lines.push(format!("Skills: {}", self.skills.join(", ")));
        }
        if let Some(summary) = &self.summary {
            lines.push(format!("Professional Summary: {summary}"));
        }
        if !self.experience.is_empty() {
            lines.push("Experience:".to_string());
            for exp in &self.experience {
                let mut line = format!("- {} at {} ({})", exp.title, exp.company, exp.duration);
                if let Some(desc) = &exp.description {
                    line.push_str(&format!(" - {desc}"));
                }
                lines.push(line);
            }
        }
        if !self.education.is_empty() {
            lines.push("Education:".to_string());
            for edu in &self.education {
                let mut line = format!("- {} from {}", edu.degree, edu.institution);
                if let Some(year) = &edu.year {
                    line.push_str(&format!(" ({year})"));
                }
                lines.push(line);
            }
        }
        lines.push(
            "Use the actual technologies, companies and experiences listed above. Never use placeholder text like \"[Specific Technology]\"."
                .to_string(),
        );
        lines.join("\n")
    }
}

const SKILL_ROLES: &[(&str, &[&str])] = &[
    ("react", &["Frontend Developer", "React Developer"]),
    ("vue", &["Frontend Developer", "Vue.js Developer"]),
    ("angular", &["Frontend Developer", "Angular Developer"]),
    ("javascript", &["Frontend Developer", "Full Stack Developer"]),
    ("typescript", &["Frontend Developer", "Full Stack Developer"]),
    ("html", &["Frontend Developer", "Web Developer"]),
    ("css", &["Frontend Developer", "Web Developer"]),
    ("next.js", &["Frontend Developer", "Full Stack Developer"]),
    ("node.js", &["Backend Developer", "Full Stack Developer"]),
    ("express", &["Backend Developer", "Full Stack Developer"]),
    ("python", &["Backend Developer", "Data Analyst", "ML Engineer"]),
    ("django", &["Backend Developer", "Python Developer"]),
    ("flask", &["Backend Developer", "Python Developer"]),
    ("fastapi", &["Backend Developer", "Python Developer"]),
    ("java", &["Backend Developer", "Java Developer"]),
    ("spring", &["Backend Developer", "Java Developer"]),
    ("c#", &["Backend Developer", ".NET Developer"]),
    (".net", &["Backend Developer", ".NET Developer"]),
    ("go", &["Backend Developer", "Go Developer"]),
    ("rust", &["Backend Developer", "Systems Developer"]),
    ("c++", &["Systems Developer"]),
    ("postgresql", &["Backend Developer", "Database Developer"]),
    ("mysql", &["Backend Developer", "Database Developer"]),
    ("mongodb", &["Backend Developer", "Database Developer"]),
    ("redis", &["Backend Developer", "DevOps Engineer"]),
    ("aws", &["Cloud Engineer", "DevOps Engineer"]),
    ("azure", &["Cloud Engineer", "DevOps Engineer"]),
    ("gcp", &["Cloud Engineer", "DevOps Engineer"]),
    ("docker", &["DevOps Engineer", "Backend Developer"]),
    ("kubernetes", &["DevOps Engineer", "Cloud Engineer"]),
    ("terraform", &["DevOps Engineer", "Cloud Engineer"]),
    ("pandas", &["Data Analyst", "Data Scientist"]),
    ("sql", &["Data Analyst", "Database Developer"]),
    ("tensorflow", &["ML Engineer", "Data Scientist"]),
    ("pytorch", &["ML Engineer", "Data Scientist"]),
    ("swift", &["iOS Developer", "Mobile Developer"]),
    ("kotlin", &["Android Developer", "Mobile Developer"]),
    ("flutter", &["Mobile Developer"]),
    ("react native", &["Mobile Developer", "React Developer"]),
];

/// Ranks likely job roles for a skill list, most hits first, ties by name.
pub fn infer_roles(skills: &[String]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for skill in skills {
        let skill = skill.trim().to_lowercase();
        if let Some((_, roles)) = SKILL_ROLES.iter().find(|(name, _)| *name == skill) {
            for role in *roles {
                *counts.entry(*role).or_default() += 1;
            }
        }
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().map(|(role, _)| role.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_roles_ranks_by_hits() {
        let skills = vec!["Rust".to_string(), "Docker".to_string(), "PostgreSQL".to_string()];
        let roles = infer_roles(&skills);
        assert_eq!(roles[0], "Backend Developer");
        assert!(roles.contains(&"DevOps Engineer".to_string()));
    }

    #[test]
    fn test_infer_roles_unknown_skills() {
        assert!(infer_roles(&["Knitting".to_string()]).is_empty());
    }

    #[test]
    fn test_prompt_context_without_content() {
        let digest = ResumeDigest::default();
        assert!(digest.prompt_context("SRE").contains("general but relevant questions for the SRE role"));
    }

    #[test]
    fn test_prompt_context_lists_experience() {
        let digest = ResumeDigest {
            skills: vec!["Rust".into()],
            experience: vec![Experience {
                title: "Engineer".into(),
                company: "Acme".into(),
                duration: "2 years".into(),
                description: Some("built queues".into()),
            }],
            ..Default::default()
        };
        let ctx = digest.prompt_context("Backend Engineer");
        assert!(ctx.contains("Job Role: Backend Engineer"));
        assert!(ctx.contains("Skills: Rust"));
        assert!(ctx.contains("- Engineer at Acme (2 years) - built queues"));
    }

    #[test]
    fn test_digest_deserializes_with_missing_fields() {
        let digest: ResumeDigest = serde_json::from_str(r#"{"skills": ["Go"]}"#).unwrap();
        assert_eq!(digest.skills, vec!["Go"]);
        assert!(digest.experience.is_empty());
    }
}
