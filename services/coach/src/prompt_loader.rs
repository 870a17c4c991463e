use anyhow::{Context, Result};
use coach_core::prompts::PromptSet;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Reads every `.md` file in `dir_path`, keyed by file stem. Surrounding
/// whitespace is trimmed from each template.
pub fn load_prompts(dir_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read prompts directory: {}", dir_path.display()))?
    {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("md") {
            continue;
        }

        let key = path
            .file_stem()
            .and_then(|s| s.to_str())
            .context("Could not get file stem for prompt file")?
            .to_string();
        let template = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;

        tracing::debug!("Loaded prompt override '{}' from {}", key, path.display());
        prompts.insert(key, template.trim().to_string());
    }

    Ok(prompts)
}

/// Built-in prompts, with overrides from `dir` when one is configured.
pub fn load_prompt_set(dir: Option<&Path>) -> Result<PromptSet> {
    let prompts = PromptSet::builtin();
    match dir {
        None => Ok(prompts),
        Some(dir) => {
            let overrides = load_prompts(dir)?;
            tracing::info!("Loaded {} prompt overrides from {}", overrides.len(), dir.display());
            Ok(prompts.with_overrides(overrides))
        }
    }
}
