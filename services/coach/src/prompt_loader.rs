use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Reads every `*.md` file in `dir_path`, keyed by file stem.
///
/// Blank files are skipped so they fall back to the built-in prompt.
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
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;
        let content = content.trim();
        if content.is_empty() {
            tracing::warn!("Prompt file {} is empty, ignoring it", path.display());
            continue;
        }
        prompts.insert(key, content.to_string());
    }

    Ok(prompts)
}

/// Keys in `prompts` that nothing will ever look up, sorted.
pub fn unknown_keys(prompts: &HashMap<String, String>, known: &[&str]) -> Vec<String> {
    let mut unknown: Vec<String> = prompts
        .keys()
        .filter(|key| !known.contains(&key.as_str()))
        .cloned()
        .collect();
    unknown.sort();
    unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_prompts_successfully() -> Result<()> {
        let dir = tempdir()?;
        let dir_path = dir.path();

        // `{{topic}}` writes a literal `{topic}` placeholder.
        let mut qa = File::create(dir_path.join("qa.md"))?;
        writeln!(qa, "Answer questions about {{topic}}.")?;

        let mut feedback = File::create(dir_path.join("feedback.md"))?;
        writeln!(feedback, "Review the {{session_type}}.")?;

        File::create(dir_path.join("mock.md"))?;

        let mut ignored = File::create(dir_path.join("notes.txt"))?;
        writeln!(ignored, "not a prompt")?;
        fs::create_dir(dir_path.join("drafts.md"))?;

        let prompts = load_prompts(dir_path)?;

        assert_eq!(prompts.len(), 2, "Only non-empty .md files are loaded");
        assert_eq!(prompts.get("qa").unwrap(), "Answer questions about {topic}.");
        assert_eq!(prompts.get("feedback").unwrap(), "Review the {session_type}.");
        assert!(prompts.get("mock").is_none(), "Blank prompts are skipped");
        assert!(prompts.get("notes").is_none());

        Ok(())
    }

    #[test]
    fn test_load_prompts_from_nonexistent_dir() {
        let result = load_prompts(Path::new("nonexistent_dir_for_testing_prompts"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_prompts_from_empty_dir() -> Result<()> {
        let dir = tempdir()?;
        let prompts = load_prompts(dir.path())?;
        assert!(prompts.is_empty());
        Ok(())
    }

    #[test]
    fn test_unknown_keys_are_reported() {
        let prompts = HashMap::from([
            ("qa".to_string(), "x".to_string()),
            ("reviewer".to_string(), "y".to_string()),
            ("interview".to_string(), "z".to_string()),
        ]);
        assert_eq!(
            unknown_keys(&prompts, &["qa", "mock"]),
            vec!["interview".to_string(), "reviewer".to_string()]
        );
    }
}
