//! Conventions for the local output directory.
//!
//! Generated files are named by the service as
//! `<prefix>-<prompt>-<model>-...-<seed>.png`. Matching works on those name
//! segments only, so a prompt or model containing `-` never matches, and
//! "latest" means last in directory listing order, not newest on disk. Both
//! heuristics sit behind [`OutputLookup`] so another strategy can replace them.

use std::io;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

pub const IMAGE_EXTENSION: &str = "png";
pub const FILENAME_DELIMITER: char = '-';

/// A generated image written to the output directory. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedImage {
    pub path: PathBuf,
    pub prompt: String,
    pub model: Option<String>,
    pub size_bytes: u64,
    /// Hex SHA-256 of the written bytes.
    pub sha256: String,
}

pub trait OutputLookup {
    /// A previously generated image for `(prompt, model)`, if one exists.
    fn find_existing(&self, output_dir: &Path, prompt: &str, model: &str)
        -> Result<Option<PathBuf>>;

    /// The image the vision critic should look at next.
    fn latest(&self, output_dir: &Path) -> Result<Option<PathBuf>>;
}

/// Lookups driven purely by file names and directory listing order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilenameLookup;

impl OutputLookup for FilenameLookup {
    fn find_existing(
        &self,
        output_dir: &Path,
        prompt: &str,
        model: &str,
    ) -> Result<Option<PathBuf>> {
        for name in list_entry_names(output_dir)? {
            if !has_image_extension(&name) {
                continue;
            }
            let Some((name_prompt, name_model)) = prompt_and_model_tokens(&name) else {
                continue;
            };
            if name_prompt == prompt && name_model == model {
                return Ok(Some(output_dir.join(name)));
            }
        }
        Ok(None)
    }

    fn latest(&self, output_dir: &Path) -> Result<Option<PathBuf>> {
        Ok(list_entry_names(output_dir)?
            .pop()
            .map(|name| output_dir.join(name)))
    }
}

/// Prompt and model segments of a generated file name; `None` when the name
/// has fewer than three segments.
pub fn prompt_and_model_tokens(file_name: &str) -> Option<(&str, &str)> {
    let mut segments = file_name.split(FILENAME_DELIMITER);
    let _prefix = segments.next()?;
    let prompt = segments.next()?;
    let model = segments.next()?;
    Some((prompt, model))
}

/// Final path segment of an image reference, used as the local file name.
pub fn file_name_for_reference(image_ref: &str) -> Option<&str> {
    image_ref
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
}

fn has_image_extension(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value == IMAGE_EXTENSION)
        .unwrap_or(false)
}

/// Entry names in directory iteration order. A missing directory is empty.
fn list_entry_names(dir: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(PipelineError::io(dir, err)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| PipelineError::io(dir, err))?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn empty_directory_has_no_match() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let found = FilenameLookup.find_existing(temp.path(), "prompt", "test_model")?;
        assert_eq!(found, None);
        assert_eq!(FilenameLookup.latest(temp.path())?, None);
        Ok(())
    }

    #[test]
    fn missing_directory_has_no_match() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let missing = temp.path().join("not-created-yet");
        assert_eq!(FilenameLookup.find_existing(&missing, "prompt", "m")?, None);
        assert_eq!(FilenameLookup.latest(&missing)?, None);
        Ok(())
    }

    #[test]
    fn matches_prompt_and_model_segments() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("test-prompt-test_model-123.png"), b"png")?;
        let found = FilenameLookup.find_existing(temp.path(), "prompt", "test_model")?;
        assert_eq!(found, Some(temp.path().join("test-prompt-test_model-123.png")));
        Ok(())
    }

    #[test]
    fn matching_is_exact() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("test-prompt-test_model-123.png"), b"png")?;
        assert_eq!(
            FilenameLookup.find_existing(temp.path(), "Prompt", "test_model")?,
            None
        );
        assert_eq!(
            FilenameLookup.find_existing(temp.path(), "prompt", "test_model2")?,
            None
        );
        Ok(())
    }

    #[test]
    fn other_extensions_and_short_names_are_ignored() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("test-prompt-test_model-123.jpg"), b"jpg")?;
        fs::write(temp.path().join("x-prompt.png"), b"png")?;
        assert_eq!(
            FilenameLookup.find_existing(temp.path(), "prompt", "test_model")?,
            None
        );
        Ok(())
    }

    #[test]
    fn three_segments_qualify() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("x-cat-sdxl.png"), b"png")?;
        // The model segment of a three-segment name still carries the extension.
        assert_eq!(FilenameLookup.find_existing(temp.path(), "cat", "sdxl")?, None);
        assert_eq!(
            FilenameLookup.find_existing(temp.path(), "cat", "sdxl.png")?,
            Some(temp.path().join("x-cat-sdxl.png"))
        );
        Ok(())
    }

    #[test]
    fn prompts_containing_the_delimiter_never_match() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("1-red-car-sdxl-7.png"), b"png")?;
        assert_eq!(FilenameLookup.find_existing(temp.path(), "red-car", "sdxl")?, None);
        Ok(())
    }

    #[test]
    fn latest_is_last_listed_entry() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("a.png"), b"a")?;
        fs::write(temp.path().join("b.png"), b"b")?;
        let listed: Vec<PathBuf> = fs::read_dir(temp.path())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        assert_eq!(FilenameLookup.latest(temp.path())?, listed.last().cloned());
        Ok(())
    }

    #[test]
    fn tokens_split_on_delimiter() {
        assert_eq!(
            prompt_and_model_tokens("test-prompt-test_model-123.png"),
            Some(("prompt", "test_model"))
        );
        assert_eq!(prompt_and_model_tokens("test-prompt"), None);
    }

    #[test]
    fn file_name_is_final_reference_segment() {
        assert_eq!(
            file_name_for_reference("View/local/raw/2024-06-01/0001-cat-sdxl-42.png"),
            Some("0001-cat-sdxl-42.png")
        );
        assert_eq!(file_name_for_reference("image.png"), Some("image.png"));
        assert_eq!(file_name_for_reference("View/local/"), None);
        assert_eq!(file_name_for_reference("View/.."), None);
    }
}
