//! JSON persistence of templates.

use super::model::Template;
use crate::core::errors::{FlowError, FlowResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Maximum length of a generated file stem, in characters.
const MAX_FILE_STEM: usize = 50;

/// Turns an arbitrary name into a portable file stem.
///
/// Characters that are invalid in file names, control characters and spaces
/// become `_`, the result is cut to 50 characters, and blank input becomes
/// `"Unknown"`.
pub fn safe_file_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return "Unknown".to_string();
    }
    let safe: String = trimmed
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | ' ' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_FILE_STEM)
        .collect();
    if safe.trim().is_empty() {
        "Unknown".to_string()
    } else {
        safe
    }
}

/// Result of [`TemplateStore::save`].
#[derive(Debug, Clone)]
pub struct SavedTemplate {
    pub json_path: PathBuf,
    pub image_path: Option<PathBuf>,
    /// The template as written, with `image_path` filled in.
    pub template: Template,
}

/// A directory of `<name>.json` templates with optional `<name>.png` images.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes a template.
    ///
    /// The file stem is `file_name` if given, else the template id, made safe
    /// with [`safe_file_name`]. When `write_image` is given it is called with
    /// the `.png` path first, and the template records the image file name.
    ///
    /// # Errors
    ///
    /// Directory creation, image writing and JSON writing failures are all
    /// returned to the caller.
    pub fn save<F>(
        &self,
        template: &Template,
        file_name: Option<&str>,
        write_image: Option<F>,
    ) -> FlowResult<SavedTemplate>
    where
        F: FnOnce(&Path) -> FlowResult<()>,
    {
        fs::create_dir_all(&self.dir)
            .map_err(|e| FlowError::template_io("save", &self.dir, e))?;

        let stem = match file_name.filter(|s| !s.trim().is_empty()) {
            Some(name) => safe_file_name(name),
            None if !template.template_id.is_empty() => safe_file_name(&template.template_id),
            None => "Template".to_string(),
        };
        let json_path = self.dir.join(format!("{stem}.json"));
        let png_path = self.dir.join(format!("{stem}.png"));

        let mut template = template.clone();
        let image_path = match write_image {
            Some(write) => {
                write(&png_path)?;
                template.image_path = Some(format!("{stem}.png"));
                Some(png_path)
            }
            None => None,
        };

        let text = serde_json::to_string_pretty(&template)
            .map_err(|e| FlowError::template_io("save", &json_path, e))?;
        fs::write(&json_path, text).map_err(|e| FlowError::template_io("save", &json_path, e))?;
        info!("saved template '{}' to {}", template.template_id, json_path.display());

        Ok(SavedTemplate {
            json_path,
            image_path,
            template,
        })
    }

    /// Reads a template file. Relative paths resolve against the store
    /// directory when they do not exist as given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(&self, path: impl AsRef<Path>) -> FlowResult<Template> {
        let path = path.as_ref();
        let resolved = if path.is_relative() && !path.exists() {
            self.dir.join(path)
        } else {
            path.to_path_buf()
        };
        load_template(&resolved)
    }

    /// Loads every `.json` template in the directory, sorted by file name.
    pub fn load_all(&self) -> FlowResult<Vec<Template>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| FlowError::template_io("load", &self.dir, e))?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        debug!("found {} templates in {}", paths.len(), self.dir.display());
        paths.iter().map(|p| load_template(p)).collect()
    }
}

/// Reads a template from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_template(path: &Path) -> FlowResult<Template> {
    let text = fs::read_to_string(path).map_err(|e| FlowError::template_io("load", path, e))?;
    let mut template: Template =
        serde_json::from_str(&text).map_err(|e| FlowError::template_io("load", path, e))?;
    template.assign_default_id();
    Ok(template)
}
