use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::PromptConfig;

const BUILT_IN_PROMPTS: &str = include_str!("../../prompts/default.toml");

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptSource {
    BuiltIn,
    File(PathBuf),
}

impl PromptSource {
    pub fn is_builtin(&self) -> bool {
        matches!(self, Self::BuiltIn)
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::BuiltIn => None,
            Self::File(path) => Some(path.as_path()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PromptTemplate {
    key: String,
    template: String,
    segments: Vec<TemplateSegment>,
    arity: usize,
    description: Option<String>,
    source: PromptSource,
}

impl PromptTemplate {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Number of positional arguments the template consumes.
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn source(&self) -> &PromptSource {
        &self.source
    }

    pub fn render<S: AsRef<str>>(&self, arguments: &[S]) -> Result<String, PromptError> {
        if arguments.len() < self.arity {
            return Err(PromptError::MissingArgument {
                key: self.key.clone(),
                index: arguments.len(),
                expected: self.arity,
            });
        }

        let mut output = String::with_capacity(self.template.len());
        for segment in &self.segments {
            match segment {
                TemplateSegment::Literal(text) => output.push_str(text),
                TemplateSegment::Slot(index) => output.push_str(arguments[*index].as_ref()),
            }
        }
        Ok(output)
    }

    fn parse(
        key: String,
        template: String,
        description: Option<String>,
        source: PromptSource,
    ) -> Self {
        let segments = parse_template(&template);
        let arity = segments
            .iter()
            .filter_map(|segment| match segment {
                TemplateSegment::Slot(index) => Some(index + 1),
                TemplateSegment::Literal(_) => None,
            })
            .max()
            .unwrap_or(0);

        Self {
            key,
            template,
            segments,
            arity,
            description,
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt template `{0}` not found")]
    NotFound(String),
    #[error("prompt `{key}` expects {expected} arguments but only {index} were given")]
    MissingArgument {
        key: String,
        index: usize,
        expected: usize,
    },
    #[error("failed to read prompt file `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse built-in prompt definitions: {0}")]
    ParseBuiltIn(toml::de::Error),
    #[error("failed to parse prompt file `{path}` as TOML: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to parse prompt file `{path}` as YAML: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Prompt templates keyed by identifier. Immutable once loaded.
#[derive(Debug)]
pub struct PromptRegistry {
    prompts: BTreeMap<String, PromptTemplate>,
    directories: Vec<PathBuf>,
}

impl PromptRegistry {
    pub fn new() -> Result<Self, PromptError> {
        Self::with_directories::<PathBuf>(&[])
    }

    pub fn from_prompt_config(config: &PromptConfig) -> Result<Self, PromptError> {
        Self::with_directories(&config.directories)
    }

    pub fn with_directories<P: AsRef<Path>>(directories: &[P]) -> Result<Self, PromptError> {
        let directories: Vec<PathBuf> = directories
            .iter()
            .map(|p| p.as_ref().to_path_buf())
            .collect();

        let mut prompts = BTreeMap::new();
        for template in parse_document(BUILT_IN_PROMPTS, PromptSource::BuiltIn)? {
            prompts.insert(template.key().to_string(), template);
        }
        for dir in &directories {
            load_directory(dir, &mut prompts)?;
        }

        Ok(Self {
            prompts,
            directories,
        })
    }

    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    pub fn get(&self, key: &str) -> Option<&PromptTemplate> {
        self.prompts.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.prompts.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.prompts.keys().map(|k| k.as_str())
    }

    /// Raw template text with its substitution slots intact.
    pub fn template(&self, key: &str) -> Result<&str, PromptError> {
        self.lookup(key).map(PromptTemplate::template)
    }

    pub fn render<S: AsRef<str>>(&self, key: &str, arguments: &[S]) -> Result<String, PromptError> {
        self.lookup(key)?.render(arguments)
    }

    /// Renders a template that takes no arguments.
    pub fn render_plain(&self, key: &str) -> Result<String, PromptError> {
        self.lookup(key)?.render::<&str>(&[])
    }

    fn lookup(&self, key: &str) -> Result<&PromptTemplate, PromptError> {
        self.get(key)
            .ok_or_else(|| PromptError::NotFound(key.to_string()))
    }
}

fn load_directory(
    dir: &Path,
    prompts: &mut BTreeMap<String, PromptTemplate>,
) -> Result<(), PromptError> {
    if !dir.is_dir() {
        return Ok(());
    }

    let mut files = Vec::new();
    let read_dir = fs::read_dir(dir).map_err(|source| PromptError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in read_dir {
        let entry = entry.map_err(|source| PromptError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }

    files.sort();

    for path in files {
        let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
            continue;
        };
        let ext = ext.to_ascii_lowercase();
        if !matches!(ext.as_str(), "txt" | "toml" | "yaml" | "yml") {
            continue;
        }

        let contents = fs::read_to_string(&path).map_err(|source| PromptError::Io {
            path: path.clone(),
            source,
        })?;
        let source = PromptSource::File(path.clone());

        match ext.as_str() {
            "txt" => {
                let Some(key) = path.file_stem().and_then(|stem| stem.to_str()) else {
                    continue;
                };
                let template = PromptTemplate::parse(key.to_string(), contents, None, source);
                prompts.insert(template.key().to_string(), template);
            }
            "toml" => {
                let templates = parse_document(&contents, source).map_err(|err| match err {
                    PromptError::ParseBuiltIn(source) => PromptError::ParseToml {
                        path: path.clone(),
                        source,
                    },
                    other => other,
                })?;
                for template in templates {
                    prompts.insert(template.key().to_string(), template);
                }
            }
            _ => {
                let document: PromptDocument =
                    serde_yaml::from_str(&contents).map_err(|source| PromptError::ParseYaml {
                        path: path.clone(),
                        source,
                    })?;
                for (key, raw) in document.prompts {
                    let template =
                        PromptTemplate::parse(key.clone(), raw.template, raw.description, source.clone());
                    prompts.insert(key, template);
                }
            }
        }
    }

    Ok(())
}

fn parse_document(source: &str, origin: PromptSource) -> Result<Vec<PromptTemplate>, PromptError> {
    let document: PromptDocument = toml::from_str(source).map_err(PromptError::ParseBuiltIn)?;
    Ok(document
        .prompts
        .into_iter()
        .map(|(key, raw)| PromptTemplate::parse(key, raw.template, raw.description, origin.clone()))
        .collect())
}

#[derive(Debug, Deserialize)]
struct PromptDocument {
    #[serde(default)]
    prompts: BTreeMap<String, RawPrompt>,
}

#[derive(Debug, Deserialize)]
struct RawPrompt {
    #[serde(alias = "text")]
    template: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum TemplateSegment {
    Literal(String),
    Slot(usize),
}

fn parse_template(template: &str) -> Vec<TemplateSegment> {
    let mut segments = Vec::new();
    let mut buffer = String::new();
    let mut next_auto = 0usize;
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' => {
                if matches!(chars.peek(), Some('{')) {
                    chars.next();
                    buffer.push('{');
                    continue;
                }

                let mut inner = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == '}' {
                        closed = true;
                        break;
                    }
                    inner.push(next);
                }

                let trimmed = inner.trim();
                let slot = if !closed {
                    None
                } else if trimmed.is_empty() {
                    let index = next_auto;
                    next_auto += 1;
                    Some(index)
                } else {
                    trimmed.parse::<usize>().ok()
                };

                match slot {
                    Some(index) => {
                        if !buffer.is_empty() {
                            segments.push(TemplateSegment::Literal(std::mem::take(&mut buffer)));
                        }
                        segments.push(TemplateSegment::Slot(index));
                    }
                    None => {
                        buffer.push('{');
                        buffer.push_str(&inner);
                        if closed {
                            buffer.push('}');
                        }
                    }
                }
            }
            '}' => {
                if matches!(chars.peek(), Some('}')) {
                    chars.next();
                }
                buffer.push('}');
            }
            _ => buffer.push(ch),
        }
    }

    if !buffer.is_empty() {
        segments.push(TemplateSegment::Literal(buffer));
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn built_ins_cover_every_step() {
        let registry = PromptRegistry::new().expect("registry");
        for key in [
            "find_book_title_system_message",
            "find_book_description_prompt",
            "rank_book_titles",
            "write_toc_system_message",
            "write_toc_firstdraft",
            "write_toc_review_draft",
            "write_chaptersummary_system_message",
            "write_chapter_summary",
            "write_chapteroutline_system_message",
            "write_chapteroutline",
            "write_chapters_system_message",
            "write_chapter",
            "write_chapter_line",
            "write_plot_system_message",
            "write_plot_prompt",
            "write_refined_plot",
        ] {
            assert!(registry.contains(key), "missing built-in prompt {key}");
        }
        assert_eq!(registry.get("write_chapter_summary").unwrap().arity(), 3);
        assert_eq!(registry.get("rank_book_titles").unwrap().arity(), 0);
    }

    #[test]
    fn renders_positional_slots_in_order() {
        let registry = PromptRegistry::new().expect("registry");
        let output = registry
            .render("write_toc_firstdraft", &["Red Dust", "A lone astronaut stranded on Mars."])
            .expect("rendered");
        assert!(output.contains("\"Red Dust\""));
        assert!(output.contains("A lone astronaut stranded on Mars."));
    }

    #[test]
    fn explicit_indices_and_escaped_braces() {
        let template = PromptTemplate::parse(
            "t".into(),
            "{1} then {0} {{literal}} {name}".into(),
            None,
            PromptSource::BuiltIn,
        );
        assert_eq!(template.arity(), 2);
        assert_eq!(
            template.render(&["a", "b"]).unwrap(),
            "b then a {literal} {name}"
        );
    }

    #[test]
    fn missing_argument_fails() {
        let registry = PromptRegistry::new().expect("registry");
        let error = registry
            .render("write_chapter_summary", &["title only"])
            .expect_err("missing args");
        match error {
            PromptError::MissingArgument {
                index, expected, ..
            } => {
                assert_eq!(index, 1);
                assert_eq!(expected, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_template_is_not_found() {
        let registry = PromptRegistry::new().expect("registry");
        assert!(matches!(
            registry.template("no_such_prompt"),
            Err(PromptError::NotFound(key)) if key == "no_such_prompt"
        ));
    }

    #[test]
    fn text_files_override_built_ins() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("rank_book_titles.txt"), "Pick the best one.").unwrap();
        fs::write(dir.path().join("extra.txt"), "Extra {} prompt").unwrap();

        let registry = PromptRegistry::with_directories(&[dir.path()]).unwrap();
        assert_eq!(registry.template("rank_book_titles").unwrap(), "Pick the best one.");
        assert_eq!(registry.render("extra", &["custom"]).unwrap(), "Extra custom prompt");
        assert!(registry
            .get("extra")
            .unwrap()
            .source()
            .as_path()
            .is_some());
    }

    #[test]
    fn toml_and_yaml_documents_load() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("a.toml"),
            "[prompts.write_chapter_line]\ntemplate = \"Line: {}\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("b.yaml"),
            "prompts:\n  rank_book_titles:\n    text: \"Rank them.\"\n",
        )
        .unwrap();

        let registry = PromptRegistry::with_directories(&[dir.path()]).unwrap();
        assert_eq!(registry.render("write_chapter_line", &["x"]).unwrap(), "Line: x");
        assert_eq!(registry.template("rank_book_titles").unwrap(), "Rank them.");
    }

    #[test]
    fn missing_directory_is_ignored() {
        let registry = PromptRegistry::with_directories(&["/nonexistent/prompt_templates"]).unwrap();
        assert!(registry.contains("write_chapter"));
    }
}
