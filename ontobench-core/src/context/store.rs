//! File-backed ontology context store.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extensions tried in raw mode, in order.
pub const RAW_EXTENSIONS: [&str; 4] = ["ttl", "owl", "rdf", "nt"];
/// Extension used in verbalized mode.
pub const VERBALIZED_EXTENSION: &str = "json";
const VERBALIZED_EXTENSIONS: [&str; 1] = [VERBALIZED_EXTENSION];

/// What kind of ontology context a prompt receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// Serialized ontology text (Turtle and friends)
    #[serde(alias = "ttl")]
    Raw,
    /// Pre-verbalized structured JSON document
    #[serde(alias = "json")]
    Verbalized,
}

impl ContextMode {
    /// Primary file extension for this mode.
    pub fn primary_extension(self) -> &'static str {
        match self {
            Self::Raw => RAW_EXTENSIONS[0],
            Self::Verbalized => VERBALIZED_EXTENSION,
        }
    }

    /// Extensions searched for this mode, in order.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Raw => &RAW_EXTENSIONS,
            Self::Verbalized => &VERBALIZED_EXTENSIONS,
        }
    }
}

impl std::fmt::Display for ContextMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::Verbalized => write!(f, "verbalized"),
        }
    }
}

/// Placeholder substituted for a missing context resource.
pub fn missing_placeholder(mode: ContextMode) -> String {
    format!(
        "[ERROR: .{} file not found]",
        mode.primary_extension().to_uppercase()
    )
}

/// Resolves an entity to the context text placed in its prompts.
///
/// Implementations must not fail: a missing resource resolves to
/// [`missing_placeholder`].
pub trait OntologyContextStore: Send + Sync {
    fn resolve(&self, entity_id: &str, mode: ContextMode) -> String;

    /// Whether the backing location exists; checked before dispatch.
    fn exists(&self) -> bool {
        true
    }
}

/// Store reading `{base_path}/{entity_id}.{ext}` files.
#[derive(Debug, Clone)]
pub struct FileContextStore {
    base_path: PathBuf,
}

impl FileContextStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Create from a user-supplied path, expanding a leading `~`.
    pub fn from_user_path(path: &str) -> Self {
        let expanded = shellexpand::tilde(path);
        Self::new(PathBuf::from(expanded.as_ref()))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Path that would back `entity_id` with the given extension.
    pub fn path_for(&self, entity_id: &str, extension: &str) -> PathBuf {
        self.base_path.join(format!("{}.{}", entity_id, extension))
    }

    fn read_raw(&self, entity_id: &str) -> Option<String> {
        RAW_EXTENSIONS.iter().find_map(|ext| {
            let path = self.path_for(entity_id, ext);
            fs::read_to_string(&path).ok().inspect(|_| {
                debug!(entity = entity_id, path = %path.display(), "resolved raw context");
            })
        })
    }

    fn read_verbalized(&self, entity_id: &str) -> Option<String> {
        let path = self.path_for(entity_id, VERBALIZED_EXTENSION);
        let text = fs::read_to_string(&path).ok()?;
        let pretty = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|value| serde_json::to_string_pretty(&value).ok());
        Some(pretty.unwrap_or(text))
    }
}

impl OntologyContextStore for FileContextStore {
    fn resolve(&self, entity_id: &str, mode: ContextMode) -> String {
        let resolved = match mode {
            ContextMode::Raw => self.read_raw(entity_id),
            ContextMode::Verbalized => self.read_verbalized(entity_id),
        };
        resolved.unwrap_or_else(|| missing_placeholder(mode))
    }

    fn exists(&self) -> bool {
        self.base_path.is_dir()
    }
}
