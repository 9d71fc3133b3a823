//! One-shot context preloading ahead of dispatch.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{info, warn};

use super::store::{missing_placeholder, ContextMode, OntologyContextStore};
use crate::question::QuestionRow;

/// Resolve every distinct root entity once.
///
/// Keeps file I/O off the concurrent path. Missing entities map to the
/// mode's placeholder and are logged, never raised.
pub fn preload_contexts<S>(
    store: &S,
    rows: &[QuestionRow],
    mode: ContextMode,
) -> HashMap<String, String>
where
    S: OntologyContextStore + ?Sized,
{
    let placeholder = missing_placeholder(mode);
    let mut contexts: HashMap<String, String> = HashMap::new();

    for row in rows {
        if contexts.contains_key(&row.root_entity) {
            continue;
        }
        let text = store.resolve(&row.root_entity, mode);
        if text == placeholder {
            warn!(entity = %row.root_entity, %mode, "ontology context not found");
        }
        contexts.insert(row.root_entity.clone(), text);
    }

    info!(
        entities = contexts.len(),
        rows = rows.len(),
        "pre-loaded ontology contexts"
    );
    contexts
}

/// Entity ids that have a backing file for `mode` under `base_path`.
pub fn available_entities(base_path: &Path, mode: ContextMode) -> BTreeSet<String> {
    let mut entities = BTreeSet::new();
    for ext in mode.extensions() {
        let pattern = base_path.join(format!("*.{}", ext));
        if let Ok(entries) = glob::glob(pattern.to_str().unwrap_or("")) {
            for entry in entries.flatten() {
                if let Some(stem) = entry.file_stem().and_then(|s| s.to_str()) {
                    entities.insert(stem.to_string());
                }
            }
        }
    }
    entities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::AnswerType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        calls: AtomicUsize,
    }

    impl OntologyContextStore for CountingStore {
        fn resolve(&self, entity_id: &str, mode: ContextMode) -> String {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if entity_id == "missing" {
                missing_placeholder(mode)
            } else {
                format!("context for {}", entity_id)
            }
        }
    }

    fn row(index: usize, entity: &str) -> QuestionRow {
        QuestionRow::new(index, format!("q{}", index), entity, AnswerType::Binary)
    }

    #[test]
    fn test_preload_resolves_each_entity_once() {
        let store = CountingStore {
            calls: AtomicUsize::new(0),
        };
        let rows = vec![row(0, "alice"), row(1, "alice"), row(2, "bob"), row(3, "missing")];

        let contexts = preload_contexts(&store, &rows, ContextMode::Raw);

        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(contexts.len(), 3);
        assert_eq!(contexts["alice"], "context for alice");
        assert_eq!(contexts["missing"], "[ERROR: .TTL file not found]");
    }

    #[test]
    fn test_available_entities_by_mode() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        std::fs::write(dir.path().join("alice.ttl"), "").unwrap();
        std::fs::write(dir.path().join("bob.owl"), "").unwrap();
        std::fs::write(dir.path().join("carol.json"), "{}").unwrap();

        let raw = available_entities(dir.path(), ContextMode::Raw);
        assert_eq!(
            raw.into_iter().collect::<Vec<_>>(),
            vec!["alice".to_string(), "bob".to_string()]
        );

        let verbalized = available_entities(dir.path(), ContextMode::Verbalized);
        assert_eq!(verbalized.into_iter().collect::<Vec<_>>(), vec!["carol".to_string()]);
    }
}
