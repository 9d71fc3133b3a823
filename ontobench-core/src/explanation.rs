//! Reasoning-explanation lookup.
//!
//! Explanation files map triple keys (`subject|predicate|object`) to lists
//! of explanations, each a list of lines. Lines starting with `TAG:` name
//! the inference rule used; the rest are the reasoning steps. Files come in
//! a flat shape (`{triple: entry}`) and a grouped shape
//! (`{entity: {triple: entry}}`); both load into the same index.

use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::question::{ANSWER_COLUMN, EXPLANATION_COLUMN, ROOT_ENTITY_COLUMN};
use crate::table::ResultTable;

/// Prefix of a rule-tag line.
pub const TAG_PREFIX: &str = "TAG:";
/// Predicate assumed when the question row has none.
pub const DEFAULT_PREDICATE: &str = "rdf:type";
/// Column holding the predicate of the questioned triple.
pub const PREDICATE_COLUMN: &str = "Predicate";
/// Column recording whether an explanation was found.
pub const EXPLANATION_FOUND_COLUMN: &str = "explanation_found";
/// Column recording the entry's explanation count.
pub const EXPLANATION_COMPLEXITY_COLUMN: &str = "explanation_complexity";
/// Context used for rows without a matching explanation.
pub const NO_EXPLANATION: &str = "No specific explanation available for this reasoning step.";

/// Explanations recorded for one triple.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExplanationEntry {
    pub explanations: Vec<Vec<String>>,
    pub explanation_count: u64,
    pub sparql_queries: Vec<String>,
}

impl ExplanationEntry {
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let explanations = object.get("explanations")?.as_array()?;

        let explanations: Vec<Vec<String>> = explanations
            .iter()
            .filter_map(Value::as_array)
            .map(|lines| {
                lines
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .collect();
        let explanation_count = object
            .get("explanationCount")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let sparql_queries = object
            .get("sparqlQueries")
            .and_then(Value::as_array)
            .map(|queries| {
                queries
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            explanations,
            explanation_count,
            sparql_queries,
        })
    }

    /// Lengths of the non-empty rule tags across all explanations.
    pub fn tag_lengths(&self) -> Vec<usize> {
        self.explanations
            .iter()
            .flatten()
            .filter_map(|line| line.strip_prefix(TAG_PREFIX))
            .map(|tag| tag.trim().chars().count())
            .filter(|len| *len > 0)
            .collect()
    }
}

/// Number of rule-tag lines in one explanation.
pub fn tag_count(explanation: &[String]) -> usize {
    explanation
        .iter()
        .filter(|line| line.starts_with(TAG_PREFIX))
        .count()
}

/// Pick the explanation with the most rule tags and render its steps.
///
/// Ties keep the first explanation. Non-tag lines are joined with `". "`.
pub fn select_best_explanation(explanations: &[Vec<String>]) -> String {
    if explanations.is_empty() {
        return "No explanation available".to_string();
    }

    let mut best: Option<&Vec<String>> = None;
    let mut max_tags = 0;
    for explanation in explanations {
        let tags = tag_count(explanation);
        if tags > max_tags {
            max_tags = tags;
            best = Some(explanation);
        }
    }

    let rendered = best
        .map(|explanation| {
            explanation
                .iter()
                .filter(|line| !line.starts_with(TAG_PREFIX))
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(". ")
        })
        .unwrap_or_default();

    if rendered.is_empty() {
        "Reasoning available but details unclear".to_string()
    } else {
        rendered
    }
}

/// Key used by explanation files.
pub fn triple_key(subject: &str, predicate: &str, object: &str) -> String {
    format!("{}|{}|{}", subject, predicate, object)
}

/// Explanation entries keyed by triple.
#[derive(Debug, Clone, Default)]
pub struct ExplanationIndex {
    entries: HashMap<String, ExplanationEntry>,
}

impl ExplanationIndex {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "failed to read explanations '{}': {}",
                path.display(),
                e
            ))
        })?;
        let index = Self::from_json_str(&text)?;
        info!(path = %path.display(), entries = index.len(), "loaded explanations");
        Ok(index)
    }

    /// Parse either file shape.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(text)?;
        let object = root
            .as_object()
            .ok_or_else(|| Error::validation("explanations file must be a JSON object"))?;

        let mut entries = HashMap::new();
        for (key, value) in object {
            if let Some(entry) = ExplanationEntry::from_value(value) {
                entries.insert(key.clone(), entry);
                continue;
            }
            // Grouped shape: one more level of nesting per entity
            if let Some(group) = value.as_object() {
                for (triple, inner) in group {
                    if let Some(entry) = ExplanationEntry::from_value(inner) {
                        entries.insert(triple.clone(), entry);
                    }
                }
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ExplanationEntry> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &ExplanationEntry)> {
        self.entries.iter()
    }

    /// Find the entry for a triple, trying the reversed triple second.
    pub fn lookup(&self, subject: &str, predicate: &str, object: &str) -> Option<&ExplanationEntry> {
        self.get(&triple_key(subject, predicate, object))
            .or_else(|| self.get(&triple_key(object, predicate, subject)))
    }

    /// Fill the explanation columns of every row. Returns the number found.
    pub fn annotate_table(&self, table: &mut ResultTable) -> Result<usize> {
        let mut found = 0;
        for index in table.indices() {
            let cell = |column: &str| table.get(index, column).unwrap_or_default().trim().to_string();
            let subject = cell(ROOT_ENTITY_COLUMN);
            let answer = cell(ANSWER_COLUMN);
            let predicate = Some(cell(PREDICATE_COLUMN))
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_PREDICATE.to_string());

            let (context, was_found, complexity) = match self.lookup(&subject, &predicate, &answer) {
                Some(entry) => {
                    found += 1;
                    (
                        select_best_explanation(&entry.explanations),
                        true,
                        entry.explanation_count,
                    )
                }
                None => {
                    debug!(row = index, subject = %subject, "no explanation for row");
                    (NO_EXPLANATION.to_string(), false, 0)
                }
            };

            table.set(index, EXPLANATION_COLUMN, context)?;
            table.set(index, EXPLANATION_FOUND_COLUMN, was_found.to_string())?;
            table.set(index, EXPLANATION_COMPLEXITY_COLUMN, complexity.to_string())?;
        }
        info!(found, total = table.len(), "explanation context added");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    const FLAT: &str = r#"{
        "alice|rdf:type|Mother": {
            "explanations": [
                ["alice hasChild bob", "TAG: D"],
                ["alice a Woman", "alice hasChild bob", "TAG: D", "TAG: EQ"]
            ],
            "explanationCount": 2
        }
    }"#;

    #[test]
    fn test_select_best_explanation_most_tags() {
        let explanations = vec![
            lines(&["a step", "TAG: R"]),
            lines(&["first", "second", "TAG: R", "TAG: S"]),
        ];
        assert_eq!(select_best_explanation(&explanations), "first. second");
    }

    #[test]
    fn test_select_best_explanation_edge_cases() {
        assert_eq!(select_best_explanation(&[]), "No explanation available");
        assert_eq!(
            select_best_explanation(&[lines(&["no tags here"])]),
            "Reasoning available but details unclear"
        );
        assert_eq!(
            select_best_explanation(&[lines(&["TAG: only"])]),
            "Reasoning available but details unclear"
        );
    }

    #[test]
    fn test_flat_index_lookup_and_reverse() {
        let index = ExplanationIndex::from_json_str(FLAT).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.lookup("alice", "rdf:type", "Mother").is_some());
        assert!(index.lookup("Mother", "rdf:type", "alice").is_some());
        assert!(index.lookup("bob", "rdf:type", "Mother").is_none());
    }

    #[test]
    fn test_grouped_index() {
        let grouped = r#"{
            "alice": {
                "alice|rdf:type|Mother": {
                    "explanations": [["TAG: DR", "x"]],
                    "sparqlQueries": ["ASK { :alice a :Mother }"]
                }
            }
        }"#;
        let index = ExplanationIndex::from_json_str(grouped).unwrap();
        let entry = index.get("alice|rdf:type|Mother").unwrap();
        assert_eq!(entry.explanation_count, 0);
        assert_eq!(entry.explanations.len(), 1);
        assert_eq!(entry.sparql_queries, vec!["ASK { :alice a :Mother }".to_string()]);
        assert_eq!(entry.tag_lengths(), vec![2]);
    }

    #[test]
    fn test_annotate_table() {
        let index = ExplanationIndex::from_json_str(FLAT).unwrap();
        let csv = "Question,Root Entity,Answer Type,Answer\n\
                   Is alice a Mother?,alice,BIN,Mother\n\
                   Is bob a Father?,bob,BIN,Father\n";
        let mut table = ResultTable::from_reader(csv.as_bytes()).unwrap();

        let found = index.annotate_table(&mut table).unwrap();
        assert_eq!(found, 1);
        assert_eq!(
            table.get(0, EXPLANATION_COLUMN),
            Some("alice a Woman. alice hasChild bob")
        );
        assert_eq!(table.get(0, EXPLANATION_FOUND_COLUMN), Some("true"));
        assert_eq!(table.get(0, EXPLANATION_COMPLEXITY_COLUMN), Some("2"));
        assert_eq!(table.get(1, EXPLANATION_COLUMN), Some(NO_EXPLANATION));
        assert_eq!(table.get(1, EXPLANATION_COMPLEXITY_COLUMN), Some("0"));
    }

    #[test]
    fn test_missing_count_reports_zero_complexity() {
        let text = r#"{
            "alice|rdf:type|Mother": {
                "explanations": [["alice hasChild bob", "TAG: D"]]
            }
        }"#;
        let index = ExplanationIndex::from_json_str(text).unwrap();
        let csv = "Question,Root Entity,Answer Type,Answer\n\
                   Is alice a Mother?,alice,BIN,Mother\n";
        let mut table = ResultTable::from_reader(csv.as_bytes()).unwrap();

        assert_eq!(index.annotate_table(&mut table).unwrap(), 1);
        assert_eq!(table.get(0, EXPLANATION_FOUND_COLUMN), Some("true"));
        assert_eq!(table.get(0, EXPLANATION_COMPLEXITY_COLUMN), Some("0"));
    }

    #[test]
    fn test_non_object_root_rejected() {
        assert!(ExplanationIndex::from_json_str("[]").is_err());
        assert!(ExplanationIndex::from_json_str("not json").is_err());
    }
}
