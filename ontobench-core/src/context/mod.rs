//! Ontology context resolution.
//!
//! Questions are scoped to a root entity; before dispatch, each distinct
//! entity is resolved once to the text placed in the prompt. Two modes exist:
//!
//! - **Raw**: the serialized ontology file (Turtle, with RDF/XML and
//!   N-Triples fallbacks), passed through verbatim.
//! - **Verbalized**: a pre-verbalized JSON document, re-emitted pretty-printed.
//!
//! Resolution never fails. A missing file becomes a deterministic placeholder
//! such as `[ERROR: .TTL file not found]`, so one absent file cannot abort a
//! batch.
//!
//! ```rust,ignore
//! use ontobench_core::context::{preload_contexts, ContextMode, FileContextStore};
//!
//! let store = FileContextStore::from_user_path("~/ontologies/family_1hop");
//! let contexts = preload_contexts(&store, &rows, ContextMode::Raw);
//! ```

mod preload;
mod store;

pub use preload::{available_entities, preload_contexts};
pub use store::{
    missing_placeholder, ContextMode, FileContextStore, OntologyContextStore, RAW_EXTENSIONS,
    VERBALIZED_EXTENSION,
};
