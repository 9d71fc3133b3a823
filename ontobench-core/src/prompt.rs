//! Prompt construction.
//!
//! Prompts are a pure function of the query, its context, the answer type,
//! the context mode and optional explanation guidance. Identical inputs
//! always give byte-identical prompts.

use serde::{Deserialize, Serialize};

use crate::context::ContextMode;
use crate::question::AnswerType;

const BINARY_INSTRUCTIONS: &str = "Only answer with TRUE or FALSE. Do not explain your answer.";

const MULTI_CHOICE_INSTRUCTIONS: &str = "Only answer with either:\n\
- A full individual's name (all lowercase with underscores, including birth year, e.g. caroline_lavinia_tubb_1840), or\n\
- A class starting with a capital letter.\n\
If there are multiple classes or individuals separate each by a comma and a space.\n\
Do not explain your answer. Only output the answer to the question.";

/// Everything a prompt depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptInput<'a> {
    pub query_text: &'a str,
    pub context_text: &'a str,
    pub answer_type: AnswerType,
    pub context_mode: ContextMode,
    /// Reasoning guidance; selects the explanation-guided template
    pub explanation: Option<&'a str>,
}

impl<'a> PromptInput<'a> {
    pub fn new(
        query_text: &'a str,
        context_text: &'a str,
        answer_type: AnswerType,
        context_mode: ContextMode,
    ) -> Self {
        Self {
            query_text,
            context_text,
            answer_type,
            context_mode,
            explanation: None,
        }
    }

    pub fn with_explanation(mut self, explanation: Option<&'a str>) -> Self {
        self.explanation = explanation.filter(|e| !e.trim().is_empty());
        self
    }
}

/// Prompt layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTemplate {
    /// Formal query (SPARQL) over serialized ontology text
    FormalQuery,
    /// Natural-language question over a verbalized ontology
    NaturalLanguage,
    /// Natural-language question with reasoning-explanation guidance
    ExplanationGuided,
}

impl PromptTemplate {
    /// Template for a context mode, explanation presence and answer type.
    ///
    /// Explanation guidance only applies to verbalized context; answer type
    /// does not change the layout, only the instruction block inside it.
    pub fn select(mode: ContextMode, has_explanation: bool, _answer_type: AnswerType) -> Self {
        match (mode, has_explanation) {
            (ContextMode::Raw, _) => Self::FormalQuery,
            (ContextMode::Verbalized, false) => Self::NaturalLanguage,
            (ContextMode::Verbalized, true) => Self::ExplanationGuided,
        }
    }
}

/// Answer-format instructions for an answer type.
pub fn answer_instructions(answer_type: AnswerType) -> &'static str {
    match answer_type {
        AnswerType::Binary => BINARY_INSTRUCTIONS,
        AnswerType::MultiChoice => MULTI_CHOICE_INSTRUCTIONS,
        AnswerType::Other => "",
    }
}

/// Build the exact text sent to a model.
pub fn build_prompt(input: &PromptInput<'_>) -> String {
    let template = PromptTemplate::select(
        input.context_mode,
        input.explanation.is_some(),
        input.answer_type,
    );
    let instructions = answer_instructions(input.answer_type);

    match template {
        PromptTemplate::FormalQuery => with_instructions(
            instructions,
            format!(
                "Question: {}\nContext: {}",
                input.query_text, input.context_text
            ),
        ),
        PromptTemplate::NaturalLanguage => with_instructions(
            instructions,
            format!(
                "Question: {}\nContext (verbalized ontology):\n{}",
                input.query_text, input.context_text
            ),
        ),
        PromptTemplate::ExplanationGuided => explanation_guided(
            input.query_text,
            input.context_text,
            input.explanation.unwrap_or_default(),
            instructions,
        ),
    }
}

fn with_instructions(instructions: &str, body: String) -> String {
    if instructions.is_empty() {
        body
    } else {
        format!("{}\n\n{}", instructions, body)
    }
}

fn explanation_guided(
    question: &str,
    ontology_context: &str,
    explanation: &str,
    instructions: &str,
) -> String {
    let mut prompt = format!(
        "You are an expert in ontological reasoning. You will be given:\n\
         1. A question about ontological relationships\n\
         2. Ontology context (facts and relationships)\n\
         3. Reasoning explanation context (how similar inferences can be made)\n\
         \n\
         Use the reasoning explanation to guide your thinking process, then answer the question.\n\
         \n\
         QUESTION: {question}\n\
         \n\
         ONTOLOGY CONTEXT:\n\
         {ontology_context}\n\
         \n\
         REASONING EXPLANATION CONTEXT:\n\
         {explanation}\n\
         \n\
         INSTRUCTIONS:\n\
         - Study the reasoning explanation to understand the inference pattern\n\
         - Apply similar reasoning to the given question\n\
         - Show your reasoning process step by step\n\
         - Provide a clear, confident answer\n"
    );
    if !instructions.is_empty() {
        prompt.push_str("\nANSWER FORMAT (overrides the instructions above):\n");
        prompt.push_str(instructions);
        prompt.push('\n');
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_binary_formal_query_prompt() {
        let input = PromptInput::new(
            "ASK { :alice a :Person }",
            ":alice a :Person .",
            AnswerType::Binary,
            ContextMode::Raw,
        );
        assert_eq!(
            build_prompt(&input),
            "Only answer with TRUE or FALSE. Do not explain your answer.\n\n\
             Question: ASK { :alice a :Person }\nContext: :alice a :Person ."
        );
    }

    #[test]
    fn test_multi_choice_prompt_lists_grammar() {
        let input = PromptInput::new(
            "Who are the parents of bob?",
            "{}",
            AnswerType::MultiChoice,
            ContextMode::Verbalized,
        );
        let prompt = build_prompt(&input);

        assert!(prompt.starts_with("Only answer with either:\n"));
        assert!(prompt.contains("caroline_lavinia_tubb_1840"));
        assert!(prompt.contains("separate each by a comma and a space"));
        assert!(prompt.ends_with("Context (verbalized ontology):\n{}"));
    }

    #[test]
    fn test_other_answer_type_has_no_instruction_block() {
        let input = PromptInput::new("q", "c", AnswerType::Other, ContextMode::Raw);
        assert_eq!(build_prompt(&input), "Question: q\nContext: c");
    }

    #[test]
    fn test_template_selection() {
        assert_eq!(
            PromptTemplate::select(ContextMode::Raw, true, AnswerType::Binary),
            PromptTemplate::FormalQuery
        );
        assert_eq!(
            PromptTemplate::select(ContextMode::Verbalized, false, AnswerType::Binary),
            PromptTemplate::NaturalLanguage
        );
        assert_eq!(
            PromptTemplate::select(ContextMode::Verbalized, true, AnswerType::MultiChoice),
            PromptTemplate::ExplanationGuided
        );
    }

    #[test]
    fn test_explanation_guided_prompt() {
        let input = PromptInput::new(
            "Is alice a Mother?",
            "alice has child bob",
            AnswerType::Binary,
            ContextMode::Verbalized,
        )
        .with_explanation(Some("alice hasChild bob. hasChild domain Parent"));
        let prompt = build_prompt(&input);

        assert!(prompt.starts_with("You are an expert in ontological reasoning."));
        assert!(prompt.contains("QUESTION: Is alice a Mother?\n"));
        assert!(prompt.contains("REASONING EXPLANATION CONTEXT:\nalice hasChild bob."));
        assert!(prompt.ends_with(
            "ANSWER FORMAT (overrides the instructions above):\n\
             Only answer with TRUE or FALSE. Do not explain your answer.\n"
        ));
    }

    #[test]
    fn test_blank_explanation_is_ignored() {
        let input = PromptInput::new("q", "c", AnswerType::Other, ContextMode::Verbalized)
            .with_explanation(Some("   "));
        assert_eq!(input.explanation, None);
        assert!(build_prompt(&input).starts_with("Question: q"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let input = PromptInput::new(
            "Is X a Y?",
            "[ERROR: .TTL file not found]",
            AnswerType::Binary,
            ContextMode::Raw,
        );
        assert_eq!(build_prompt(&input), build_prompt(&input));
        assert!(build_prompt(&input).contains("[ERROR: .TTL file not found]"));
    }
}
