//! Seams to the external models on either side of retrieval.
//!
//! Neither the query encoder nor the answer synthesizer is implemented in
//! this crate; callers plug in their own.

use medrag_vector_store::Embedding;
use serde::{Deserialize, Serialize};

use crate::citation::{CitedPassage, render_context};
use crate::error::Result;

/// Turns query text into an embedding in the same space as the corpus.
pub trait QueryEncoder: Send + Sync {
    /// Encode a single query.
    fn encode(&self, text: &str) -> Result<Embedding>;

    /// Dimension of the embeddings this encoder produces.
    fn dimension(&self) -> usize;
}

/// Everything an answer synthesizer receives for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisInput {
    pub query: String,
    pub passages: Vec<CitedPassage>,
}

impl SynthesisInput {
    pub fn new(query: impl Into<String>, passages: Vec<CitedPassage>) -> Self {
        Self {
            query: query.into(),
            passages,
        }
    }

    /// Numbered context block for prompting.
    pub fn context(&self) -> String {
        render_context(&self.passages)
    }
}

/// Produces an answer from retrieved passages.
pub trait AnswerSynthesizer: Send + Sync {
    fn synthesize(&self, input: &SynthesisInput) -> Result<String>;
}
