//! Hybrid retrieval pipeline for task context enrichment.
//!
//! Builds short search queries from a task, fans out to several independent
//! retrievers, fuses their scores with a reputation/recency/coverage quality
//! model, assigns stable citation markers, and clips the result to a token
//! budget before handing it to a capability.
//!
//! # Main types
//!
//! - [`Retriever`]: Trait every retrieval strategy implements.
//! - [`LexicalRetriever`], [`DenseRetriever`], [`KnowledgeBaseRetriever`],
//!   [`WebSearchRetriever`]: The built-in strategies.
//! - [`QualityScorer`]: Domain reputation, recency, coverage and length model.
//! - [`hybrid_search`]: Min-max normalised weighted fusion across retrievers.
//! - [`bundle_citations`] / [`clip_to_budget`]: Citation markers and budget clipping.
//! - [`RetrievalPipeline`]: Composes everything into `run_retrieval`.

/// BM25 inverted index for keyword-based retrieval.
pub mod bm25;
/// Token-budget clipping.
pub mod budget;
/// Citation marker assignment.
pub mod citations;
/// Retrieval configuration.
pub mod config;
/// Documents, hits, query specs and context bundles.
pub mod document;
/// Embedding provider trait and local implementation.
pub mod embedding;
/// Weighted score fusion across retrievers.
pub mod hybrid;
/// End-to-end retrieval for a single task.
pub mod pipeline;
/// Document quality model.
pub mod quality;
/// Query derivation from task text.
pub mod query;
/// Retriever trait and local strategies.
pub mod retriever;
/// Content-hash keyed document and provenance stores.
pub mod store;
/// Web search adapter.
pub mod web;

pub use bm25::Bm25Index;
pub use budget::{clip_to_budget, estimate_tokens};
pub use citations::bundle_citations;
pub use config::RetrievalConfig;
pub use document::{ContextBundle, Document, Hit, QuerySpec, ScoreBreakdown, SourceRef};
pub use embedding::{cosine_similarity, EmbeddingProvider, LocalEmbedding};
pub use hybrid::{hybrid_search, FusionOutcome, FusionWeights};
pub use pipeline::{Budgets, RetrievalOutcome, RetrievalPipeline, RetrievalPlan, TaskRef};
pub use quality::QualityScorer;
pub use query::build_queries;
pub use retriever::{
    DenseRetriever, DisabledRetriever, KnowledgeBaseRetriever, KnowledgeEntry, LexicalRetriever,
    Retriever,
};
pub use store::{content_hash, DocumentStore, ProvenanceRecord, ProvenanceStore};
pub use web::{HttpSearchBackend, WebResult, WebSearchBackend, WebSearchRetriever};
