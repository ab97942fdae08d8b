//! Message-passing node embeddings for dialogue knowledge graphs.
//!
//! A dialogue agent grounds its turns in a small knowledge graph of entities,
//! attributes and relations. `lattix-graphembed` turns a batch of such graphs
//! into one context vector per node, so a decoder can attend over graph
//! structure instead of raw text alone.
//!
//! ## Pipeline
//!
//! ```text
//! utterances ──► NodeEmbeddingInitializer ──► h^(0)
//!                                              │
//!                 ┌────────────────────────────┘
//!                 ▼
//!          PathEmbedder ──► MessagePasser ──► h^(t+1)     (× mp_iters)
//!                                              │
//!                 ContextCombiner (concat | sum, masked) ──► context
//! ```
//!
//! Node embeddings start from the utterance vector cached for each node (plus
//! optional entity identity and node features). Each round embeds every
//! labeled path from its target's current embedding and sums those path
//! embeddings over each node's adjacency list. The iterations are then
//! concatenated or summed, and padded node slots are zeroed.
//!
//! After each turn, [`UtteranceCache`] adds the new utterance vector into the
//! rows of the entities it mentioned; the next forward pass reads them back.
//!
//! ## Modules
//!
//! - [`config`]: options, graph metadata, validated [`GraphConfig`]
//! - [`batch`]: padded [`GraphBatch`] construction and shape checks
//! - [`layers`]: initializer, path embedder, message passer
//! - [`combine`]: iteration combination and masking
//! - [`embedder`]: the [`GraphEmbedder`] driver
//! - [`cache`]: per-session utterance memory
//! - [`ops`]: batched gather / scatter-add helpers
//!
//! ## Example
//!
//! ```rust,ignore
//! use lattix_graphembed::{GraphBatch, GraphConfig, GraphEmbedder, GraphEmbedOptions};
//! use candle_core::{DType, Device};
//! use candle_nn::{VarBuilder, VarMap};
//!
//! let config = GraphConfig::new(&GraphEmbedOptions::default(), &metadata, 1)?;
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
//! let embedder = GraphEmbedder::new(config, vb)?;
//!
//! let batch = GraphBatch::from_graphs(&graphs, embedder.config(), &Device::Cpu)?;
//! let out = embedder.get_context(cache.utterances(), &batch)?;
//! assert_eq!(out.context.dim(2)?, embedder.config().context_size());
//! ```

pub mod batch;
pub mod cache;
pub mod combine;
pub mod config;
pub mod embedder;
pub mod error;
pub mod layers;
pub mod ops;

pub use batch::{GraphBatch, GraphInput, Path};
pub use cache::{UtteranceCache, UtteranceCacheUpdater};
pub use combine::ContextCombiner;
pub use config::{GraphConfig, GraphEmbedOptions, GraphMetadata, MessageCombiner};
pub use embedder::{GraphContext, GraphEmbedder};
pub use error::{Error, Result};
pub use layers::{MessagePasser, NodeEmbeddingInitializer, PathEmbedder};
