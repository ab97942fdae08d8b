//! Embedder configuration.
//!
//! Three layers, from loosest to strictest:
//!
//! - [`GraphEmbedOptions`]: user-facing knobs (embedding widths, message passing
//!   rounds, combiner). Deserializable, with the usual defaults.
//! - [`GraphMetadata`]: facts about the graph vocabulary (edge label count,
//!   utterance width, padding ids) that the options are combined with.
//! - [`GraphConfig`]: the validated, immutable result. Every shape the embedder
//!   relies on is derived here, once.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How per-iteration node embeddings are merged into the final context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageCombiner {
    /// Concatenate along the feature axis: width = node_embed_size * (mp_iters + 1)
    Concat,
    /// Elementwise sum: width = node_embed_size
    Sum,
}

impl FromStr for MessageCombiner {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "concat" => Ok(Self::Concat),
            "sum" => Ok(Self::Sum),
            other => Err(Error::InvalidConfig(format!(
                "unknown message combiner `{other}` (expected `concat` or `sum`)"
            ))),
        }
    }
}

impl fmt::Display for MessageCombiner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concat => f.write_str("concat"),
            Self::Sum => f.write_str("sum"),
        }
    }
}

/// User-facing embedding options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphEmbedOptions {
    /// Node (and path) embedding width.
    pub node_embed_size: usize,
    /// Edge label embedding width.
    pub edge_embed_size: usize,
    /// Entity embedding width. Only read when `use_entity_embedding` is set.
    pub entity_embed_size: Option<usize>,
    /// Look up a learned entity vector when initializing node embeddings.
    pub use_entity_embedding: bool,
    /// Number of message passing rounds.
    pub mp_iters: usize,
    /// `concat` or `sum`. Kept as text so a bad value fails in [`GraphConfig::new`].
    pub message_combiner: String,
}

impl Default for GraphEmbedOptions {
    fn default() -> Self {
        Self {
            node_embed_size: 50,
            edge_embed_size: 20,
            entity_embed_size: Some(50),
            use_entity_embedding: false,
            mp_iters: 1,
            message_combiner: "concat".to_string(),
        }
    }
}

/// Vocabulary and padding facts about the graphs being embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphMetadata {
    /// Size of the edge label (relation) vocabulary.
    pub num_edge_labels: usize,
    /// Size of the global entity vocabulary, if known.
    #[serde(default)]
    pub num_entities: Option<usize>,
    /// Width of the utterance vectors produced by the dialogue encoder.
    pub utterance_size: usize,
    /// Number of cache rows updated per utterance.
    pub entity_cache_size: usize,
    /// Width of per-node input features.
    pub feat_size: usize,
    /// Neighbor-path sentinel meaning "no edge here".
    pub pad_path_id: u32,
    /// Node id used for padded node slots.
    pub node_pad: u32,
}

/// Validated, immutable embedder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphConfig {
    node_embed_size: usize,
    edge_embed_size: usize,
    entity_embed_size: Option<usize>,
    num_edge_labels: usize,
    num_entities: Option<usize>,
    entity_cache_size: usize,
    feat_size: usize,
    utterance_size: usize,
    mp_iters: usize,
    message_combiner: MessageCombiner,
    use_entity_embedding: bool,
    batch_size: usize,
    pad_path_id: u32,
    node_pad: u32,
    context_size: usize,
}

impl GraphConfig {
    /// Combine options with graph metadata.
    ///
    /// Fails with [`Error::InvalidConfig`] when the combiner is unknown, when
    /// entity embedding is requested without an entity width and vocabulary,
    /// or when any width or the batch size is zero.
    pub fn new(
        options: &GraphEmbedOptions,
        metadata: &GraphMetadata,
        batch_size: usize,
    ) -> Result<Self> {
        let message_combiner: MessageCombiner = options.message_combiner.parse()?;

        for (name, value) in [
            ("node_embed_size", options.node_embed_size),
            ("edge_embed_size", options.edge_embed_size),
            ("num_edge_labels", metadata.num_edge_labels),
            ("utterance_size", metadata.utterance_size),
            ("batch_size", batch_size),
        ] {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be positive")));
            }
        }

        let (entity_embed_size, num_entities) = if options.use_entity_embedding {
            match (options.entity_embed_size, metadata.num_entities) {
                (Some(e), Some(n)) if e > 0 && n > 0 => (Some(e), Some(n)),
                _ => {
                    return Err(Error::InvalidConfig(
                        "use_entity_embedding requires a positive entity_embed_size and num_entities"
                            .to_string(),
                    ))
                }
            }
        } else {
            (None, None)
        };

        let context_size = match message_combiner {
            MessageCombiner::Concat => options
                .mp_iters
                .checked_add(1)
                .and_then(|n| n.checked_mul(options.node_embed_size))
                .ok_or_else(|| {
                    Error::InvalidConfig(format!(
                        "context size overflows for mp_iters = {} and node_embed_size = {}",
                        options.mp_iters, options.node_embed_size
                    ))
                })?,
            MessageCombiner::Sum => options.node_embed_size,
        };

        Ok(Self {
            node_embed_size: options.node_embed_size,
            edge_embed_size: options.edge_embed_size,
            entity_embed_size,
            num_edge_labels: metadata.num_edge_labels,
            num_entities,
            entity_cache_size: metadata.entity_cache_size,
            feat_size: metadata.feat_size,
            utterance_size: metadata.utterance_size,
            mp_iters: options.mp_iters,
            message_combiner,
            use_entity_embedding: options.use_entity_embedding,
            batch_size,
            pad_path_id: metadata.pad_path_id,
            node_pad: metadata.node_pad,
            context_size,
        })
    }

    /// Width of every node and path embedding.
    pub fn node_embed_size(&self) -> usize {
        self.node_embed_size
    }

    /// Width of the edge label embedding.
    pub fn edge_embed_size(&self) -> usize {
        self.edge_embed_size
    }

    /// Entity embedding width; `Some` iff entity embedding is enabled.
    pub fn entity_embed_size(&self) -> Option<usize> {
        self.entity_embed_size
    }

    /// Rows of the edge label table.
    pub fn num_edge_labels(&self) -> usize {
        self.num_edge_labels
    }

    /// Entity vocabulary size; `Some` iff entity embedding is enabled.
    pub fn num_entities(&self) -> Option<usize> {
        self.num_entities
    }

    /// Maximum entity mentions cached per utterance.
    pub fn entity_cache_size(&self) -> usize {
        self.entity_cache_size
    }

    /// Width of the per-node feature vector.
    pub fn feat_size(&self) -> usize {
        self.feat_size
    }

    /// Width of each utterance cache row.
    pub fn utterance_size(&self) -> usize {
        self.utterance_size
    }

    /// Number of message passing rounds.
    pub fn mp_iters(&self) -> usize {
        self.mp_iters
    }

    /// How per-round embeddings are merged into the context.
    pub fn message_combiner(&self) -> MessageCombiner {
        self.message_combiner
    }

    /// Whether the initial node embedding reads the entity table.
    pub fn use_entity_embedding(&self) -> bool {
        self.use_entity_embedding
    }

    /// Graphs per batch, checked on every forward call.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Adjacency sentinel meaning "no path".
    pub fn pad_path_id(&self) -> u32 {
        self.pad_path_id
    }

    /// Utterance row read by padded node slots.
    pub fn node_pad(&self) -> u32 {
        self.node_pad
    }

    /// Width of each context row returned by the embedder.
    pub fn context_size(&self) -> usize {
        self.context_size
    }

    /// Input width of the initial node projection.
    pub(crate) fn init_input_size(&self) -> usize {
        self.entity_embed_size.unwrap_or(0) + self.utterance_size + self.feat_size
    }
}
