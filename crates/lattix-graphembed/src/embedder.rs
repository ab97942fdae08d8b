//! The graph embedder: initialization, `mp_iters` rounds of message passing,
//! and context combination.

use crate::batch::GraphBatch;
use crate::cache::UtteranceCacheUpdater;
use crate::combine::ContextCombiner;
use crate::config::GraphConfig;
use crate::error::{Error, Result};
use crate::layers::{MessagePasser, NodeEmbeddingInitializer, PathEmbedder};
use candle_core::Tensor;
use candle_nn::VarBuilder;
use tracing::{debug, trace};

/// Output of [`GraphEmbedder::get_context`].
#[derive(Debug, Clone)]
pub struct GraphContext {
    /// (batch, nodes, context_size); rows of padded nodes are zero.
    pub context: Tensor,
    /// The batch mask, unchanged.
    pub mask: Tensor,
}

/// Graph embedding model.
///
/// Owns every learned parameter. Forward calls borrow `&self` and do not
/// mutate anything, so one embedder can serve many batches concurrently.
pub struct GraphEmbedder {
    config: GraphConfig,
    initializer: NodeEmbeddingInitializer,
    path_embedder: PathEmbedder,
    message_passer: MessagePasser,
    combiner: ContextCombiner,
    cache_updater: UtteranceCacheUpdater,
}

impl GraphEmbedder {
    /// Build all parameters from `vb`.
    ///
    /// With a fresh `VarMap` this initializes new weights; with
    /// `VarBuilder::from_tensors` it uses the given ones.
    pub fn new(config: GraphConfig, vb: VarBuilder) -> Result<Self> {
        let initializer = NodeEmbeddingInitializer::new(&config, vb.clone())?;
        let path_embedder = PathEmbedder::new(&config, vb)?;
        let message_passer = MessagePasser::new(config.pad_path_id());
        let combiner = ContextCombiner::new(config.message_combiner());
        let cache_updater = UtteranceCacheUpdater::new(&config);

        debug!(
            context_size = config.context_size(),
            mp_iters = config.mp_iters(),
            combiner = %config.message_combiner(),
            entity_embedding = config.use_entity_embedding(),
            "built graph embedder"
        );

        Ok(Self {
            config,
            initializer,
            path_embedder,
            message_passer,
            combiner,
            cache_updater,
        })
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn initializer(&self) -> &NodeEmbeddingInitializer {
        &self.initializer
    }

    pub fn path_embedder(&self) -> &PathEmbedder {
        &self.path_embedder
    }

    pub fn message_passer(&self) -> &MessagePasser {
        &self.message_passer
    }

    /// Per-iteration node embeddings h^(0), ..., h^(mp_iters).
    ///
    /// - `utterances`: (batch, rows, utterance_size), indexed by the batch's `node_ids`
    pub fn node_embeddings(&self, utterances: &Tensor, batch: &GraphBatch) -> Result<Vec<Tensor>> {
        batch.check(&self.config)?;
        self.check_utterances(utterances, batch)?;

        let mut node_embeds = Vec::with_capacity(self.config.mp_iters() + 1);
        node_embeds.push(self.initializer.forward(
            utterances,
            batch.node_ids(),
            batch.entity_ids(),
            batch.node_feats(),
        )?);

        for iter in 0..self.config.mp_iters() {
            let curr = &node_embeds[node_embeds.len() - 1];
            let path_embeds = self.path_embedder.forward(curr, batch.paths())?;
            let next = self.message_passer.forward(&path_embeds, batch.node_paths())?;
            trace!(iter, paths = batch.num_paths(), "message passing round");
            node_embeds.push(next);
        }
        Ok(node_embeds)
    }

    /// Embed every node slot as context for attention.
    pub fn get_context(&self, utterances: &Tensor, batch: &GraphBatch) -> Result<GraphContext> {
        let node_embeds = self.node_embeddings(utterances, batch)?;
        let context = self.combiner.forward(&node_embeds, batch.mask())?;
        Ok(GraphContext {
            context,
            mask: batch.mask().clone(),
        })
    }

    /// Add `utterance` into the cache rows named by `entity_indices`.
    ///
    /// See [`UtteranceCacheUpdater::update`].
    pub fn update_utterance(
        &self,
        entity_indices: &Tensor,
        utterance: &Tensor,
        curr_utterances: &Tensor,
    ) -> Result<Tensor> {
        self.cache_updater
            .update(entity_indices, utterance, curr_utterances)
    }

    fn check_utterances(&self, utterances: &Tensor, batch: &GraphBatch) -> Result<()> {
        let dims = utterances.dims();
        let (b, u) = (self.config.batch_size(), self.config.utterance_size());
        if dims.len() != 3 || dims[0] != b || dims[2] != u {
            let rows = dims.get(1).copied().unwrap_or(0);
            return Err(Error::shape("utterances", &[b, rows, u], dims));
        }

        // node_ids (padding slots included) must name rows of the utterance table
        let node_ids = batch.node_ids();
        if node_ids.elem_count() > 0 {
            let max_id = node_ids.flatten_all()?.max(0)?.to_scalar::<u32>()? as usize;
            if max_id >= dims[1] {
                return Err(Error::IndexOutOfRange {
                    name: "node_ids",
                    index: max_id,
                    bound: dims[1],
                });
            }
        }
        Ok(())
    }
}
