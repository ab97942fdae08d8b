//! The three learned steps of graph message passing.
//!
//! ```text
//! h_v^(0)   = W_init [e_entity(v) || u[node_id(v)] || feat(v)] + b_init
//! p^(t)     = tanh(W_path [e_label(p) || h_target(p)^(t)] + b_path)
//! h_v^(t+1) = Σ_{p ∈ adj(v), p ≠ PAD} p^(t)
//! ```
//!
//! Parameters are shared across node slots, graphs in the batch, and
//! iterations. Each step is a pure function of its inputs.

use crate::config::GraphConfig;
use crate::error::Result;
use crate::ops::{batch_gather, batch_linear};
use candle_core::{Tensor, D};
use candle_nn::{embedding, linear, Embedding, Linear, Module, VarBuilder};

/// Produces iteration-0 node embeddings.
pub struct NodeEmbeddingInitializer {
    entity_embedding: Option<Embedding>,
    projection: Linear,
}

impl NodeEmbeddingInitializer {
    /// Reads `entity_embedding.weight` (when enabled) and `init_node.{weight,bias}`.
    pub fn new(config: &GraphConfig, vb: VarBuilder) -> Result<Self> {
        let entity_embedding = match (config.num_entities(), config.entity_embed_size()) {
            (Some(n), Some(e)) => Some(embedding(n, e, vb.pp("entity_embedding"))?),
            _ => None,
        };
        let projection = linear(
            config.init_input_size(),
            config.node_embed_size(),
            vb.pp("init_node"),
        )?;
        Ok(Self {
            entity_embedding,
            projection,
        })
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `utterances`: (batch, rows, utterance_size)
    /// - `node_ids`: (batch, nodes) rows of `utterances`
    /// - `entity_ids`: (batch, nodes), ignored without entity embedding
    /// - `node_feats`: (batch, nodes, feat_size)
    ///
    /// # Returns
    /// - (batch, nodes, node_embed_size)
    pub fn forward(
        &self,
        utterances: &Tensor,
        node_ids: &Tensor,
        entity_ids: &Tensor,
        node_feats: &Tensor,
    ) -> Result<Tensor> {
        let node_utterances = batch_gather(utterances, node_ids)?;
        let out = match &self.entity_embedding {
            Some(table) => {
                let entities = table.forward(entity_ids)?;
                batch_linear(&[&entities, &node_utterances, node_feats], &self.projection)?
            }
            None => batch_linear(&[&node_utterances, node_feats], &self.projection)?,
        };
        Ok(out)
    }
}

/// Embeds each path from its edge label and its target's current embedding.
pub struct PathEmbedder {
    edge_embedding: Embedding,
    projection: Linear,
}

impl PathEmbedder {
    /// Reads `edge_embedding.weight` and `path.{weight,bias}`.
    pub fn new(config: &GraphConfig, vb: VarBuilder) -> Result<Self> {
        let edge_embedding = embedding(
            config.num_edge_labels(),
            config.edge_embed_size(),
            vb.pp("edge_embedding"),
        )?;
        let projection = linear(
            config.edge_embed_size() + config.node_embed_size(),
            config.node_embed_size(),
            vb.pp("path"),
        )?;
        Ok(Self {
            edge_embedding,
            projection,
        })
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `node_embeds`: (batch, nodes, node_embed_size)
    /// - `paths`: (batch, paths, 3) of `(source, label, target)`; `source` is not read
    ///
    /// # Returns
    /// - (batch, paths, node_embed_size)
    pub fn forward(&self, node_embeds: &Tensor, paths: &Tensor) -> Result<Tensor> {
        let (b, p, _) = paths.dims3()?;
        if p == 0 {
            let d = self.projection.weight().dim(0)?;
            return Ok(Tensor::zeros((b, 0, d), node_embeds.dtype(), node_embeds.device())?);
        }

        let labels = paths.narrow(2, 1, 1)?.squeeze(2)?.contiguous()?;
        let targets = paths.narrow(2, 2, 1)?.squeeze(2)?.contiguous()?;

        let edge_embeds = self.edge_embedding.forward(&labels)?;
        let target_embeds = batch_gather(node_embeds, &targets)?;
        let out = batch_linear(&[&edge_embeds, &target_embeds], &self.projection)?.tanh()?;
        Ok(out)
    }
}

/// Sums the path embeddings on each node's adjacency list.
///
/// Adjacency entries equal to `pad_path_id` are masked out, so a node with no
/// real edges receives an all-zero message.
#[derive(Debug, Clone, Copy)]
pub struct MessagePasser {
    pad_path_id: u32,
}

impl MessagePasser {
    /// Create a message passer.
    ///
    /// # Arguments
    /// - `pad_path_id`: adjacency sentinel meaning "no path"; need not be a valid path row
    pub fn new(pad_path_id: u32) -> Self {
        Self { pad_path_id }
    }

    /// Adjacency sentinel excluded from the sum.
    pub fn pad_path_id(&self) -> u32 {
        self.pad_path_id
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `path_embeds`: (batch, paths, dim)
    /// - `node_paths`: (batch, nodes, neighbors), u32 path rows or `pad_path_id`
    ///
    /// # Returns
    /// - (batch, nodes, dim)
    pub fn forward(&self, path_embeds: &Tensor, node_paths: &Tensor) -> Result<Tensor> {
        let (b, p, dim) = path_embeds.dims3()?;
        let (_, n, k) = node_paths.dims3()?;
        if p == 0 || k == 0 {
            return Ok(Tensor::zeros((b, n, dim), path_embeds.dtype(), path_embeds.device())?);
        }

        // Pad entries need not be valid rows: point them at row 0, then mask.
        let pad = Tensor::full(self.pad_path_id, (b, n, k), node_paths.device())?;
        let valid = node_paths.ne(&pad)?;
        let rows = valid.where_cond(node_paths, &pad.zeros_like()?)?;

        let gathered = batch_gather(path_embeds, &rows.reshape((b, n * k))?)?
            .reshape((b, n, k, dim))?;
        // Select, not multiply: a non-finite row 0 must not leak into pad slots.
        let keep = valid
            .unsqueeze(D::Minus1)?
            .broadcast_as(gathered.dims())?;
        let messages = keep.where_cond(&gathered, &gathered.zeros_like()?)?;
        Ok(messages.sum(2)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GraphEmbedOptions, GraphMetadata};
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn config(use_entity_embedding: bool) -> GraphConfig {
        let options = GraphEmbedOptions {
            node_embed_size: 6,
            edge_embed_size: 3,
            entity_embed_size: Some(4),
            use_entity_embedding,
            mp_iters: 1,
            message_combiner: "concat".into(),
        };
        let metadata = GraphMetadata {
            num_edge_labels: 4,
            num_entities: Some(9),
            utterance_size: 5,
            entity_cache_size: 2,
            feat_size: 2,
            pad_path_id: 0,
            node_pad: 0,
        };
        GraphConfig::new(&options, &metadata, 2).unwrap()
    }

    #[test]
    fn test_initializer_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let init = NodeEmbeddingInitializer::new(&config(false), vb).unwrap();

        let utterances = Tensor::randn(0f32, 1f32, (2, 4, 5), &device).unwrap();
        let node_ids = Tensor::from_vec(vec![0u32, 1, 2, 3, 3, 0], (2, 3), &device).unwrap();
        let entity_ids = Tensor::zeros((2, 3), DType::U32, &device).unwrap();
        let feats = Tensor::randn(0f32, 1f32, (2, 3, 2), &device).unwrap();

        let out = init.forward(&utterances, &node_ids, &entity_ids, &feats).unwrap();
        assert_eq!(out.dims(), &[2, 3, 6]);
    }

    #[test]
    fn test_initializer_with_entity_embedding() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let init = NodeEmbeddingInitializer::new(&config(true), vb).unwrap();
        assert!(init.entity_embedding.is_some());

        let utterances = Tensor::randn(0f32, 1f32, (2, 4, 5), &device).unwrap();
        let node_ids = Tensor::zeros((2, 3), DType::U32, &device).unwrap();
        let entity_ids = Tensor::from_vec(vec![8u32, 1, 2, 3, 4, 5], (2, 3), &device).unwrap();
        let feats = Tensor::zeros((2, 3, 2), DType::F32, &device).unwrap();

        let out = init.forward(&utterances, &node_ids, &entity_ids, &feats).unwrap();
        assert_eq!(out.dims(), &[2, 3, 6]);
    }

    #[test]
    fn test_path_embeds_are_bounded() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let embedder = PathEmbedder::new(&config(false), vb).unwrap();

        let nodes = (Tensor::randn(0f32, 1f32, (2, 3, 6), &device).unwrap() * 100.0).unwrap();
        let paths = Tensor::from_vec(
            vec![0u32, 1, 2, 1, 3, 0, 0, 0, 1, 2, 2, 2],
            (2, 2, 3),
            &device,
        )
        .unwrap();

        let out = embedder.forward(&nodes, &paths).unwrap();
        assert_eq!(out.dims(), &[2, 2, 6]);
        let max = out.abs().unwrap().max_keepdim(2).unwrap().flatten_all().unwrap();
        for v in max.to_vec1::<f32>().unwrap() {
            assert!(v <= 1.0);
        }
    }

    #[test]
    fn test_message_passer_sums_valid_neighbors() {
        let device = Device::Cpu;
        // path rows: 0 -> [1, 1], 1 -> [2, 0], 2 -> [0, 5]
        let paths = Tensor::from_vec(vec![1f32, 1., 2., 0., 0., 5.], (1, 3, 2), &device).unwrap();
        // pad = 7: node 0 sees rows {0, 1}, node 1 sees {2, 2}, node 2 sees nothing
        let node_paths =
            Tensor::from_vec(vec![0u32, 1, 2, 2, 7, 7], (1, 3, 2), &device).unwrap();

        let out = MessagePasser::new(7).forward(&paths, &node_paths).unwrap();
        assert_eq!(
            out.to_vec3::<f32>().unwrap(),
            vec![vec![vec![3., 1.], vec![0., 10.], vec![0., 0.]]]
        );
    }

    #[test]
    fn test_message_passer_pad_row_is_masked() {
        let device = Device::Cpu;
        // pad_path_id = 0 names a real row; it must still be excluded
        let paths = Tensor::from_vec(vec![9f32, 9., 1., 2.], (1, 2, 2), &device).unwrap();
        let node_paths = Tensor::from_vec(vec![0u32, 1, 0, 0], (1, 2, 2), &device).unwrap();

        let out = MessagePasser::new(0).forward(&paths, &node_paths).unwrap();
        assert_eq!(
            out.to_vec3::<f32>().unwrap(),
            vec![vec![vec![1., 2.], vec![0., 0.]]]
        );
    }

    #[test]
    fn test_message_passer_ignores_non_finite_pad_row() {
        let device = Device::Cpu;
        let paths =
            Tensor::from_vec(vec![f32::NAN, f32::INFINITY, 1., 2.], (1, 2, 2), &device).unwrap();
        // node 0 uses row 1 only; node 1 is all padding
        let node_paths = Tensor::from_vec(vec![1u32, 5, 5, 5], (1, 2, 2), &device).unwrap();

        let out = MessagePasser::new(5).forward(&paths, &node_paths).unwrap();
        assert_eq!(
            out.to_vec3::<f32>().unwrap(),
            vec![vec![vec![1., 2.], vec![0., 0.]]]
        );
    }

    #[test]
    fn test_message_passer_without_paths() {
        let device = Device::Cpu;
        let paths = Tensor::zeros((1, 0, 4), DType::F32, &device).unwrap();
        let node_paths = Tensor::zeros((1, 3, 1), DType::U32, &device).unwrap();
        let out = MessagePasser::new(0).forward(&paths, &node_paths).unwrap();
        assert_eq!(out.dims(), &[1, 3, 4]);
        assert_eq!(out.sum_all().unwrap().to_scalar::<f32>().unwrap(), 0.0);
    }
}
