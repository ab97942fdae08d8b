//! Padded graph batches.
//!
//! A batch holds `batch_size` independently sized graphs, padded to a common
//! node count, path count and adjacency width:
//!
//! | tensor       | shape                      | dtype |
//! |--------------|----------------------------|-------|
//! | `node_ids`   | (batch, nodes)             | u32   |
//! | `mask`       | (batch, nodes)             | u8    |
//! | `entity_ids` | (batch, nodes)             | u32   |
//! | `paths`      | (batch, paths, 3)          | u32   |
//! | `node_paths` | (batch, nodes, neighbors)  | u32   |
//! | `node_feats` | (batch, nodes, feat_size)  | f32   |
//!
//! `node_ids` index the utterance table; path targets and `node_paths` index
//! node slots and path rows of the same graph.

use crate::config::GraphConfig;
use crate::error::{Error, Result};
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};

/// A directed labeled edge: `(source, label, target)`.
///
/// Only `label` and `target` feed the path embedding. `source` is carried for
/// compatibility with graph builders that record it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path {
    pub source: u32,
    pub label: u32,
    pub target: u32,
}

impl Path {
    pub fn new(source: u32, label: u32, target: u32) -> Self {
        Self {
            source,
            label,
            target,
        }
    }
}

/// One unpadded graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphInput {
    /// Row of each node in the utterance table.
    pub node_ids: Vec<u32>,
    /// Global entity id of each node (read only with entity embedding).
    #[serde(default)]
    pub entity_ids: Vec<u32>,
    pub paths: Vec<Path>,
    /// Per node, indices into `paths` of its outgoing edges.
    pub node_paths: Vec<Vec<u32>>,
    /// Per node, a `feat_size` feature vector.
    pub node_feats: Vec<Vec<f32>>,
}

impl GraphInput {
    pub fn num_nodes(&self) -> usize {
        self.node_ids.len()
    }
}

/// Padded batch of graphs, ready for [`crate::GraphEmbedder::get_context`].
#[derive(Debug, Clone)]
pub struct GraphBatch {
    node_ids: Tensor,
    mask: Tensor,
    entity_ids: Tensor,
    paths: Tensor,
    node_paths: Tensor,
    node_feats: Tensor,
}

impl GraphBatch {
    /// Wrap pre-built tensors, checking that co-indexed tensors agree.
    pub fn from_tensors(
        node_ids: Tensor,
        mask: Tensor,
        entity_ids: Tensor,
        paths: Tensor,
        node_paths: Tensor,
        node_feats: Tensor,
    ) -> Result<Self> {
        let (b, n) = node_ids.dims2()?;
        let expect = |name: &'static str, t: &Tensor, want: &[usize]| -> Result<()> {
            let got = t.dims();
            if got.len() != want.len() || got.iter().zip(want).any(|(g, w)| g != w) {
                return Err(Error::shape(name, want, got));
            }
            Ok(())
        };

        expect("mask", &mask, &[b, n])?;
        expect("entity_ids", &entity_ids, &[b, n])?;

        let p = paths.dim(1).unwrap_or(0);
        expect("paths", &paths, &[b, p, 3])?;

        let k = node_paths.dim(2).unwrap_or(0);
        expect("node_paths", &node_paths, &[b, n, k])?;

        let f = node_feats.dim(2).unwrap_or(0);
        expect("node_feats", &node_feats, &[b, n, f])?;

        Ok(Self {
            node_ids,
            mask,
            entity_ids,
            paths,
            node_paths,
            node_feats,
        })
    }

    /// Pad `graphs` into one batch.
    ///
    /// Padded node slots get `node_pad` as node id, entity 0, a zero mask,
    /// zero features and an adjacency row of `pad_path_id`. Padded path rows
    /// are `(node_pad, 0, 0)` and are never referenced by real adjacency.
    pub fn from_graphs(graphs: &[GraphInput], config: &GraphConfig, device: &Device) -> Result<Self> {
        let b = config.batch_size();
        if graphs.len() != b {
            return Err(Error::shape("graphs", &[b], &[graphs.len()]));
        }
        for graph in graphs {
            validate_graph(graph, config)?;
        }

        let n = graphs.iter().map(GraphInput::num_nodes).max().unwrap_or(0);
        let p = graphs.iter().map(|g| g.paths.len()).max().unwrap_or(0);
        let k = graphs
            .iter()
            .flat_map(|g| g.node_paths.iter().map(Vec::len))
            .max()
            .unwrap_or(0)
            .max(1);
        let f = config.feat_size();
        let node_pad = config.node_pad();
        let pad_path = config.pad_path_id();

        let mut node_ids = Vec::with_capacity(b * n);
        let mut mask = Vec::with_capacity(b * n);
        let mut entity_ids = Vec::with_capacity(b * n);
        let mut paths = Vec::with_capacity(b * p * 3);
        let mut node_paths = Vec::with_capacity(b * n * k);
        let mut node_feats = Vec::with_capacity(b * n * f);

        for graph in graphs {
            let real = graph.num_nodes();
            for i in 0..n {
                if i < real {
                    node_ids.push(graph.node_ids[i]);
                    mask.push(1u8);
                    entity_ids.push(graph.entity_ids.get(i).copied().unwrap_or(0));
                    let adjacency = &graph.node_paths[i];
                    node_paths.extend_from_slice(adjacency);
                    node_paths.extend(std::iter::repeat(pad_path).take(k - adjacency.len()));
                    node_feats.extend_from_slice(&graph.node_feats[i]);
                } else {
                    node_ids.push(node_pad);
                    mask.push(0u8);
                    entity_ids.push(0);
                    node_paths.extend(std::iter::repeat(pad_path).take(k));
                    node_feats.extend(std::iter::repeat(0f32).take(f));
                }
            }
            for j in 0..p {
                let path = graph
                    .paths
                    .get(j)
                    .copied()
                    .unwrap_or(Path::new(node_pad, 0, 0));
                paths.extend_from_slice(&[path.source, path.label, path.target]);
            }
        }

        Self::from_tensors(
            Tensor::from_vec(node_ids, (b, n), device)?,
            Tensor::from_vec(mask, (b, n), device)?,
            Tensor::from_vec(entity_ids, (b, n), device)?,
            Tensor::from_vec(paths, (b, p, 3), device)?,
            Tensor::from_vec(node_paths, (b, n, k), device)?,
            Tensor::from_vec(node_feats, (b, n, f), device)?,
        )
    }

    /// Check the batch against the dimensions the embedder was built for.
    pub fn check(&self, config: &GraphConfig) -> Result<()> {
        let (b, n) = self.node_ids.dims2()?;
        if b != config.batch_size() {
            return Err(Error::shape("batch", &[config.batch_size()], &[b]));
        }
        let f = self.node_feats.dim(2)?;
        if f != config.feat_size() {
            return Err(Error::shape(
                "node_feats",
                &[b, n, config.feat_size()],
                self.node_feats.dims(),
            ));
        }
        Ok(())
    }

    pub fn node_ids(&self) -> &Tensor {
        &self.node_ids
    }

    /// 1 where the node slot holds a real node.
    pub fn mask(&self) -> &Tensor {
        &self.mask
    }

    pub fn entity_ids(&self) -> &Tensor {
        &self.entity_ids
    }

    pub fn paths(&self) -> &Tensor {
        &self.paths
    }

    pub fn node_paths(&self) -> &Tensor {
        &self.node_paths
    }

    pub fn node_feats(&self) -> &Tensor {
        &self.node_feats
    }

    pub fn batch_size(&self) -> usize {
        self.node_ids.dims()[0]
    }

    pub fn num_nodes(&self) -> usize {
        self.node_ids.dims()[1]
    }

    pub fn num_paths(&self) -> usize {
        self.paths.dims()[1]
    }
}

fn validate_graph(graph: &GraphInput, config: &GraphConfig) -> Result<()> {
    let n = graph.num_nodes();
    let same_len = |name: &'static str, got: usize| -> Result<()> {
        if got != n {
            return Err(Error::shape(name, &[n], &[got]));
        }
        Ok(())
    };
    same_len("node_paths", graph.node_paths.len())?;
    same_len("node_feats", graph.node_feats.len())?;
    if config.use_entity_embedding() {
        same_len("entity_ids", graph.entity_ids.len())?;
        if let Some(bound) = config.num_entities() {
            check_ids("entity_ids", graph.entity_ids.iter().copied(), bound)?;
        }
    }

    for feats in &graph.node_feats {
        if feats.len() != config.feat_size() {
            return Err(Error::shape("node_feats", &[config.feat_size()], &[feats.len()]));
        }
    }

    check_ids("paths.target", graph.paths.iter().map(|p| p.target), n)?;
    check_ids(
        "paths.label",
        graph.paths.iter().map(|p| p.label),
        config.num_edge_labels(),
    )?;

    let pad = config.pad_path_id();
    check_ids(
        "node_paths",
        graph
            .node_paths
            .iter()
            .flatten()
            .copied()
            .filter(|&id| id != pad),
        graph.paths.len(),
    )
}

fn check_ids(name: &'static str, ids: impl IntoIterator<Item = u32>, bound: usize) -> Result<()> {
    match ids.into_iter().find(|&id| id as usize >= bound) {
        Some(id) => Err(Error::IndexOutOfRange {
            name,
            index: id as usize,
            bound,
        }),
        None => Ok(()),
    }
}
