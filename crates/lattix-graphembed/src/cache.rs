//! Rolling utterance memory keyed by entity mentions.
//!
//! After each dialogue turn the new utterance vector is added into the cache
//! rows of the entities that turn mentioned. The next forward pass reads
//! those rows back through `node_ids`.
//!
//! Every cache keeps its last row as a padding target. Entity slots that do
//! not correspond to a real mention point there, so padding never touches a
//! real entity row.

use crate::config::GraphConfig;
use crate::error::{Error, Result};
use crate::ops::scatter_accumulate;
use candle_core::{DType, Device, Tensor};
use tracing::debug;

/// Pure scatter-accumulate of one utterance into a cache tensor.
#[derive(Debug, Clone, Copy)]
pub struct UtteranceCacheUpdater {
    batch_size: usize,
    entity_cache_size: usize,
    utterance_size: usize,
}

impl UtteranceCacheUpdater {
    pub fn new(config: &GraphConfig) -> Self {
        Self {
            batch_size: config.batch_size(),
            entity_cache_size: config.entity_cache_size(),
            utterance_size: config.utterance_size(),
        }
    }

    pub fn entity_cache_size(&self) -> usize {
        self.entity_cache_size
    }

    /// Add `utterance[b]` into `curr[b, entity_indices[b, j]]` for every slot j.
    ///
    /// # Arguments
    /// - `entity_indices`: (batch, entity_cache_size), u32 cache rows
    /// - `utterance`: (batch, utterance_size)
    /// - `curr`: (batch, rows, utterance_size)
    ///
    /// # Returns
    /// - the updated (batch, rows, utterance_size) cache. Slots naming the same
    ///   row add the utterance once per slot.
    pub fn update(&self, entity_indices: &Tensor, utterance: &Tensor, curr: &Tensor) -> Result<Tensor> {
        let (b, e, u) = (self.batch_size, self.entity_cache_size, self.utterance_size);
        check_dims("entity_indices", entity_indices, &[b, e])?;
        check_dims("utterance", utterance, &[b, u])?;
        let rows = curr.dim(1).unwrap_or(0);
        check_dims("utterances", curr, &[b, rows, u])?;

        debug!(batch = b, slots = e, rows, "updating utterance cache");
        Ok(scatter_accumulate(curr, entity_indices, utterance)?)
    }
}

/// One dialogue session's utterance memory.
#[derive(Debug, Clone)]
pub struct UtteranceCache {
    utterances: Tensor,
    updater: UtteranceCacheUpdater,
}

impl UtteranceCache {
    /// Zero-initialized cache of `num_rows` rows; row `num_rows - 1` is reserved for padding.
    pub fn new(config: &GraphConfig, num_rows: usize, device: &Device) -> Result<Self> {
        if num_rows < 2 {
            return Err(Error::InvalidConfig(format!(
                "utterance cache needs at least one entity row plus a padding row, got {num_rows} rows"
            )));
        }
        let utterances = Tensor::zeros(
            (config.batch_size(), num_rows, config.utterance_size()),
            DType::F32,
            device,
        )?;
        Ok(Self {
            utterances,
            updater: UtteranceCacheUpdater::new(config),
        })
    }

    pub fn num_rows(&self) -> usize {
        self.utterances.dims()[1]
    }

    /// Row that padded entity slots write to.
    pub fn padding_row(&self) -> u32 {
        (self.num_rows() - 1) as u32
    }

    /// The (batch, rows, utterance_size) table read by the embedder.
    pub fn utterances(&self) -> &Tensor {
        &self.utterances
    }

    /// Build the (batch, entity_cache_size) index tensor for one turn.
    ///
    /// Keeps the most recent `entity_cache_size` mentions of each batch
    /// element and fills the remaining slots with the padding row.
    pub fn entity_indices(&self, mentions: &[Vec<u32>]) -> Result<Tensor> {
        let b = self.utterances.dims()[0];
        if mentions.len() != b {
            return Err(Error::shape("mentions", &[b], &[mentions.len()]));
        }
        let e = self.updater.entity_cache_size;
        let pad = self.padding_row();
        let bound = self.num_rows();

        let mut rows = Vec::with_capacity(b * e);
        for mentioned in mentions {
            if let Some(&row) = mentioned.iter().find(|&&row| row as usize >= bound) {
                return Err(Error::IndexOutOfRange {
                    name: "mentions",
                    index: row as usize,
                    bound,
                });
            }
            let kept = &mentioned[mentioned.len().saturating_sub(e)..];
            if kept.len() < mentioned.len() {
                debug!(
                    dropped = mentioned.len() - kept.len(),
                    entity_cache_size = e,
                    "dropping oldest mentions"
                );
            }
            rows.extend_from_slice(kept);
            rows.extend(std::iter::repeat(pad).take(e - kept.len()));
        }
        Ok(Tensor::from_vec(rows, (b, e), self.utterances.device())?)
    }

    /// Fold one turn's utterance into the cache.
    pub fn update(&mut self, entity_indices: &Tensor, utterance: &Tensor) -> Result<()> {
        self.utterances = self
            .updater
            .update(entity_indices, utterance, &self.utterances)?;
        Ok(())
    }
}

fn check_dims(name: &'static str, t: &Tensor, want: &[usize]) -> Result<()> {
    if t.dims() != want {
        return Err(Error::shape(name, want, t.dims()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GraphEmbedOptions, GraphMetadata};

    fn config(batch_size: usize, entity_cache_size: usize) -> GraphConfig {
        let metadata = GraphMetadata {
            num_edge_labels: 1,
            num_entities: None,
            utterance_size: 2,
            entity_cache_size,
            feat_size: 0,
            pad_path_id: 0,
            node_pad: 0,
        };
        GraphConfig::new(&GraphEmbedOptions::default(), &metadata, batch_size).unwrap()
    }

    #[test]
    fn test_update_accumulates() {
        let device = Device::Cpu;
        let mut cache = UtteranceCache::new(&config(1, 2), 4, &device).unwrap();
        let utterance = Tensor::from_vec(vec![1f32, 2.], (1, 2), &device).unwrap();

        let indices = cache.entity_indices(&[vec![0, 2]]).unwrap();
        cache.update(&indices, &utterance).unwrap();
        cache.update(&indices, &utterance).unwrap();

        let rows = cache.utterances().to_vec3::<f32>().unwrap();
        assert_eq!(rows[0][0], vec![2., 4.]);
        assert_eq!(rows[0][1], vec![0., 0.]);
        assert_eq!(rows[0][2], vec![2., 4.]);
    }

    #[test]
    fn test_entity_indices_pads_and_truncates() {
        let device = Device::Cpu;
        let cache = UtteranceCache::new(&config(2, 2), 5, &device).unwrap();
        let indices = cache.entity_indices(&[vec![1], vec![0, 1, 2]]).unwrap();
        assert_eq!(indices.to_vec2::<u32>().unwrap(), vec![vec![1, 4], vec![1, 2]]);
    }

    #[test]
    fn test_entity_indices_rejects_unknown_row() {
        let device = Device::Cpu;
        let cache = UtteranceCache::new(&config(1, 2), 3, &device).unwrap();
        let err = cache.entity_indices(&[vec![3]]).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { index: 3, bound: 3, .. }));
    }

    #[test]
    fn test_update_rejects_wrong_slot_count() {
        let device = Device::Cpu;
        let mut cache = UtteranceCache::new(&config(1, 2), 3, &device).unwrap();
        let indices = Tensor::from_vec(vec![0u32, 1, 2], (1, 3), &device).unwrap();
        let utterance = Tensor::zeros((1, 2), DType::F32, &device).unwrap();
        assert!(matches!(
            cache.update(&indices, &utterance),
            Err(Error::ShapeMismatch { name: "entity_indices", .. })
        ));
    }

    #[test]
    fn test_cache_needs_padding_row() {
        assert!(UtteranceCache::new(&config(1, 1), 1, &Device::Cpu).is_err());
    }
}
