//! Merging per-iteration node embeddings into the context tensor.
//!
//! Given iterations h^(0), ..., h^(T):
//!
//! ```text
//! concat: c = [h^(0) || h^(1) || ... || h^(T)]    width = d * (T + 1)
//! sum:    c = h^(0) + h^(1) + ... + h^(T)         width = d
//! ```
//!
//! Rows of padded node slots are then forced to zero.

use crate::config::MessageCombiner;
use crate::error::{Error, Result};
use candle_core::{Tensor, D};

/// Combines the ordered sequence of node embeddings and masks padded nodes.
#[derive(Debug, Clone, Copy)]
pub struct ContextCombiner {
    combiner: MessageCombiner,
}

impl ContextCombiner {
    /// Create a combiner.
    ///
    /// # Arguments
    /// - `combiner`: concat widens the context per round, sum keeps one embedding width
    pub fn new(combiner: MessageCombiner) -> Self {
        Self { combiner }
    }

    /// The merge rule in use.
    pub fn combiner(&self) -> MessageCombiner {
        self.combiner
    }

    /// Combine iterations, each (batch, nodes, d).
    pub fn combine(&self, iterations: &[Tensor]) -> Result<Tensor> {
        let Some((first, rest)) = iterations.split_first() else {
            return Err(Error::EmptySequence("iterations"));
        };

        match self.combiner {
            MessageCombiner::Concat => Ok(Tensor::cat(iterations, D::Minus1)?),
            MessageCombiner::Sum => {
                let mut result = first.clone();
                for layer in rest {
                    result = (&result + layer)?;
                }
                Ok(result)
            }
        }
    }

    /// Combine, then zero every row whose `mask` entry is 0.
    ///
    /// - `mask`: (batch, nodes), u8
    pub fn forward(&self, iterations: &[Tensor], mask: &Tensor) -> Result<Tensor> {
        let context = self.combine(iterations)?;
        let keep = mask.unsqueeze(D::Minus1)?.broadcast_as(context.dims())?;
        Ok(keep.where_cond(&context, &context.zeros_like()?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn layers(device: &Device) -> Vec<Tensor> {
        vec![
            Tensor::ones((1, 2, 3), DType::F32, device).unwrap(),
            (Tensor::ones((1, 2, 3), DType::F32, device).unwrap() * 2.0).unwrap(),
        ]
    }

    #[test]
    fn test_concat_widens() {
        let device = Device::Cpu;
        let out = ContextCombiner::new(MessageCombiner::Concat)
            .combine(&layers(&device))
            .unwrap();
        assert_eq!(out.dims(), &[1, 2, 6]);
        assert_eq!(
            out.to_vec3::<f32>().unwrap()[0][1],
            vec![1., 1., 1., 2., 2., 2.]
        );
    }

    #[test]
    fn test_sum_keeps_width() {
        let device = Device::Cpu;
        let out = ContextCombiner::new(MessageCombiner::Sum)
            .combine(&layers(&device))
            .unwrap();
        assert_eq!(out.dims(), &[1, 2, 3]);
        assert_eq!(out.to_vec3::<f32>().unwrap()[0][0], vec![3., 3., 3.]);
    }

    #[test]
    fn test_masked_rows_are_zero() {
        let device = Device::Cpu;
        let mask = Tensor::from_vec(vec![1u8, 0], (1, 2), &device).unwrap();
        for combiner in [MessageCombiner::Concat, MessageCombiner::Sum] {
            let out = ContextCombiner::new(combiner)
                .forward(&layers(&device), &mask)
                .unwrap()
                .to_vec3::<f32>()
                .unwrap();
            assert!(out[0][0].iter().all(|&v| v != 0.0));
            assert!(out[0][1].iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_empty_sequence_rejected() {
        for combiner in [MessageCombiner::Concat, MessageCombiner::Sum] {
            assert!(matches!(
                ContextCombiner::new(combiner).combine(&[]),
                Err(Error::EmptySequence("iterations"))
            ));
        }
    }
}
