//! Batched gather/scatter helpers.
//!
//! Every graph in a batch indexes its own rows, so lookups are per batch
//! element: `out[b, k] = table[b, ids[b, k]]`. Candle's `gather` and
//! `scatter_add` want index tensors with the same rank as the data, so the
//! `(batch, k)` ids are broadcast along the feature axis first.

use candle_core::{Result, Tensor, D};
use candle_nn::{Linear, Module};

/// Per-batch row lookup.
///
/// - `table`: (batch, rows, dim)
/// - `ids`: (batch, k), u32 row indices into `table[b]`
///
/// Returns (batch, k, dim).
pub fn batch_gather(table: &Tensor, ids: &Tensor) -> Result<Tensor> {
    let (b, _rows, dim) = table.dims3()?;
    let (_, k) = ids.dims2()?;
    let index = ids
        .unsqueeze(2)?
        .broadcast_as((b, k, dim))?
        .contiguous()?;
    table.contiguous()?.gather(&index, 1)
}

/// Concatenate inputs along the feature axis and apply one affine map.
pub fn batch_linear(inputs: &[&Tensor], linear: &Linear) -> Result<Tensor> {
    let x = Tensor::cat(inputs, D::Minus1)?;
    linear.forward(&x)
}

/// Add `values[b]` into rows `rows[b, j]` of `dst[b]` for every j.
///
/// - `dst`: (batch, num_rows, dim)
/// - `rows`: (batch, k), u32
/// - `values`: (batch, dim)
///
/// Returns a new (batch, num_rows, dim) tensor. Repeated rows accumulate.
pub fn scatter_accumulate(dst: &Tensor, rows: &Tensor, values: &Tensor) -> Result<Tensor> {
    let (b, k) = rows.dims2()?;
    let dim = values.dim(1)?;
    let index = rows
        .unsqueeze(2)?
        .broadcast_as((b, k, dim))?
        .contiguous()?;
    let src = values
        .unsqueeze(1)?
        .broadcast_as((b, k, dim))?
        .contiguous()?;
    dst.contiguous()?.scatter_add(&index, &src, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_batch_gather_per_element() {
        let device = Device::Cpu;
        // batch 0 rows: [0,0], [1,1]; batch 1 rows: [2,2], [3,3]
        let table = Tensor::from_vec(
            vec![0f32, 0., 1., 1., 2., 2., 3., 3.],
            (2, 2, 2),
            &device,
        )
        .unwrap();
        let ids = Tensor::from_vec(vec![1u32, 1, 0, 1], (2, 2), &device).unwrap();

        let out = batch_gather(&table, &ids).unwrap();
        assert_eq!(out.dims(), &[2, 2, 2]);
        assert_eq!(
            out.to_vec3::<f32>().unwrap(),
            vec![
                vec![vec![1., 1.], vec![1., 1.]],
                vec![vec![2., 2.], vec![3., 3.]],
            ]
        );
    }

    #[test]
    fn test_scatter_accumulate_duplicates() {
        let device = Device::Cpu;
        let dst = Tensor::zeros((1, 3, 2), DType::F32, &device).unwrap();
        let rows = Tensor::from_vec(vec![1u32, 1], (1, 2), &device).unwrap();
        let values = Tensor::from_vec(vec![0.5f32, -1.0], (1, 2), &device).unwrap();

        let out = scatter_accumulate(&dst, &rows, &values).unwrap();
        assert_eq!(
            out.to_vec3::<f32>().unwrap(),
            vec![vec![vec![0., 0.], vec![1.0, -2.0], vec![0., 0.]]]
        );
    }

    #[test]
    fn test_batch_linear_concatenates() {
        let device = Device::Cpu;
        // weight (1, 3) sums the concatenated features
        let weight = Tensor::ones((1, 3), DType::F32, &device).unwrap();
        let bias = Tensor::new(&[0.5f32], &device).unwrap();
        let linear = Linear::new(weight, Some(bias));

        let a = Tensor::ones((1, 2, 2), DType::F32, &device).unwrap();
        let b = Tensor::ones((1, 2, 1), DType::F32, &device).unwrap();
        let out = batch_linear(&[&a, &b], &linear).unwrap();
        assert_eq!(out.to_vec3::<f32>().unwrap(), vec![vec![vec![3.5], vec![3.5]]]);
    }
}
