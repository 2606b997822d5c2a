use crate::store::{ArrayStore, StoreError};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis, Slice};
use std::path::Path;
use thiserror::Error;

/// Name of the posterior dataset when none is given.
pub const DEFAULT_DATASET: &str = "samples";

#[derive(Error, Debug)]
pub enum SampleError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Thinning stride must be at least 1, got {0}.")]
    ZeroStride(usize),
    #[error("Posterior sample set is empty.")]
    Empty,
}

/// Posterior draws, one parameter vector per row.
#[derive(Debug, Clone)]
pub struct PosteriorSamples {
    draws: Array2<f64>,
}

impl PosteriorSamples {
    pub fn new(draws: Array2<f64>) -> Result<Self, SampleError> {
        if draws.nrows() == 0 {
            return Err(SampleError::Empty);
        }
        Ok(Self { draws })
    }

    /// Reads the dataset `dataset` from the array store at `path`.
    pub fn load(path: &Path, dataset: &str) -> Result<Self, SampleError> {
        let mut store = ArrayStore::load(path)?;
        let draws = store.take_matrix(dataset)?;
        log::info!(
            "Loaded {} posterior samples with {} parameters from '{}'.",
            draws.nrows(),
            draws.ncols(),
            path.display()
        );
        Self::new(draws)
    }

    pub fn len(&self) -> usize {
        self.draws.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.nrows() == 0
    }

    pub fn num_params(&self) -> usize {
        self.draws.ncols()
    }

    /// Every `stride`-th draw, starting with the first.
    pub fn thinned(&self, stride: usize) -> Result<ArrayView2<'_, f64>, SampleError> {
        if stride == 0 {
            return Err(SampleError::ZeroStride(stride));
        }
        Ok(self
            .draws
            .slice_axis(Axis(0), Slice::new(0, None, stride as isize)))
    }

    /// Number of draws left after thinning with `stride`.
    pub fn thinned_len(&self, stride: usize) -> Result<usize, SampleError> {
        Ok(self.thinned(stride)?.nrows())
    }

    pub fn iter_thinned(
        &self,
        stride: usize,
    ) -> Result<impl ExactSizeIterator<Item = ArrayView1<'_, f64>>, SampleError> {
        if stride == 0 {
            return Err(SampleError::ZeroStride(stride));
        }
        Ok(self.draws.axis_iter(Axis(0)).step_by(stride))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed(n: usize) -> PosteriorSamples {
        let draws = Array2::from_shape_fn((n, 3), |(i, j)| (i * 10 + j) as f64);
        PosteriorSamples::new(draws).unwrap()
    }

    #[test]
    fn stride_two_keeps_even_rows() {
        let samples = indexed(100);
        let rows: Vec<f64> = samples.iter_thinned(2).unwrap().map(|row| row[0]).collect();
        assert_eq!(rows.len(), 50);
        let expected: Vec<f64> = (0..100).step_by(2).map(|i| (i * 10) as f64).collect();
        assert_eq!(rows, expected);
    }

    #[test]
    fn stride_larger_than_set_keeps_first_row() {
        let samples = indexed(5);
        assert_eq!(samples.thinned_len(10).unwrap(), 1);
        assert_eq!(samples.thinned_len(1).unwrap(), 5);
        assert_eq!(samples.thinned_len(3).unwrap(), 2);
    }

    #[test]
    fn zero_stride_is_rejected() {
        assert!(matches!(
            indexed(4).thinned(0),
            Err(SampleError::ZeroStride(0))
        ));
    }

    #[test]
    fn empty_sets_are_rejected() {
        let err = PosteriorSamples::new(Array2::zeros((0, 4))).unwrap_err();
        assert!(matches!(err, SampleError::Empty));
    }
}
