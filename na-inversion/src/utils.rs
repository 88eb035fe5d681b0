
use nd::{Array, ArrayView, Ix1, Ix2};
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::{Error, Result};

/// Observation noise covariance `Γy`, as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum NoiseCovariance {
  /// `s · I`
  Scalar(f64),
  Diagonal(Array<f64, Ix1>),
  Full(Array<f64, Ix2>),
}
impl NoiseCovariance {
  /// Expands to the `n × n` matrix.
  pub fn to_matrix(&self, n: usize) -> Result<Array<f64, Ix2>> {
    match self {
      &NoiseCovariance::Scalar(s) => Ok(Array::eye(n) * s),
      &NoiseCovariance::Diagonal(ref d) => {
        check_len(n, d.len())?;
        Ok(Array::from_diag(d))
      },
      &NoiseCovariance::Full(ref m) => {
        check_len(n, m.nrows())?;
        check_len(n, m.ncols())?;
        Ok(m.clone())
      },
    }
  }
}
impl From<f64> for NoiseCovariance {
  fn from(v: f64) -> NoiseCovariance {
    NoiseCovariance::Scalar(v)
  }
}
impl From<Array<f64, Ix1>> for NoiseCovariance {
  fn from(v: Array<f64, Ix1>) -> NoiseCovariance {
    NoiseCovariance::Diagonal(v)
  }
}
impl From<Array<f64, Ix2>> for NoiseCovariance {
  fn from(v: Array<f64, Ix2>) -> NoiseCovariance {
    NoiseCovariance::Full(v)
  }
}

fn check_len(expected: usize, found: usize) -> Result<()> {
  if expected != found {
    return Err(Error::DimensionMismatch {
      what: "noise covariance vs. observations",
      expected,
      found,
    });
  }
  Ok(())
}

/// `count` draws from `N(mean, L Lᵀ)`, one per column.
pub fn make_2d_randn<R>(mean: ArrayView<f64, Ix1>,
                        lower: ArrayView<f64, Ix2>,
                        count: usize,
                        rand: &mut R) -> Array<f64, Ix2>
  where R: Rng + ?Sized,
{
  let z: Array<f64, Ix2> = Array::random_using((lower.ncols(), count), StandardNormal, rand);
  let mut r = lower.dot(&z);
  for mut column in r.columns_mut() {
    column += &mean;
  }

  r
}
