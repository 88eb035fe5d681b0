//! Synthetic observations for twin experiments, and the output
//! normalization shared by the observation and the forward map.

use nd::{Array, ArrayView, Axis, Ix1, Ix2};
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_isaac::Isaac64Rng;
use tracing::debug;

use na_core::{Error, ForwardMap, Observation, Result};

/// Affine rescaling applied row-wise to forward map output.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalization {
  Identity,
  /// `(g - mean) / scale`
  ZScore {
    mean: Array<f64, Ix1>,
    scale: Array<f64, Ix1>,
  },
}
impl Default for Normalization {
  fn default() -> Self { Normalization::Identity }
}
impl Normalization {
  /// Per-row mean and standard deviation over the finite columns of
  /// `samples`. Rows without spread keep a unit scale.
  pub fn fit(samples: ArrayView<f64, Ix2>) -> Result<Normalization> {
    let finite: Vec<_> = samples.axis_iter(Axis(1))
      .filter(|c| c.iter().all(|v| v.is_finite() ) )
      .collect();
    if finite.len() < 2 {
      return Err(Error::Model(format!("need at least two finite samples to normalize, got {}",
                                      finite.len())));
    }

    let rows = samples.nrows();
    let n = finite.len() as f64;
    let mut mean = Array::zeros(rows);
    for c in finite.iter() {
      mean += c;
    }
    mean /= n;

    let mut var: Array<f64, Ix1> = Array::zeros(rows);
    for c in finite.iter() {
      let d = c - &mean;
      var += &(&d * &d);
    }
    var /= n - 1.0;
    let scale = var.mapv(|v| if v > 0.0 { v.sqrt() } else { 1.0 } );

    Ok(Normalization::ZScore { mean, scale, })
  }

  pub fn apply(&self, mut output: Array<f64, Ix2>) -> Result<Array<f64, Ix2>> {
    match self {
      Normalization::Identity => {},
      Normalization::ZScore { mean, scale, } => {
        if mean.len() != output.nrows() || scale.len() != output.nrows() {
          return Err(Error::Shape {
            expected: (mean.len(), output.ncols()),
            found: output.dim(),
          });
        }
        for mut column in output.axis_iter_mut(Axis(1)) {
          column -= mean;
          column /= scale;
        }
      },
    }

    Ok(output)
  }

  pub fn apply_vector(&self, output: Array<f64, Ix1>) -> Result<Array<f64, Ix1>> {
    let out = self.apply(output.insert_axis(Axis(1)))?;
    Ok(out.index_axis_move(Axis(1), 0))
  }
}

/// A forward map whose output is normalized before it is handed back.
#[derive(Debug, Clone)]
pub struct Normalized<F> {
  pub normalization: Normalization,
  pub map: F,
}
impl<F> ForwardMap for Normalized<F>
  where F: ForwardMap,
{
  fn evaluate(&self, parameters: ArrayView<f64, Ix2>) -> Result<Array<f64, Ix2>> {
    let out = self.map.evaluate(parameters)?;
    self.normalization.apply(out)
  }
}

/// The observation of a twin experiment: the forward map at a known
/// parameter vector plus seeded Gaussian noise.
///
/// `truth` is in the map's own input space. Some maps only accept full
/// ensembles, so the truth is broadcast to `batch` columns and the first
/// output column is kept.
#[derive(Debug, Clone)]
pub struct SyntheticObservation<F> {
  pub forward_map: F,
  pub truth: Array<f64, Ix1>,
  pub batch: usize,
  /// standard deviation of the added noise, in output units
  pub noise_std: f64,
  pub seed: u64,
}
impl<F> Observation for SyntheticObservation<F>
  where F: ForwardMap,
{
  fn observation_vector(&self) -> Result<Array<f64, Ix1>> {
    let batch = self.batch.max(1);
    let x = self.truth
      .view()
      .insert_axis(Axis(1));
    let x = x.broadcast((self.truth.len(), batch))
      .ok_or(Error::Shape {
        expected: (self.truth.len(), batch),
        found: (self.truth.len(), 1),
      })?
      .to_owned();

    let g = self.forward_map.evaluate(x.view())?;
    if g.ncols() != batch {
      return Err(Error::Shape {
        expected: (g.nrows(), batch),
        found: g.dim(),
      });
    }
    let mut y = g.index_axis_move(Axis(1), 0);
    if !y.iter().all(|v| v.is_finite() ) {
      return Err(Error::Model("forward map failed at the true parameters".into()));
    }

    if !(self.noise_std >= 0.0) || !self.noise_std.is_finite() {
      return Err(Error::Model(format!("invalid observation noise {}", self.noise_std)));
    }
    let mut rand = Isaac64Rng::seed_from_u64(self.seed);
    for v in y.iter_mut() {
      let z: f64 = rand.sample(StandardNormal);
      *v += self.noise_std * z;
    }

    debug!(observations = y.len(), noise_std = self.noise_std, "synthetic observation drawn");
    Ok(y)
  }
}
