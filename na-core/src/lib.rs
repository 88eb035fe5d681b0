//! Contracts between the inversion engine and the things it drives: the
//! batched forward map, the observation map, and closures which expose
//! some of their coefficients for calibration.

extern crate ndarray as nd;

use nd::{Array, ArrayView, Ix1, Ix2};

pub use error::{Error, Result};

pub mod error;

/// A batched forward map.
///
/// `parameters` is `Nθ × Nensemble`, one unconstrained parameter vector per
/// column. The output is `Nobs × Nensemble`. Each output column must depend
/// only on the matching input column. A member which could not be evaluated
/// is flagged by writing non-finite values into its column; returning `Err`
/// aborts whatever is driving the map.
pub trait ForwardMap {
  fn evaluate(&self, parameters: ArrayView<f64, Ix2>) -> Result<Array<f64, Ix2>>;
}

impl<'a, F> ForwardMap for &'a F
  where F: ForwardMap + ?Sized,
{
  fn evaluate(&self, parameters: ArrayView<f64, Ix2>) -> Result<Array<f64, Ix2>> {
    (**self).evaluate(parameters)
  }
}

/// Produces the fixed, normalized observation vector `y`. Called once.
pub trait Observation {
  fn observation_vector(&self) -> Result<Array<f64, Ix1>>;
}

impl Observation for Array<f64, Ix1> {
  fn observation_vector(&self) -> Result<Array<f64, Ix1>> {
    Ok(self.clone())
  }
}

/// A closure type which declares which of its numeric fields may be
/// calibrated.
///
/// Overrides are pure: they return a new value and leave `self` alone.
pub trait Calibratable: Sized {
  /// Ordered names of the calibratable fields.
  const FREE_PARAMETERS: &'static [&'static str];

  fn with_parameter(&self, name: &str, value: f64) -> Result<Self>;

  fn with_parameters(&self, names: &[&str], values: ArrayView<f64, Ix1>) -> Result<Self>
    where Self: Clone,
  {
    if names.len() != values.len() {
      return Err(Error::Shape {
        expected: (names.len(), 1),
        found: (values.len(), 1),
      });
    }

    names.iter()
      .zip(values.iter())
      .try_fold(self.clone(), |closure, (name, &value)| {
        closure.with_parameter(name, value)
      })
  }
}

/// Forward map plus call accounting.
#[derive(Debug)]
pub struct ModelStats<M> {
  pub model: M,
  /// Don't modify these; safe to read though.
  pub calls: u64,
  pub member_evaluations: u64,
}
impl<M> From<M> for ModelStats<M> {
  fn from(v: M) -> ModelStats<M> {
    ModelStats {
      model: v,
      calls: 0,
      member_evaluations: 0,
    }
  }
}
impl<M> ModelStats<M>
  where M: ForwardMap,
{
  /// Evaluates the whole batch and checks the output has one column per
  /// member.
  pub fn evaluate(&mut self, parameters: ArrayView<f64, Ix2>) -> Result<Array<f64, Ix2>> {
    let members = parameters.ncols();
    let out = self.model.evaluate(parameters)?;

    self.calls += 1;
    self.member_evaluations += members as u64;

    if out.ncols() != members {
      return Err(Error::Shape {
        expected: (out.nrows(), members),
        found: out.dim(),
      });
    }

    Ok(out)
  }
}
