//! Moves parameters between their bounded physical ("constrained")
//! representation and the unconstrained space the ensemble lives in.
//!
//! Every parameter uses the same bijection
//!
//! ```text
//! θ = lower + (upper - lower) · sigmoid(scale · x + shift)
//! ```
//!
//! where `x` is standard normal in unconstrained space. `scale` and `shift`
//! are fit once, when the `Prior` is built, so that pushing `N(0, 1)` through
//! the bijection reproduces the requested mean and standard deviation.

use std::f64::consts::PI;

use nd::{Array, ArrayBase, ArrayView, Axis, Data, Ix1, Ix2, RemoveAxis};
use rand_distr::StandardNormal;

use na_core::ForwardMap;

use crate::{Error, Result};

const QUADRATURE_HALF_WIDTH: f64 = 8.0;
const QUADRATURE_POINTS: usize = 401;
const BISECTION_STEPS: usize = 64;
const MAX_SCALE: f64 = 1.0e4;

/// A bounded prior with a target mean and standard deviation in physical
/// units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prior {
  mean: f64,
  std: f64,
  lower: f64,
  upper: f64,

  scale: f64,
  shift: f64,
}

impl Prior {
  pub fn new(mean: f64, std: f64, lower: f64, upper: f64) -> Result<Prior> {
    let invalid = |reason| Error::InvalidPrior {
      mean, std, lower, upper, reason,
    };

    if ![mean, std, lower, upper].iter().all(|v| v.is_finite()) {
      return Err(invalid("mean, std and bounds must be finite"));
    }
    if !(lower < mean && mean < upper) {
      return Err(invalid("bounds must strictly contain the mean"));
    }
    if !(std > 0.0) {
      return Err(invalid("std must be positive"));
    }

    let width = upper - lower;
    let p = (mean - lower) / width;
    let target = std / width;
    // No distribution on the interval with this mean spreads further than
    // a two point mass on the bounds.
    if target >= (p * (1.0 - p)).sqrt() {
      return Err(invalid("std is unattainable inside the bounds"));
    }

    let (scale, shift) = fit(p, target)
      .ok_or_else(|| invalid("couldn't fit the transform to the mean and std"))?;

    Ok(Prior {
      mean, std, lower, upper,
      scale, shift,
    })
  }

  pub fn mean(&self) -> f64 { self.mean }
  pub fn std(&self) -> f64 { self.std }
  pub fn lower(&self) -> f64 { self.lower }
  pub fn upper(&self) -> f64 { self.upper }
  pub fn scale(&self) -> f64 { self.scale }
  pub fn shift(&self) -> f64 { self.shift }

  /// Always lands strictly inside `(lower, upper)` for finite `x`, even
  /// where the sigmoid saturates.
  pub fn to_constrained_value(&self, x: f64) -> f64 {
    if x.is_nan() {
      return f64::NAN;
    }

    let z = self.scale * x + self.shift;
    let width = self.upper - self.lower;
    let theta = if z >= 0.0 {
      self.upper - width * sigmoid(-z)
    } else {
      self.lower + width * sigmoid(z)
    };

    theta
      .max(next_toward(self.lower, self.upper))
      .min(next_toward(self.upper, self.lower))
  }

  /// Inverse of `to_constrained_value`. NaN outside `(lower, upper)`.
  pub fn to_unconstrained_value(&self, theta: f64) -> f64 {
    let logit = ((theta - self.lower) / (self.upper - theta)).ln();
    (logit - self.shift) / self.scale
  }

  /// `dθ/dx` at `x`.
  pub fn derivative(&self, x: f64) -> f64 {
    let s = sigmoid(self.scale * x + self.shift);
    (self.upper - self.lower) * self.scale * s * (1.0 - s)
  }
}

/// The unconstrained distribution of every prior: a unit normal. The prior's
/// shape is carried entirely by its bijection.
pub fn to_unconstrained(_prior: &Prior) -> StandardNormal {
  StandardNormal
}

/// Maps unconstrained values to physical units, row `i` through
/// `priors[i]`. Works on a single parameter vector or on a whole
/// `Nθ × Nensemble` ensemble.
pub fn to_constrained<S, D>(priors: &[Prior], x: &ArrayBase<S, D>) -> Result<Array<f64, D>>
  where S: Data<Elem = f64>,
        D: RemoveAxis,
{
  check_rows(priors, x.len_of(Axis(0)))?;

  let mut out = x.to_owned();
  for (mut row, prior) in out.axis_iter_mut(Axis(0)).zip(priors.iter()) {
    row.mapv_inplace(|v| prior.to_constrained_value(v) );
  }

  Ok(out)
}

/// Maps physical values back to unconstrained space.
pub fn to_unconstrained_values<S, D>(priors: &[Prior], theta: &ArrayBase<S, D>)
  -> Result<Array<f64, D>>
  where S: Data<Elem = f64>,
        D: RemoveAxis,
{
  check_rows(priors, theta.len_of(Axis(0)))?;

  let mut out = theta.to_owned();
  for (mut row, prior) in out.axis_iter_mut(Axis(0)).zip(priors.iter()) {
    row.mapv_inplace(|v| prior.to_unconstrained_value(v) );
  }

  Ok(out)
}

/// Pushes an unconstrained covariance `sigma` through the bijection.
///
/// This is the first order (delta method) approximation `J Σ Jᵀ`, with
/// `J = diag(dθ/dx)` evaluated at the unconstrained ensemble mean of
/// `ensemble`. It is not exact; treat the result as an estimate whose error
/// grows with the ensemble spread and with how close the mean sits to a
/// bound.
pub fn covariance_to_constrained(priors: &[Prior],
                                 ensemble: ArrayView<f64, Ix2>,
                                 sigma: ArrayView<f64, Ix2>)
  -> Result<Array<f64, Ix2>>
{
  check_rows(priors, ensemble.nrows())?;
  if sigma.dim() != (priors.len(), priors.len()) {
    return Err(Error::DimensionMismatch {
      what: "covariance rows and columns",
      expected: priors.len(),
      found: sigma.nrows().max(sigma.ncols()),
    });
  }

  let mean = crate::ensemble::ensemble_mean(ensemble);
  let jacobian: Array<f64, Ix1> = priors.iter()
    .zip(mean.iter())
    .map(|(prior, &x)| prior.derivative(x) )
    .collect();

  let mut out = sigma.to_owned();
  for ((i, j), v) in out.indexed_iter_mut() {
    *v *= jacobian[i] * jacobian[j];
  }

  Ok(out)
}

/// Adapts a map defined over physical parameters to the unconstrained
/// `ForwardMap` contract the engine drives.
#[derive(Debug, Clone)]
pub struct Constrained<M> {
  pub priors: Vec<Prior>,
  pub map: M,
}
impl<M> Constrained<M> {
  pub fn new(priors: Vec<Prior>, map: M) -> Constrained<M> {
    Constrained {
      priors,
      map,
    }
  }
}
impl<M> ForwardMap for Constrained<M>
  where M: ForwardMap,
{
  fn evaluate(&self, parameters: ArrayView<f64, Ix2>) -> na_core::Result<Array<f64, Ix2>> {
    let physical = to_constrained(&self.priors, &parameters)
      .map_err(|_| na_core::Error::Shape {
        expected: (self.priors.len(), parameters.ncols()),
        found: parameters.dim(),
      })?;
    self.map.evaluate(physical.view())
  }
}

fn check_rows(priors: &[Prior], rows: usize) -> Result<()> {
  if rows != priors.len() {
    return Err(Error::DimensionMismatch {
      what: "parameter rows vs. priors",
      expected: priors.len(),
      found: rows,
    });
  }
  Ok(())
}

fn sigmoid(z: f64) -> f64 {
  if z >= 0.0 {
    1.0 / (1.0 + (-z).exp())
  } else {
    let e = z.exp();
    e / (1.0 + e)
  }
}

/// One ulp from `bound` in the direction of `toward`.
fn next_toward(bound: f64, toward: f64) -> f64 {
  if bound == 0.0 {
    let tiny = f64::from_bits(1);
    return if toward > 0.0 { tiny } else { -tiny };
  }

  let bits = bound.to_bits();
  let up = toward > bound;
  if (bound > 0.0) == up {
    f64::from_bits(bits + 1)
  } else {
    f64::from_bits(bits - 1)
  }
}

/// `E[s]` and `E[s²]` for `s = sigmoid(scale · x + shift)`, `x ~ N(0, 1)`.
/// Trapezoidal rule; the integrand is smooth and the weight decays fast
/// enough that this converges geometrically.
fn sigmoid_moments(scale: f64, shift: f64) -> (f64, f64) {
  let h = 2.0 * QUADRATURE_HALF_WIDTH / (QUADRATURE_POINTS - 1) as f64;
  let norm = h / (2.0 * PI).sqrt();

  let mut m1 = 0.0;
  let mut m2 = 0.0;
  for k in 0..QUADRATURE_POINTS {
    let x = -QUADRATURE_HALF_WIDTH + k as f64 * h;
    let end = k == 0 || k == QUADRATURE_POINTS - 1;
    let w = if end { 0.5 } else { 1.0 } * (-0.5 * x * x).exp();
    let s = sigmoid(scale * x + shift);
    m1 += w * s;
    m2 += w * s * s;
  }

  (m1 * norm, m2 * norm)
}

/// The shift giving mean `p` on the unit interval. The mean is monotone in
/// the shift.
fn fit_shift(scale: f64, p: f64) -> f64 {
  let bound = 40.0 + 10.0 * scale;
  let (mut lo, mut hi) = (-bound, bound);
  for _ in 0..BISECTION_STEPS {
    let mid = 0.5 * (lo + hi);
    if sigmoid_moments(scale, mid).0 < p {
      lo = mid;
    } else {
      hi = mid;
    }
  }
  0.5 * (lo + hi)
}

/// Fits `(scale, shift)` for mean `p` and std `target` on the unit
/// interval. With the mean held fixed the std grows monotonically with the
/// scale.
fn fit(p: f64, target: f64) -> Option<(f64, f64)> {
  let std_at = |scale: f64| {
    let shift = fit_shift(scale, p);
    let (m1, m2) = sigmoid_moments(scale, shift);
    (m2 - m1 * m1).max(0.0).sqrt()
  };

  let mut hi = 1.0;
  while std_at(hi) < target {
    hi *= 2.0;
    if hi > MAX_SCALE {
      return None;
    }
  }

  let mut lo = 0.0;
  for _ in 0..BISECTION_STEPS {
    let mid = 0.5 * (lo + hi);
    if std_at(mid) < target {
      lo = mid;
    } else {
      hi = mid;
    }
  }

  let scale = 0.5 * (lo + hi);
  Some((scale, fit_shift(scale, p)))
}

#[cfg(test)]
mod tests {
  use super::*;

  use approx::assert_abs_diff_eq;
  use nd::{arr1, arr2, Array2};
  use proptest::prelude::*;
  use rand::SeedableRng;
  use rand::distributions::Distribution;
  use rand_isaac::Isaac64Rng;

  #[test]
  fn invalid_priors() {
    let cases = [
      (1.0, 0.1, 1.0, 2.0),
      (1.0, 0.1, 0.0, 1.0),
      (1.0, 0.1, 2.0, 0.0),
      (1.0, 0.0, 0.0, 2.0),
      (1.0, -0.1, 0.0, 2.0),
      (1.0, f64::NAN, 0.0, 2.0),
      (1.0, 0.1, f64::NEG_INFINITY, 2.0),
      // wider than any distribution on [0, 2] with mean 1
      (1.0, 1.0, 0.0, 2.0),
    ];
    for &(mean, std, lower, upper) in cases.iter() {
      match Prior::new(mean, std, lower, upper) {
        Err(Error::InvalidPrior { .. }) => {},
        other => panic!("{:?} accepted: {:?}", (mean, std, lower, upper), other),
      }
    }
  }

  #[test]
  fn fitted_moments_match_targets() {
    let mut rng = Isaac64Rng::seed_from_u64(7);
    let priors = [
      Prior::new(0.5, 0.1, 0.0, 1.0).unwrap(),
      Prior::new(3.0, 1.5, 1.0, 10.0).unwrap(),
      Prior::new(-2.0, 0.05, -2.5, 0.0).unwrap(),
    ];

    for prior in priors.iter() {
      let dist = to_unconstrained(prior);
      let n = 200_000;
      let samples: Vec<f64> = (0..n)
        .map(|_| {
          let x: f64 = dist.sample(&mut rng);
          prior.to_constrained_value(x)
        })
        .collect();
      let mean = samples.iter().sum::<f64>() / n as f64;
      let var = samples.iter()
        .map(|v| (v - mean).powi(2) )
        .sum::<f64>() / (n - 1) as f64;

      assert_abs_diff_eq!(mean, prior.mean(), epsilon = 0.01 * prior.std() + 1e-3);
      assert_abs_diff_eq!(var.sqrt(), prior.std(), epsilon = 0.02 * prior.std());
    }
  }

  #[test]
  fn saturated_inputs_stay_inside() {
    let prior = Prior::new(2.0, 0.5, 1.0, 4.0).unwrap();
    for &x in [f64::MAX, -f64::MAX, 1e300, -1e300, 750.0, -750.0].iter() {
      let theta = prior.to_constrained_value(x);
      assert!(theta > 1.0 && theta < 4.0, "x = {}, θ = {}", x, theta);
    }

    let prior = Prior::new(0.5, 0.1, 0.0, 1.0).unwrap();
    assert!(prior.to_constrained_value(-1e300) > 0.0);
  }

  #[test]
  fn matrix_and_vector_forms() {
    let priors = vec![
      Prior::new(0.5, 0.1, 0.0, 1.0).unwrap(),
      Prior::new(5.0, 1.0, 0.0, 20.0).unwrap(),
    ];
    let x = arr2(&[
      [0.0, 1.0, -1.0],
      [0.5, 0.0, 2.0],
    ]);
    let theta = to_constrained(&priors, &x).unwrap();
    assert_eq!(theta.dim(), (2, 3));
    for ((i, j), &v) in theta.indexed_iter() {
      assert_eq!(v, priors[i].to_constrained_value(x[[i, j]]));
    }

    let column = to_constrained(&priors, &x.column(2)).unwrap();
    assert_eq!(column, theta.column(2));

    let back = to_unconstrained_values(&priors, &theta).unwrap();
    for (a, b) in back.iter().zip(x.iter()) {
      assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
    }

    assert!(matches!(to_constrained(&priors[..1], &x),
                     Err(Error::DimensionMismatch { .. })));
  }

  #[test]
  fn delta_method_covariance() {
    let priors = vec![
      Prior::new(0.5, 0.1, 0.0, 1.0).unwrap(),
      Prior::new(5.0, 1.0, 0.0, 20.0).unwrap(),
    ];
    let ensemble = arr2(&[
      [-0.1, 0.1],
      [0.2, 0.4],
    ]);
    let sigma = arr2(&[
      [1.0, 0.5],
      [0.5, 2.0],
    ]);
    let c = covariance_to_constrained(&priors, ensemble.view(), sigma.view()).unwrap();
    let j0 = priors[0].derivative(0.0);
    let j1 = priors[1].derivative(0.3);
    assert_abs_diff_eq!(c[[0, 0]], j0 * j0, epsilon = 1e-12);
    assert_abs_diff_eq!(c[[0, 1]], 0.5 * j0 * j1, epsilon = 1e-12);
    assert_abs_diff_eq!(c[[1, 0]], c[[0, 1]], epsilon = 1e-12);
    assert_abs_diff_eq!(c[[1, 1]], 2.0 * j1 * j1, epsilon = 1e-12);

    let bad = Array2::<f64>::eye(3);
    assert!(covariance_to_constrained(&priors, ensemble.view(), bad.view()).is_err());
  }

  #[test]
  fn derivative_matches_finite_difference() {
    let prior = Prior::new(3.0, 1.5, 1.0, 10.0).unwrap();
    for &x in [-2.0, -0.3, 0.0, 1.7].iter() {
      let h = 1e-6;
      let fd = (prior.to_constrained_value(x + h) - prior.to_constrained_value(x - h)) / (2.0 * h);
      assert_abs_diff_eq!(prior.derivative(x), fd, epsilon = 1e-6);
    }
  }

  #[test]
  fn constrained_forward_map_sees_physical_units() {
    struct Echo;
    impl ForwardMap for Echo {
      fn evaluate(&self, p: ArrayView<f64, Ix2>) -> na_core::Result<Array<f64, Ix2>> {
        Ok(p.to_owned())
      }
    }

    let priors = vec![Prior::new(5.0, 1.0, 0.0, 20.0).unwrap()];
    let map = Constrained::new(priors.clone(), Echo);
    let x = arr2(&[[0.0, 1.0]]);
    let out = map.evaluate(x.view()).unwrap();
    assert_eq!(out, to_constrained(&priors, &x).unwrap());

    let wrong = Array2::zeros((2, 2));
    assert!(map.evaluate(wrong.view()).is_err());
  }

  #[test]
  fn unconstrained_draw_round_trips() {
    let priors = vec![
      Prior::new(0.5, 0.1, 0.0, 1.0).unwrap(),
      Prior::new(-2.0, 0.05, -2.5, 0.0).unwrap(),
    ];
    let mut rng = Isaac64Rng::seed_from_u64(11);
    for _ in 0..1000 {
      for prior in priors.iter() {
        let v: f64 = to_unconstrained(prior).sample(&mut rng);
        let back = prior.to_unconstrained_value(prior.to_constrained_value(v));
        assert_abs_diff_eq!(back, v, epsilon = 1e-8);
      }
    }
    let v = arr1(&[0.25, -1.0]);
    let back = to_unconstrained_values(&priors, &to_constrained(&priors, &v).unwrap()).unwrap();
    assert_abs_diff_eq!(back[0], 0.25, epsilon = 1e-9);
    assert_abs_diff_eq!(back[1], -1.0, epsilon = 1e-9);
  }

  proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn constrained_values_respect_bounds(lower in -100.0f64..100.0,
                                         width in 0.01f64..50.0,
                                         frac in 0.05f64..0.95,
                                         spread in 0.05f64..0.9,
                                         xs in prop::collection::vec(-1e6f64..1e6, 1..32)) {
      let upper = lower + width;
      let mean = lower + frac * width;
      let std = spread * (frac * (1.0 - frac)).sqrt() * width;
      let prior = Prior::new(mean, std, lower, upper).unwrap();
      for x in xs {
        let theta = prior.to_constrained_value(x);
        prop_assert!(theta > lower && theta < upper);
      }
    }
  }
}
