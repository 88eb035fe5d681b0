
extern crate ndarray as nd;

use nd::prelude::*;
use rayon::prelude::*;
use tracing::trace;

use na_core::{Calibratable, Error, ForwardMap, Result};

/// Number of rows `L63Statistics` produces: ⟨x⟩, ⟨z⟩, ⟨x²⟩, ⟨z²⟩, ⟨xy⟩.
pub const STATISTICS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct L63Model {
  pub sigma: f64,
  pub rho: f64,
  pub beta: f64,
}
impl L63Model {
  pub fn rhs(&self, y: [f64; 3]) -> [f64; 3] {
    [
      self.sigma * (y[1] - y[0]),
      y[0] * (self.rho - y[2]) - y[1],
      y[0] * y[1] - self.beta * y[2],
    ]
  }

  pub fn rk4_step(&self, y: [f64; 3], dt: f64) -> [f64; 3] {
    let shift = |y: [f64; 3], k: [f64; 3], h: f64| {
      [y[0] + h * k[0], y[1] + h * k[1], y[2] + h * k[2]]
    };

    let k1 = self.rhs(y);
    let k2 = self.rhs(shift(y, k1, dt / 2.0));
    let k3 = self.rhs(shift(y, k2, dt / 2.0));
    let k4 = self.rhs(shift(y, k3, dt));

    let mut out = y;
    for i in 0..3 {
      out[i] += dt / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
    }
    out
  }

  /// Integrates from `initial`, drops `spin_up` steps, then averages the
  /// statistics over `steps` more. `None` once the trajectory leaves the
  /// ball of radius `bound` or stops being finite.
  pub fn time_averages(&self, initial: [f64; 3], dt: f64,
                       spin_up: usize, steps: usize,
                       bound: f64) -> Option<[f64; STATISTICS]>
  {
    let escaped = |y: &[f64; 3]| {
      !y.iter().all(|v| v.is_finite() && v.abs() <= bound )
    };

    let mut y = initial;
    for _ in 0..spin_up {
      y = self.rk4_step(y, dt);
      if escaped(&y) { return None; }
    }

    let mut sums = [0.0; STATISTICS];
    for _ in 0..steps {
      y = self.rk4_step(y, dt);
      if escaped(&y) { return None; }

      sums[0] += y[0];
      sums[1] += y[2];
      sums[2] += y[0] * y[0];
      sums[3] += y[2] * y[2];
      sums[4] += y[0] * y[1];
    }

    let n = steps.max(1) as f64;
    for s in sums.iter_mut() {
      *s /= n;
    }
    Some(sums)
  }
}
impl Default for L63Model {
  fn default() -> Self {
    L63Model {
      sigma: 10.0,
      rho: 28.0,
      beta: 8.0 / 3.0,
    }
  }
}
impl Calibratable for L63Model {
  const FREE_PARAMETERS: &'static [&'static str] = &["sigma", "rho", "beta"];

  fn with_parameter(&self, name: &str, value: f64) -> Result<Self> {
    let mut out = *self;
    match name {
      "sigma" => out.sigma = value,
      "rho" => out.rho = value,
      "beta" => out.beta = value,
      _ => return Err(Error::UnknownParameter(name.to_string())),
    }
    Ok(out)
  }
}

/// Time-averaged L63 statistics as a batched forward map over physical
/// closure coefficients. Row `i` of the input overrides `parameters[i]` of
/// `model`; members are integrated in parallel.
#[derive(Debug, Clone)]
pub struct L63Statistics {
  pub model: L63Model,
  pub parameters: Vec<&'static str>,
  pub initial: [f64; 3],
  pub dt: f64,
  pub spin_up: usize,
  pub steps: usize,
  /// Trajectories leaving this ball count as failed members.
  pub bound: f64,
}
impl L63Statistics {
  pub fn new(model: L63Model, parameters: Vec<&'static str>) -> L63Statistics {
    L63Statistics {
      model,
      parameters,
      initial: [1.0, 1.0, 1.0],
      dt: 0.01,
      spin_up: 500,
      steps: 4000,
      bound: 1.0e3,
    }
  }

  fn member(&self, theta: ArrayView1<f64>) -> Result<[f64; STATISTICS]> {
    let model = self.model.with_parameters(&self.parameters, theta)?;
    let stats = model.time_averages(self.initial, self.dt,
                                    self.spin_up, self.steps,
                                    self.bound);
    if stats.is_none() {
      trace!(?model, "trajectory diverged");
    }
    Ok(stats.unwrap_or([f64::NAN; STATISTICS]))
  }
}
impl ForwardMap for L63Statistics {
  fn evaluate(&self, parameters: ArrayView2<f64>) -> Result<Array2<f64>> {
    let members: Vec<_> = parameters.axis_iter(Axis(1))
      .into_par_iter()
      .map(|theta| self.member(theta) )
      .collect::<Result<_>>()?;

    let mut out = Array2::zeros((STATISTICS, members.len()));
    for (mut column, stats) in out.axis_iter_mut(Axis(1)).zip(members.iter()) {
      column.assign(&aview1(&stats[..]));
    }
    Ok(out)
  }
}
