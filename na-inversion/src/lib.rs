//! Ensemble Kalman Inversion: calibrates the free parameters of a model
//! against a fixed observation by repeatedly pulling an ensemble of
//! candidate parameter vectors toward it.
//!
//! The ensemble lives in an unconstrained space (see `transform`); the
//! forward map is an external, batched collaborator (`na_core::ForwardMap`)
//! which may flag failed members with non-finite output. Those are repaired
//! by the `resample` module before the update in `eki` ever sees them.
//!
//! ```no_run
//! # use na_inversion::{Init, InversionState, Prior, Resampler};
//! # fn run<F: na_core::ForwardMap>(forward_map: F, y: ndarray::Array1<f64>)
//! #   -> na_inversion::Result<()> {
//! let init = Init {
//!   priors: vec![Prior::new(0.5, 0.1, 0.0, 1.0)?],
//!   ensemble_count: 20,
//!   noise_covariance: 0.01.into(),
//!   forward_map,
//!   observations: y,
//!   resampler: Resampler::default(),
//! };
//! let mut state = InversionState::seeded(init, 1)?;
//! let best = state.iterate(10)?;
//! # Ok(()) }
//! ```

extern crate ndarray as nd;

pub use error::{Error, Result};
pub use inversion::{Init, InversionState};
pub use resample::{FitDistribution, ResampleReport, Resampler};
pub use summary::IterationSummary;
pub use transform::{Constrained, Prior};
pub use utils::NoiseCovariance;

pub mod eki;
pub mod ensemble;
pub mod error;
pub mod inversion;
pub mod resample;
pub mod summary;
pub mod transform;
pub mod utils;
