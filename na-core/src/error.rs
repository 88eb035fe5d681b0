
use thiserror::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
  /// A `Calibratable` was asked to override a field it doesn't expose.
  #[error("unknown free parameter `{0}`")]
  UnknownParameter(String),
  #[error("shape mismatch: expected {expected:?}, found {found:?}")]
  Shape {
    expected: (usize, usize),
    found: (usize, usize),
  },
  /// The model itself gave up (as opposed to flagging a member with NaNs).
  #[error("model failure: {0}")]
  Model(String),
}
