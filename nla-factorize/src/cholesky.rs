use nd::{Array, ArrayBase, Data, DataMut, Ix2};
use num_traits::{Float, Zero};

use crate::FactorizeError;

pub trait Cholesky {
  type LMatrix: Sized;
  /// Returns the upper triangular factor, R, of A = R^*R.
  fn l_lstar(self) -> Result<Self::LMatrix, FactorizeError>;
}

impl<S> Cholesky for ArrayBase<S, Ix2>
  where S: DataMut,
        S::Elem: Float,
{
  type LMatrix = ArrayBase<S, Ix2>;

  fn l_lstar(self) -> Result<Self::LMatrix, FactorizeError> {
    let (m, n) = self.dim();
    if m != n {
      return Err(FactorizeError::NotSquare(m, n));
    }
    let mut r = self;

    for k in 0..m {
      let pivot = r[[k, k]];
      if !(pivot > S::Elem::zero()) || !pivot.is_finite() {
        return Err(FactorizeError::NotPositiveDefinite(k));
      }

      for j in k + 1..m {
        let factor = r[[k, j]] / pivot;
        for i in j..m {
          let t = r[[k, i]] * factor;
          r[[j, i]] = r[[j, i]] - t;
        }
      }

      let t = pivot.sqrt().recip();
      r.row_mut(k)
        .slice_mut(s![k..])
        .mapv_inplace(|v| v * t );
    }

    for k in 0..m {
      r.row_mut(k)
        .slice_mut(s![..k])
        .fill(S::Elem::zero());
    }

    Ok(r)
  }
}

/// Solves `A X = B` given the upper factor `R` of `A = R^T R`.
pub fn cholesky_solve<E, S1, S2>(r: &ArrayBase<S1, Ix2>, b: &ArrayBase<S2, Ix2>)
  -> Result<Array<E, Ix2>, FactorizeError>
  where E: Float,
        S1: Data<Elem = E>,
        S2: Data<Elem = E>,
{
  let n = r.nrows();
  if b.nrows() != n {
    return Err(FactorizeError::Rhs { expected: n, found: b.nrows(), });
  }

  let mut x = b.to_owned();
  for mut col in x.columns_mut() {
    // R^T z = b
    for i in 0..n {
      let mut sum = col[i];
      for k in 0..i {
        sum = sum - r[[k, i]] * col[k];
      }
      col[i] = sum / r[[i, i]];
    }
    // R x = z
    for i in (0..n).rev() {
      let mut sum = col[i];
      for k in i + 1..n {
        sum = sum - r[[i, k]] * col[k];
      }
      col[i] = sum / r[[i, i]];
    }
  }

  Ok(x)
}

#[test]
fn cholesky_llstar() {
  use nd::arr2;

  let a = arr2(&[
    [4.0, 12.0, -16.0],
    [12.0, 37.0, -43.0],
    [-16.0, -43.0, 98.0],
  ]);

  let l = a.l_lstar().expect("cholesky factorization failed");

  let expected = arr2(&[
    [2.0, 6.0, -8.0],
    [0.0, 1.0, 5.0],
    [0.0, 0.0, 3.0],
  ]);
  assert_eq!(l, expected);
}

#[test]
fn cholesky_solve_recovers_rhs() {
  use approx::assert_abs_diff_eq;
  use nd::arr2;

  let a = arr2(&[
    [4.0, 12.0, -16.0],
    [12.0, 37.0, -43.0],
    [-16.0, -43.0, 98.0],
  ]);
  let b = arr2(&[
    [1.0, 0.0],
    [2.0, 1.0],
    [3.0, -1.0],
  ]);
  let r = a.clone().l_lstar().unwrap();
  let x = cholesky_solve(&r, &b).unwrap();
  let ax = a.dot(&x);
  for (l, r) in ax.iter().zip(b.iter()) {
    assert_abs_diff_eq!(*l, *r, epsilon = 1e-9);
  }
}

#[test]
fn not_positive_definite() {
  use nd::arr2;

  let a = arr2(&[
    [1.0, 2.0],
    [2.0, 1.0],
  ]);
  assert_eq!(a.l_lstar(), Err(FactorizeError::NotPositiveDefinite(1)));

  let a = arr2(&[[1.0, 0.0, 0.0]]);
  assert_eq!(a.l_lstar(), Err(FactorizeError::NotSquare(1, 3)));
}
