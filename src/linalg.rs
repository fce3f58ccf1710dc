use crate::error::SearchError;
use ndarray::prelude::*;
use rug::float::Round;
use rug::ops::{AddAssignRound, AssignRound, MulAssignRound, NegAssign};
use rug::{Assign, Float};

// Accumulations start from a plain product and continue with fused
// multiply-adds, so each term is rounded exactly once.

/// dst = v . w
pub fn dot(dst: &mut Float, v: &Array1<Float>, w: &Array1<Float>, round: Round) {
    dst.assign_round(&v[0] * &w[0], round);
    for i in 1..v.len() {
        dst.add_assign_round(&v[i] * &w[i], round);
    }
}

/// dst = ||v||_2
pub fn norm(dst: &mut Float, v: &Array1<Float>, round: Round) {
    dst.assign_round(v[0].square_ref(), round);
    for i in 1..v.len() {
        dst.add_assign_round(&v[i] * &v[i], round);
    }
    dst.sqrt_round(round);
}

/// dst = a * x + y
pub fn set_axpy(dst: &mut Array1<Float>, a: &Float, x: &Array1<Float>, y: &Array1<Float>, round: Round) {
    for i in 0..dst.len() {
        dst[i].assign_round(a * &x[i] + &y[i], round);
    }
}

/// dst = x - y
pub fn set_sub(dst: &mut Array1<Float>, x: &Array1<Float>, y: &Array1<Float>, round: Round) {
    for i in 0..dst.len() {
        dst[i].assign_round(&x[i] - &y[i], round);
    }
}

/// dst = mat * vec
pub fn set_mat_vec(dst: &mut Array1<Float>, mat: &Array2<Float>, vec: &Array1<Float>, round: Round) {
    for i in 0..mat.nrows() {
        dst[i].assign_round(&mat[[i, 0]] * &vec[0], round);
        for j in 1..mat.ncols() {
            dst[i].add_assign_round(&mat[[i, j]] * &vec[j], round);
        }
    }
}

/// dst = src, keeping the precision of `dst`
pub fn set_copy(dst: &mut Array1<Float>, src: &Array1<Float>, round: Round) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        d.assign_round(s, round);
    }
}

/// Overwrite a square matrix with the identity
pub fn set_identity(mat: &mut Array2<Float>) {
    for ((i, j), entry) in mat.indexed_iter_mut() {
        entry.assign(if i == j { 1 } else { 0 });
    }
}

/// Scale `v` by `-1 / ||v||`, leaving the reciprocal norm in `tmp`.
///
/// A zero or non-finite norm has no unit direction and is reported as a
/// numerical fault tagged with `stage`.
pub fn negate_and_normalize(
    v: &mut Array1<Float>,
    tmp: &mut Float,
    round: Round,
    stage: &'static str,
) -> Result<(), SearchError> {
    norm(tmp, v, round);
    if tmp.is_zero() || !tmp.is_finite() {
        return Err(SearchError::NumericalFault { stage });
    }
    tmp.recip_round(round);
    tmp.neg_assign();
    for x in v.iter_mut() {
        x.mul_assign_round(&*tmp, round);
    }
    Ok(())
}

/// Elementwise numerical equality
pub fn bitwise_eq(a: &Array1<Float>, b: &Array1<Float>) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

pub fn has_nan(v: &Array1<Float>) -> bool {
    v.iter().any(|x| x.is_nan())
}

pub fn is_symmetric(mat: &Array2<Float>) -> bool {
    let n = mat.nrows();
    (0..n).all(|i| (i + 1..n).all(|j| mat[[i, j]] == mat[[j, i]]))
}
