use crate::error::SearchError;
use crate::linalg;
use crate::numeric::Precision;
use ndarray::prelude::*;
use rug::float::Round;
use rug::ops::{AddAssignRound, AssignRound, DivAssignRound, MulAssignRound, NegAssign};
use rug::{Assign, Float};
use std::fmt;
use std::mem::swap;
use std::str::FromStr;

const STAGE: &str = "while updating approximate inverse Hessian";

/// Inverse Hessian update rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateRule {
    /// Classic BFGS secant update
    #[default]
    Bfgs,
    /// BFGS on a gradient change corrected by the function value decrease
    ModifiedBfgs,
}

impl fmt::Display for UpdateRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UpdateRule::Bfgs => write!(f, "bfgs"),
            UpdateRule::ModifiedBfgs => write!(f, "modified-bfgs"),
        }
    }
}

impl FromStr for UpdateRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bfgs" => Ok(UpdateRule::Bfgs),
            "modified-bfgs" | "modified" | "mbfgs" => Ok(UpdateRule::ModifiedBfgs),
            _ => Err(format!("unknown update rule '{}'", s)),
        }
    }
}

/// Function values and gradient at the start of an accepted step, plus the
/// value reached at its end. Only the modified rule reads it.
#[derive(Debug, Clone, Copy)]
pub struct Curvature<'a> {
    pub f_old: &'a Float,
    pub f_new: &'a Float,
    pub grad_old: &'a Array1<Float>,
}

/// Scratch storage for the rank-two correction
struct Workspace {
    kappa: Array1<Float>,
    theta: Float,
    lambda: Float,
    sigma: Float,
    beta: Float,
    alpha: Float,
    tmp: Float,
}

impl Workspace {
    /// H += alpha (kappa d^T + d kappa^T) with
    /// kappa = H y - beta d, beta = t lambda sigma / 2, alpha = -t / lambda,
    /// lambda = t (y . d), sigma = (lambda + y^T H y) / lambda^2.
    ///
    /// Each off-diagonal increment is computed once and added to both
    /// mirrored entries, so a symmetric matrix stays exactly symmetric.
    fn apply(
        &mut self,
        inv_hessian: &mut Array2<Float>,
        y: &Array1<Float>,
        t: &Float,
        d: &Array1<Float>,
        round: Round,
    ) -> Result<(), SearchError> {
        let n = d.len();
        linalg::set_mat_vec(&mut self.kappa, inv_hessian, y, round);
        linalg::dot(&mut self.theta, y, &self.kappa, round);
        linalg::dot(&mut self.lambda, y, d, round);
        self.lambda.mul_assign_round(t, round);

        self.beta.assign_round(self.lambda.square_ref(), round);
        self.sigma.assign_round(&self.lambda + &self.theta, round);
        self.sigma.div_assign_round(&self.beta, round);

        self.beta.assign_round(t * &self.lambda, round);
        self.beta.mul_assign_round(&self.sigma, round);
        self.beta >>= 1u32;
        if self.beta.is_nan() {
            return Err(SearchError::NumericalFault { stage: STAGE });
        }

        for i in 0..n {
            self.tmp.assign_round(&self.beta * &d[i] - &self.kappa[i], round);
            self.tmp.neg_assign();
            swap(&mut self.kappa[i], &mut self.tmp);
        }

        self.alpha.assign_round(t / &self.lambda, round);
        self.alpha.neg_assign();
        if self.alpha.is_nan() {
            return Err(SearchError::NumericalFault { stage: STAGE });
        }

        for i in 0..n {
            for j in i..n {
                self.tmp.assign_round(&self.kappa[i] * &d[j], round);
                self.tmp.add_assign_round(&d[i] * &self.kappa[j], round);
                inv_hessian[[i, j]].add_assign_round(&self.alpha * &self.tmp, round);
                if i != j {
                    inv_hessian[[j, i]].add_assign_round(&self.alpha * &self.tmp, round);
                }
            }
        }

        if inv_hessian.iter().any(|h| h.is_nan()) {
            return Err(SearchError::NumericalFault { stage: STAGE });
        }
        Ok(())
    }
}

/// Rank-two correction of the approximate inverse Hessian after an accepted step.
///
/// The step is `t * d` where `d` is the unit search direction and `t` the
/// accepted step size. Every buffer is sized once for the run's dimension and
/// precision.
pub struct HessianUpdater {
    rule: UpdateRule,
    round: Round,
    work: Workspace,
    y_mod: Array1<Float>,
    rho: Float,
    phi: Float,
}

impl HessianUpdater {
    pub fn new(dimension: usize, precision: Precision, rule: UpdateRule) -> Self {
        HessianUpdater {
            rule,
            round: precision.round,
            work: Workspace {
                kappa: precision.vector(dimension),
                theta: precision.zero(),
                lambda: precision.zero(),
                sigma: precision.zero(),
                beta: precision.zero(),
                alpha: precision.zero(),
                tmp: precision.zero(),
            },
            y_mod: precision.vector(dimension),
            rho: precision.zero(),
            phi: precision.zero(),
        }
    }

    pub fn rule(&self) -> UpdateRule {
        self.rule
    }

    /// Apply the configured rule
    pub fn apply(
        &mut self,
        inv_hessian: &mut Array2<Float>,
        gradient_delta: &Array1<Float>,
        step_size: &Float,
        step_direction: &Array1<Float>,
        curvature: Curvature<'_>,
    ) -> Result<(), SearchError> {
        match self.rule {
            UpdateRule::Bfgs => self.update(inv_hessian, gradient_delta, step_size, step_direction),
            UpdateRule::ModifiedBfgs => {
                self.update_modified(inv_hessian, gradient_delta, step_size, step_direction, curvature)
            }
        }
    }

    /// Classic BFGS update from the gradient change `gradient_delta`
    pub fn update(
        &mut self,
        inv_hessian: &mut Array2<Float>,
        gradient_delta: &Array1<Float>,
        step_size: &Float,
        step_direction: &Array1<Float>,
    ) -> Result<(), SearchError> {
        self.work.apply(inv_hessian, gradient_delta, step_size, step_direction, self.round)
    }

    /// BFGS update on the corrected gradient change y + phi s, where s = t d,
    /// phi = max(rho, 0) / (s . s) and
    /// rho = 2 (f_old - f_new) + s . (g_old + g_new).
    ///
    /// rho vanishes on quadratics, so the rule coincides with plain BFGS
    /// there and picks up third-order curvature elsewhere.
    pub fn update_modified(
        &mut self,
        inv_hessian: &mut Array2<Float>,
        gradient_delta: &Array1<Float>,
        step_size: &Float,
        step_direction: &Array1<Float>,
        curvature: Curvature<'_>,
    ) -> Result<(), SearchError> {
        let round = self.round;
        let work = &mut self.work;

        // s . (g_old + g_new) = t (d . y + 2 d . g_old)
        linalg::dot(&mut work.theta, step_direction, curvature.grad_old, round);
        work.theta <<= 1u32;
        linalg::dot(&mut work.lambda, step_direction, gradient_delta, round);
        work.lambda.add_assign_round(&work.theta, round);
        work.lambda.mul_assign_round(step_size, round);

        self.rho.assign_round(curvature.f_old - curvature.f_new, round);
        self.rho <<= 1u32;
        self.rho.add_assign_round(&work.lambda, round);
        if self.rho.is_nan() {
            return Err(SearchError::NumericalFault { stage: STAGE });
        }
        if self.rho.is_sign_negative() {
            self.rho.assign(0);
        }

        // s . s = t^2 (d . d)
        linalg::dot(&mut work.sigma, step_direction, step_direction, round);
        work.sigma.mul_assign_round(step_size, round);
        work.sigma.mul_assign_round(step_size, round);
        self.phi.assign_round(&self.rho / &work.sigma, round);
        if self.phi.is_nan() {
            return Err(SearchError::NumericalFault { stage: STAGE });
        }

        // y* = y + (phi t) d
        self.phi.mul_assign_round(step_size, round);
        linalg::set_axpy(&mut self.y_mod, &self.phi, step_direction, gradient_delta, round);

        self.work.apply(inv_hessian, &self.y_mod, step_size, step_direction, round)
    }
}
