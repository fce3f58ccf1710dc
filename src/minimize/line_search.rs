use crate::error::SearchError;
use crate::linalg;
use crate::numeric::Precision;
use crate::objective::ObjFn;
use ndarray::prelude::*;
use rug::ops::{AddAssignRound, AssignRound, DivAssignRound, MulAssignRound, SubAssignRound};
use rug::{Assign, Float};
use std::mem::swap;

/// Line search result
#[derive(Debug, Clone)]
pub struct LineSearchResult {
    /// Best step size observed, zero if no sampled point improved on f0
    pub step: Float,
    /// Objective value at `step`
    pub value: Float,
    /// Number of objective evaluations performed
    pub evaluations: usize,
}

impl LineSearchResult {
    /// True when the search made no progress at the current precision
    pub fn is_zero(&self) -> bool {
        self.step.is_zero()
    }
}

/// The ray x0 + t * dx searched by a single call
struct Ray<'a, F: ?Sized> {
    f: &'a F,
    x0: &'a Array1<Float>,
    f0: &'a Float,
    dx: &'a Array1<Float>,
}

/// Evaluation workspace, including the best sample seen during the current search
struct Probe {
    xt: Array1<Float>,
    best_value: Float,
    best_step: Float,
    evaluations: usize,
}

impl Probe {
    fn reset(&mut self, f0: &Float) {
        self.best_value.assign(f0);
        self.best_step.assign(0);
        self.evaluations = 0;
    }

    /// Evaluate the objective at x0 + t * dx into `out`.
    ///
    /// Returns `false` without calling the objective when the point rounds
    /// back onto x0, in which case `out` receives f0.
    fn eval<F: ObjFn + ?Sized>(
        &mut self,
        ray: &Ray<'_, F>,
        t: &Float,
        out: &mut Float,
        p: &Precision,
    ) -> Result<bool, SearchError> {
        linalg::set_axpy(&mut self.xt, t, ray.dx, ray.x0, p.round);
        if linalg::bitwise_eq(&self.xt, ray.x0) {
            out.assign(ray.f0);
            return Ok(false);
        }
        out.assign_round(ray.f.call(&self.xt, p), p.round);
        self.evaluations += 1;
        if out.is_nan() {
            return Err(SearchError::NumericalFault {
                stage: "during quadratic line search",
            });
        }
        if *out < self.best_value {
            self.best_value.assign(&*out);
            self.best_step.assign(t);
        }
        Ok(true)
    }

    fn result(&self) -> LineSearchResult {
        LineSearchResult {
            step: self.best_step.clone(),
            value: self.best_value.clone(),
            evaluations: self.evaluations,
        }
    }
}

/// Quadratic-interpolation line search with geometric step doubling and halving.
///
/// All scratch values are allocated once at the run precision and reused
/// across calls. The returned step is always the best one sampled, which is
/// not necessarily the interpolated candidate.
pub struct QuadraticLineSearch {
    precision: Precision,
    max_doublings: usize,
    probe: Probe,
    step: Float,
    next_step: Float,
    f1: Float,
    f2: Float,
    numer: Float,
    denom: Float,
}

impl QuadraticLineSearch {
    pub const MAX_DOUBLINGS: usize = 4;

    pub fn new(dimension: usize, precision: Precision) -> Self {
        QuadraticLineSearch {
            precision,
            max_doublings: Self::MAX_DOUBLINGS,
            probe: Probe {
                xt: precision.vector(dimension),
                best_value: precision.zero(),
                best_step: precision.zero(),
                evaluations: 0,
            },
            step: precision.zero(),
            next_step: precision.zero(),
            f1: precision.zero(),
            f2: precision.zero(),
            numer: precision.zero(),
            denom: precision.zero(),
        }
    }

    /// Override the number of successive doublings allowed on a decreasing ray
    pub fn with_max_doublings(mut self, max_doublings: usize) -> Self {
        self.max_doublings = max_doublings.max(1);
        self
    }

    pub fn dimension(&self) -> usize {
        self.probe.xt.len()
    }

    /// Search along x0 + t * dx starting from `initial_step`.
    ///
    /// # Arguments
    /// * `f` - The objective function
    /// * `x0` - Origin of the ray
    /// * `f0` - Objective value at `x0`
    /// * `dx` - Search direction
    /// * `initial_step` - First step size to try
    pub fn search<F: ObjFn + ?Sized>(
        &mut self,
        f: &F,
        x0: &Array1<Float>,
        f0: &Float,
        dx: &Array1<Float>,
        initial_step: &Float,
    ) -> Result<LineSearchResult, SearchError> {
        let n = self.dimension();
        for len in [x0.len(), dx.len()] {
            if len != n {
                return Err(SearchError::DimensionMismatch {
                    expected: n,
                    found: len,
                });
            }
        }

        let p = self.precision;
        let round = p.round;
        let ray = Ray { f, x0, f0, dx };
        self.probe.reset(f0);

        self.step.assign(initial_step);
        self.probe.eval(&ray, &self.step, &mut self.f1, &p)?;

        if self.f1 < *f0 {
            // Decreasing: double while f keeps falling
            let mut doublings = 0;
            loop {
                self.next_step.assign(&self.step);
                self.next_step <<= 1u32;
                self.probe.eval(&ray, &self.next_step, &mut self.f2, &p)?;
                if self.f2 >= self.f1 {
                    break;
                }
                swap(&mut self.step, &mut self.next_step);
                swap(&mut self.f1, &mut self.f2);
                doublings += 1;
                if doublings >= self.max_doublings {
                    return Ok(self.probe.result());
                }
            }

            // Fit through (0, f0), (t, f1), (2t, f2)
            self.denom.assign(&self.f1);
            self.denom <<= 1u32;
            self.denom.sub_assign_round(&self.f2, round);
            self.denom.sub_assign_round(f0, round);
            self.numer.assign(&self.f1);
            self.numer <<= 2u32;
            self.numer.sub_assign_round(&self.f2, round);
            self.f1.assign_round(f0 * 3u32, round);
            self.numer.sub_assign_round(&self.f1, round);
            self.next_step.assign(&self.step);
            self.next_step >>= 1u32;
            self.next_step.mul_assign_round(&self.numer, round);
            self.next_step.div_assign_round(&self.denom, round);

            // Bracket is (0, 2t)
            self.numer.assign(&self.step);
            self.numer <<= 1u32;
        } else {
            // Increasing: halve until f drops below f0
            loop {
                self.next_step.assign(&self.step);
                self.next_step >>= 1u32;
                let changed = self.probe.eval(&ray, &self.next_step, &mut self.f2, &p)?;
                if !changed {
                    return Ok(self.probe.result());
                }
                if self.f2 < *f0 {
                    break;
                }
                swap(&mut self.step, &mut self.next_step);
                swap(&mut self.f1, &mut self.f2);
            }

            // Fit through (0, f0), (t/2, f2), (t, f1)
            self.f2 <<= 1u32;
            self.denom.assign_round(&self.f1 - &self.f2, round);
            self.denom.add_assign_round(f0, round);
            self.f2 <<= 1u32;
            self.numer.assign_round(&self.f1 - &self.f2, round);
            self.f1.assign_round(f0 * 3u32, round);
            self.numer.add_assign_round(&self.f1, round);
            self.next_step.assign(&self.step);
            self.next_step >>= 2u32;
            self.next_step.mul_assign_round(&self.numer, round);
            self.next_step.div_assign_round(&self.denom, round);

            // Bracket is (0, t)
            self.numer.assign(&self.step);
        }

        // An out-of-bracket fit falls back to half the bracket, which is the
        // interior sample already recorded by the probe.
        let in_bracket = self.next_step.is_finite()
            && self.next_step.is_sign_positive()
            && !self.next_step.is_zero()
            && self.next_step < self.numer;
        if in_bracket {
            self.probe.eval(&ray, &self.next_step, &mut self.f2, &p)?;
        }
        Ok(self.probe.result())
    }
}

#[cfg(test)]
mod minimize_line_search_tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// One-dimensional objective evaluated on x[0]
    #[derive(Clone)]
    struct OneDim<F>(F)
    where
        F: Fn(&Float, &Precision) -> Float + Clone;

    impl<F> ObjFn for OneDim<F>
    where
        F: Fn(&Float, &Precision) -> Float + Clone,
    {
        fn call(&self, x: &Array1<Float>, p: &Precision) -> Float {
            (self.0)(&x[0], p)
        }
    }

    /// Objective that keeps a log of every value it returns
    #[derive(Clone)]
    struct Recording<F: ObjFn + Clone> {
        inner: F,
        log: Rc<RefCell<Vec<Float>>>,
    }

    impl<F: ObjFn + Clone> ObjFn for Recording<F> {
        fn call(&self, x: &Array1<Float>, p: &Precision) -> Float {
            let value = self.inner.call(x, p);
            self.log.borrow_mut().push(value.clone());
            value
        }
    }

    fn ray(p: &Precision) -> (Array1<Float>, Array1<Float>) {
        (array![p.zero()], array![p.from_f64(1.0)])
    }

    fn parabola(center: f64, scale: f64) -> OneDim<impl Fn(&Float, &Precision) -> Float + Clone> {
        OneDim(move |x: &Float, p: &Precision| {
            let d = p.eval(x - center);
            p.eval(p.eval(d.square_ref()) / scale)
        })
    }

    #[test]
    fn test_quadratic_fit_after_doubling_overshoot() {
        // f(0) = 1, decreasing through t = 4, f(8) >= f(4)
        let p = Precision::new(128);
        let f = parabola(5.0, 25.0);
        let (x0, dx) = ray(&p);
        let f0 = f.call(&x0, &p);
        assert_eq!(f0.to_f64(), 1.0);

        let mut ls = QuadraticLineSearch::new(1, p);
        let result = ls.search(&f, &x0, &f0, &dx, &p.from_f64(1.0)).unwrap();

        let step = result.step.to_f64();
        assert!(step > 4.0 && step < 8.0, "step = {}", step);
        assert!((step - 5.0).abs() < 1e-20);
        assert!(result.value < p.from_f64(1.0 / 25.0));
        // t = 1, 2, 4, 8 and the fitted point
        assert_eq!(result.evaluations, 5);
    }

    #[test]
    fn test_doubling_limit() {
        let p = Precision::new(64);
        let f = OneDim(|x: &Float, p: &Precision| p.eval(1 / p.eval(x + 1)));
        let (x0, dx) = ray(&p);
        let f0 = f.call(&x0, &p);

        let mut ls = QuadraticLineSearch::new(1, p);
        let result = ls.search(&f, &x0, &f0, &dx, &p.from_f64(1.0)).unwrap();
        assert_eq!(result.step.to_f64(), 16.0);
        assert_eq!(result.evaluations, 5);

        let mut ls = QuadraticLineSearch::new(1, p).with_max_doublings(2);
        let result = ls.search(&f, &x0, &f0, &dx, &p.from_f64(1.0)).unwrap();
        assert_eq!(result.step.to_f64(), 4.0);
    }

    #[test]
    fn test_halving_then_fit() {
        let p = Precision::new(128);
        let f = parabola(0.3, 1.0);
        let (x0, dx) = ray(&p);
        let f0 = f.call(&x0, &p);

        let mut ls = QuadraticLineSearch::new(1, p);
        let result = ls.search(&f, &x0, &f0, &dx, &p.from_f64(4.0)).unwrap();
        assert!((result.step.to_f64() - 0.3).abs() < 1e-15);
        assert!(result.value < f0);
    }

    #[test]
    fn test_no_progress_returns_zero_step() {
        let p = Precision::new(64);
        let f = OneDim(|_: &Float, p: &Precision| p.from_f64(2.0));
        // halving stops once 1 + t rounds back to 1
        let x0 = array![p.from_f64(1.0)];
        let dx = array![p.from_f64(1.0)];
        let f0 = f.call(&x0, &p);

        let mut ls = QuadraticLineSearch::new(1, p);
        let result = ls.search(&f, &x0, &f0, &dx, &p.from_f64(1.0)).unwrap();
        assert!(result.is_zero());
        assert_eq!(result.value, f0);
        assert!(result.evaluations > 0);
    }

    #[test]
    fn test_zero_initial_step_skips_evaluation() {
        let p = Precision::new(64);
        let log = Rc::new(RefCell::new(Vec::new()));
        let f = Recording {
            inner: parabola(1.0, 1.0),
            log: log.clone(),
        };
        let (x0, dx) = ray(&p);
        let f0 = p.from_f64(1.0);

        let mut ls = QuadraticLineSearch::new(1, p);
        let result = ls.search(&f, &x0, &f0, &dx, &p.zero()).unwrap();
        assert!(result.is_zero());
        assert_eq!(result.evaluations, 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_result_is_best_sample() {
        let p = Precision::new(96);
        let log = Rc::new(RefCell::new(Vec::new()));
        // Quartic: the quadratic model misplaces the minimizer
        let f = Recording {
            inner: OneDim(|x: &Float, p: &Precision| {
                let d = p.eval(x - 5);
                let d2 = p.eval(d.square_ref());
                p.eval(p.eval(d2.square_ref()) / 625)
            }),
            log: log.clone(),
        };
        let (x0, dx) = ray(&p);
        let f0 = p.from_f64(1.0);

        let mut ls = QuadraticLineSearch::new(1, p);
        let result = ls.search(&f, &x0, &f0, &dx, &p.from_f64(1.0)).unwrap();
        let samples = log.borrow();
        assert_eq!(samples.len(), result.evaluations);
        assert!(samples.iter().all(|v| result.value <= *v));
        assert!(samples.iter().any(|v| *v == result.value));
    }

    #[test]
    fn test_search_is_deterministic() {
        let p = Precision::new(160);
        let f = parabola(0.7, 3.0);
        let x0 = array![p.from_f64(0.25), p.from_f64(-0.5)];
        let dx = array![p.from_f64(0.6), p.from_f64(0.8)];
        let f2 = OneDim(move |x: &Float, p: &Precision| (f.0)(x, p));
        let f0 = f2.call(&x0, &p);

        let mut ls = QuadraticLineSearch::new(2, p);
        let a = ls.search(&f2, &x0, &f0, &dx, &p.from_f64(0.1)).unwrap();
        let b = ls.search(&f2, &x0, &f0, &dx, &p.from_f64(0.1)).unwrap();
        assert_eq!(a.step, b.step);
        assert_eq!(a.value, b.value);
        assert_eq!(a.evaluations, b.evaluations);
    }

    #[test]
    fn test_dimension_mismatch() {
        let p = Precision::new(64);
        let f = parabola(1.0, 1.0);
        let x0 = array![p.zero(), p.zero()];
        let dx = array![p.from_f64(1.0)];
        let mut ls = QuadraticLineSearch::new(1, p);
        let err = ls.search(&f, &x0, &p.from_f64(1.0), &dx, &p.from_f64(1.0));
        assert!(matches!(
            err,
            Err(SearchError::DimensionMismatch {
                expected: 1,
                found: 2
            })
        ));
    }
}
