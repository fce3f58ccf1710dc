use crate::numeric::Precision;
use dyn_clone::DynClone;
use ndarray::prelude::*;
use rug::ops::{AddAssignRound, AssignRound};
use rug::{Assign, Float};

// Define a trait for the objective function
pub trait ObjFn: DynClone {
    /// Evaluate the objective at `x` using the given working precision
    fn call(&self, x: &Array1<Float>, p: &Precision) -> Float;
}
dyn_clone::clone_trait_object!(ObjFn);

// Define a trait for the gradient function
pub trait ObjGradFn: ObjFn + DynClone {
    /// Write the gradient at `x` into `dst`, which has the length of `x`
    fn grad(&self, dst: &mut Array1<Float>, x: &Array1<Float>, p: &Precision);
}
dyn_clone::clone_trait_object!(ObjGradFn);

// Wrapper for multi-dimensional functions with an analytic gradient
#[derive(Clone)]
pub struct MultiDimGradFn<F, G>(pub F, pub G)
where
    F: Fn(&Array1<Float>, &Precision) -> Float + Clone,
    G: Fn(&mut Array1<Float>, &Array1<Float>, &Precision) + Clone;

impl<F, G> MultiDimGradFn<F, G>
where
    F: Fn(&Array1<Float>, &Precision) -> Float + Clone,
    G: Fn(&mut Array1<Float>, &Array1<Float>, &Precision) + Clone,
{
    pub fn new(f: F, g: G) -> Self {
        MultiDimGradFn(f, g)
    }
}

impl<F, G> ObjFn for MultiDimGradFn<F, G>
where
    F: Fn(&Array1<Float>, &Precision) -> Float + Clone,
    G: Fn(&mut Array1<Float>, &Array1<Float>, &Precision) + Clone,
{
    fn call(&self, x: &Array1<Float>, p: &Precision) -> Float {
        (self.0)(x, p)
    }
}

impl<F, G> ObjGradFn for MultiDimGradFn<F, G>
where
    F: Fn(&Array1<Float>, &Precision) -> Float + Clone,
    G: Fn(&mut Array1<Float>, &Array1<Float>, &Precision) + Clone,
{
    fn grad(&self, dst: &mut Array1<Float>, x: &Array1<Float>, p: &Precision) {
        (self.1)(dst, x, p)
    }
}

/// Extended Rosenbrock function
///
/// f(x) = sum_i 100 (x_{i+1} - x_i^2)^2 + (1 - x_i)^2, minimum 0 at x = (1, ..., 1)
#[derive(Debug, Clone, Copy, Default)]
pub struct Rosenbrock;

impl ObjFn for Rosenbrock {
    fn call(&self, x: &Array1<Float>, p: &Precision) -> Float {
        let mut sum = p.zero();
        for i in 0..x.len().saturating_sub(1) {
            let valley = p.eval(&x[i + 1] - p.eval(x[i].square_ref()));
            let offset = p.eval(1 - &x[i]);
            sum.add_assign_round(p.eval(100 * p.eval(valley.square_ref())), p.round);
            sum.add_assign_round(p.eval(offset.square_ref()), p.round);
        }
        sum
    }
}

impl ObjGradFn for Rosenbrock {
    fn grad(&self, dst: &mut Array1<Float>, x: &Array1<Float>, p: &Precision) {
        for g in dst.iter_mut() {
            g.assign(0);
        }
        for i in 0..x.len().saturating_sub(1) {
            let valley = p.eval(&x[i + 1] - p.eval(x[i].square_ref()));
            let offset = p.eval(1 - &x[i]);
            // d/dx_i = -400 x_i (x_{i+1} - x_i^2) - 2 (1 - x_i)
            dst[i].add_assign_round(p.eval(-400 * p.eval(&x[i] * &valley)), p.round);
            dst[i].add_assign_round(p.eval(-2 * &offset), p.round);
            // d/dx_{i+1} = 200 (x_{i+1} - x_i^2)
            dst[i + 1].add_assign_round(p.eval(200 * &valley), p.round);
        }
    }
}

/// Separable quadratic f(x) = sum_i (i + 1) (x_i - 1)^2
#[derive(Debug, Clone, Copy, Default)]
pub struct Quadratic;

impl ObjFn for Quadratic {
    fn call(&self, x: &Array1<Float>, p: &Precision) -> Float {
        let mut sum = p.zero();
        for (i, xi) in x.iter().enumerate() {
            let offset = p.eval(xi - 1);
            let weight = (i + 1) as u32;
            sum.add_assign_round(p.eval(weight * p.eval(offset.square_ref())), p.round);
        }
        sum
    }
}

impl ObjGradFn for Quadratic {
    fn grad(&self, dst: &mut Array1<Float>, x: &Array1<Float>, p: &Precision) {
        for (i, (g, xi)) in dst.iter_mut().zip(x.iter()).enumerate() {
            let weight = 2 * (i + 1) as u32;
            g.assign_round(weight * p.eval(xi - 1), p.round);
        }
    }
}

/// Look up one of the built-in objectives by name
pub fn by_name(name: &str) -> Option<Box<dyn ObjGradFn>> {
    match name.to_ascii_lowercase().as_str() {
        "rosenbrock" => Some(Box::new(Rosenbrock)),
        "quadratic" => Some(Box::new(Quadratic)),
        _ => None,
    }
}

#[cfg(test)]
mod objective_tests {
    use super::*;
    use float_cmp::approx_eq;

    fn point(p: &Precision, values: &[f64]) -> Array1<Float> {
        values.iter().map(|&v| p.from_f64(v)).collect()
    }

    #[test]
    fn test_rosenbrock_value() {
        let p = Precision::new(64);
        let f = Rosenbrock;
        assert_eq!(f.call(&point(&p, &[1.0, 1.0, 1.0]), &p).to_f64(), 0.0);
        // (1 - 0)^2 + 100 (1 - 0)^2 = 101
        assert_eq!(f.call(&point(&p, &[0.0, 1.0]), &p).to_f64(), 101.0);
        assert_eq!(f.call(&point(&p, &[-1.2, 1.0]), &p).prec(), 64);
    }

    #[test]
    fn test_rosenbrock_gradient_matches_finite_difference() {
        let p = Precision::new(128);
        let f = Rosenbrock;
        let x = point(&p, &[-1.2, 1.0, 0.5]);
        let mut g = p.vector(3);
        f.grad(&mut g, &x, &p);

        let h = 1e-12;
        for i in 0..3 {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[i] += h;
            xm[i] -= h;
            let fd = p.eval(f.call(&xp, &p) - f.call(&xm, &p)).to_f64() / (2.0 * h);
            assert!(approx_eq!(f64, g[i].to_f64(), fd, epsilon = 1e-6));
        }
    }

    #[test]
    fn test_quadratic() {
        let p = Precision::new(64);
        let f = Quadratic;
        let x = point(&p, &[0.0, 3.0]);
        // 1 * 1 + 2 * 4 = 9
        assert_eq!(f.call(&x, &p).to_f64(), 9.0);
        let mut g = p.vector(2);
        f.grad(&mut g, &x, &p);
        assert_eq!(g[0].to_f64(), -2.0);
        assert_eq!(g[1].to_f64(), 8.0);
    }

    #[test]
    fn test_closure_wrapper_is_cloneable() {
        let f = MultiDimGradFn::new(
            |x: &Array1<Float>, p: &Precision| p.eval(x[0].square_ref()),
            |dst: &mut Array1<Float>, x: &Array1<Float>, p: &Precision| {
                dst[0] = p.eval(2 * &x[0]);
            },
        );
        let boxed: Box<dyn ObjGradFn> = Box::new(f);
        let cloned = boxed.clone();
        let p = Precision::new(53);
        let x = point(&p, &[3.0]);
        assert_eq!(cloned.call(&x, &p).to_f64(), 9.0);
        let mut g = p.vector(1);
        cloned.grad(&mut g, &x, &p);
        assert_eq!(g[0].to_f64(), 6.0);
    }

    #[test]
    fn test_builtin_lookup() {
        assert!(by_name("Rosenbrock").is_some());
        assert!(by_name("quadratic").is_some());
        assert!(by_name("rk-10-16").is_none());
    }
}
