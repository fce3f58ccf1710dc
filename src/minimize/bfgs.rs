use crate::checkpoint::{self, CheckpointName, RunId, Summary};
use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::linalg;
use crate::minimize::hessian::{Curvature, HessianUpdater, UpdateRule};
use crate::minimize::line_search::{LineSearchResult, QuadraticLineSearch};
use crate::numeric::{Precision, format_exp};
use crate::objective::ObjGradFn;
use log::{debug, info, warn};
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rug::ops::AssignRound;
use rug::{Assign, Float};
use std::fmt;
use std::mem::swap;
use std::path::{Path, PathBuf};

/// Lifecycle of a [`BfgsOptimizer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No point has been loaded yet
    Uninitialized,
    /// The current point is committed and a step may be taken
    Ready,
    /// A strictly decreasing candidate awaits [`BfgsOptimizer::shift`]
    Decreased,
    /// No step decreases the objective at the working precision
    Converged,
}

/// Outcome of a single [`BfgsOptimizer::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Decreased,
    Converged,
}

/// Direction the most recent step was taken along
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Quasi-Newton direction -H g
    Bfgs,
    /// Steepest descent direction -g
    Grad,
    /// No motion
    None,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StepKind::Bfgs => write!(f, "BFGS"),
            StepKind::Grad => write!(f, "GRAD"),
            StepKind::None => write!(f, "NONE"),
        }
    }
}

/// Quasi-Newton minimizer over arbitrary-precision points.
///
/// The optimizer holds two slots: the committed point (`x`, `func`, `grad`)
/// and a candidate (`x_new`, `func_new`, `grad_new`) produced by
/// [`step`](Self::step). A candidate only becomes current through
/// [`shift`](Self::shift), so the committed objective value and gradient
/// always belong to the committed point.
///
/// ```no_run
/// use rktk::config::SearchConfig;
/// use rktk::minimize::{BfgsOptimizer, StepOutcome};
/// use rktk::objective::Rosenbrock;
///
/// let config = SearchConfig { dimension: 4, precision: 128, ..Default::default() };
/// let mut opt = BfgsOptimizer::new(Rosenbrock, &config).unwrap();
/// opt.initialize_random().unwrap();
/// while opt.step().unwrap() == StepOutcome::Decreased {
///     opt.shift().unwrap();
/// }
/// println!("{}", opt.progress_line(0));
/// ```
pub struct BfgsOptimizer {
    f: Box<dyn ObjGradFn>,
    precision: Precision,
    initial_range: (f64, f64),
    compare_gradient_step: bool,

    x: Array1<Float>,
    x_new: Array1<Float>,
    grad: Array1<Float>,
    grad_new: Array1<Float>,
    grad_delta: Array1<Float>,
    grad_dir: Array1<Float>,
    step_dir: Array1<Float>,
    hess_inv: Array2<Float>,

    x_norm: Float,
    x_new_norm: Float,
    grad_norm: Float,
    grad_new_norm: Float,
    func: Float,
    func_new: Float,
    step_size: Float,
    step_size_new: Float,
    trial_step: Float,
    default_step: Float,
    scratch: Float,

    line_search: QuadraticLineSearch,
    hessian: HessianUpdater,

    iteration: u64,
    run_id: RunId,
    step_kind: StepKind,
    status: Status,
    function_evaluations: usize,
    gradient_evaluations: usize,
}

impl BfgsOptimizer {
    pub fn new<F>(f: F, config: &SearchConfig) -> Result<Self, SearchError>
    where
        F: ObjGradFn + Clone + 'static,
    {
        Self::new_boxed(Box::new(f), config)
    }

    pub fn new_boxed(f: Box<dyn ObjGradFn>, config: &SearchConfig) -> Result<Self, SearchError> {
        config.validate()?;
        let p = config.precision();
        let n = config.dimension;
        Ok(BfgsOptimizer {
            f,
            precision: p,
            initial_range: config.initial_range,
            compare_gradient_step: config.compare_gradient_step,
            x: p.vector(n),
            x_new: p.vector(n),
            grad: p.vector(n),
            grad_new: p.vector(n),
            grad_delta: p.vector(n),
            grad_dir: p.vector(n),
            step_dir: p.vector(n),
            hess_inv: p.identity(n),
            x_norm: p.zero(),
            x_new_norm: p.zero(),
            grad_norm: p.zero(),
            grad_new_norm: p.zero(),
            func: p.zero(),
            func_new: p.zero(),
            step_size: p.zero(),
            step_size_new: p.zero(),
            trial_step: p.zero(),
            default_step: p.default_step(),
            scratch: p.zero(),
            line_search: QuadraticLineSearch::new(n, p).with_max_doublings(config.max_doublings),
            hessian: HessianUpdater::new(n, p, config.update_rule),
            iteration: 0,
            run_id: RunId(0),
            step_kind: StepKind::None,
            status: Status::Uninitialized,
            function_evaluations: 0,
            gradient_evaluations: 0,
        })
    }

    // ------------------------------------------------------------------ setup

    /// Start a new run from a uniformly random point drawn from an
    /// OS-seeded generator
    pub fn initialize_random(&mut self) -> Result<(), SearchError> {
        let mut rng = StdRng::from_os_rng();
        self.initialize_random_with(&mut rng)
    }

    /// Start a new run from a uniformly random point; the run identifier is
    /// drawn from the same generator
    pub fn initialize_random_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<(), SearchError> {
        let (lo, hi) = self.initial_range;
        let point: Array1<Float> = (0..self.dimension())
            .map(|_| self.precision.from_f64(rng.random_range(lo..hi)))
            .collect();
        let run_id = RunId::generate(rng);
        self.initialize_from_point(&point, run_id, 0)?;
        info!("starting run {} from a random point", self.run_id);
        Ok(())
    }

    /// Resume from a coordinate file.
    ///
    /// When the file name follows the checkpoint grammar the iteration count
    /// and run identifier are recovered from it; otherwise a new run starts at
    /// iteration zero.
    pub fn initialize_from_file(&mut self, path: &Path) -> Result<(), SearchError> {
        info!("reading initial point from '{}'", path.display());
        let point = checkpoint::read_point(path, self.dimension(), &self.precision)?;
        let (run_id, iteration) = match CheckpointName::from_path(path) {
            Some(name) => {
                info!("resuming run {} at iteration {}", name.run_id, name.iteration);
                (name.run_id, name.iteration)
            }
            None => {
                let run_id = RunId::generate(&mut StdRng::from_os_rng());
                warn!(
                    "'{}' carries no checkpoint metadata, starting run {}",
                    path.display(),
                    run_id
                );
                (run_id, 0)
            }
        };
        self.initialize_from_point(&point, run_id, iteration)
    }

    /// Load `point` as the current point, evaluate the objective and gradient
    /// there, and reset the inverse Hessian and step size
    pub fn initialize_from_point(
        &mut self,
        point: &Array1<Float>,
        run_id: RunId,
        iteration: u64,
    ) -> Result<(), SearchError> {
        if point.len() != self.dimension() {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimension(),
                found: point.len(),
            });
        }
        let p = self.precision;
        self.status = Status::Uninitialized;
        linalg::set_copy(&mut self.x, point, p.round);
        linalg::norm(&mut self.x_norm, &self.x, p.round);

        self.func.assign_round(self.f.call(&self.x, &p), p.round);
        self.function_evaluations += 1;
        if self.func.is_nan() {
            return Err(SearchError::NumericalFault {
                stage: "during evaluation of objective function at initial point",
            });
        }
        self.f.grad(&mut self.grad, &self.x, &p);
        self.gradient_evaluations += 1;
        linalg::norm(&mut self.grad_norm, &self.grad, p.round);
        if self.grad_norm.is_nan() {
            return Err(SearchError::NumericalFault {
                stage: "during evaluation of objective gradient at initial point",
            });
        }

        self.step_size.assign(0);
        linalg::set_identity(&mut self.hess_inv);
        self.iteration = iteration;
        self.run_id = run_id;
        self.step_kind = StepKind::None;
        self.hold_position();
        self.status = Status::Ready;
        Ok(())
    }

    // ------------------------------------------------------------- iteration

    /// Attempt one quasi-Newton step from the current point.
    ///
    /// On [`StepOutcome::Decreased`] the candidate has a strictly lower
    /// objective value, its gradient has been evaluated and the inverse
    /// Hessian updated; call [`shift`](Self::shift) to commit it. On
    /// [`StepOutcome::Converged`] the candidate equals the current point and
    /// the run is over.
    ///
    /// A current point whose gradient (or `H g`) has zero or non-finite norm
    /// has no search direction and yields [`SearchError::NumericalFault`].
    pub fn step(&mut self) -> Result<StepOutcome, SearchError> {
        match self.status {
            Status::Ready => {}
            Status::Converged => return Ok(StepOutcome::Converged),
            Status::Uninitialized => {
                return Err(SearchError::InvalidState("step called before initialization"));
            }
            Status::Decreased => {
                return Err(SearchError::InvalidState(
                    "step called before the previous step was committed",
                ));
            }
        }
        let p = self.precision;
        let round = p.round;

        if self.step_size.is_zero() {
            self.trial_step.assign(&self.default_step);
        } else {
            self.trial_step.assign(&self.step_size);
        }

        linalg::set_copy(&mut self.grad_dir, &self.grad, round);
        linalg::negate_and_normalize(
            &mut self.grad_dir,
            &mut self.scratch,
            round,
            "during normalization of gradient step direction",
        )?;
        linalg::set_mat_vec(&mut self.step_dir, &self.hess_inv, &self.grad, round);
        if linalg::has_nan(&self.step_dir) {
            return Err(SearchError::NumericalFault {
                stage: "during calculation of BFGS step direction",
            });
        }
        linalg::negate_and_normalize(
            &mut self.step_dir,
            &mut self.scratch,
            round,
            "during normalization of BFGS step direction",
        )?;
        self.step_kind = StepKind::Bfgs;

        let mut reset_tried = false;
        let mut fell_back = false;
        loop {
            let result = self.search()?;
            if result.is_zero() {
                if !reset_tried && self.step_kind == StepKind::Bfgs {
                    debug!(
                        "zero step along quasi-Newton direction at iteration {}, resetting inverse Hessian",
                        self.iteration
                    );
                    linalg::set_identity(&mut self.hess_inv);
                    linalg::set_copy(&mut self.step_dir, &self.grad_dir, round);
                    self.step_kind = StepKind::Grad;
                    reset_tried = true;
                    continue;
                }
                info!(
                    "optimal step size reduced to zero at iteration {}, converged to the working precision",
                    self.iteration
                );
                return Ok(self.converge());
            }

            self.step_size_new.assign(&result.step);
            linalg::set_axpy(&mut self.x_new, &self.step_size_new, &self.step_dir, &self.x, round);
            self.func_new.assign_round(self.f.call(&self.x_new, &p), round);
            self.function_evaluations += 1;
            if self.func_new.is_nan() {
                return Err(SearchError::NumericalFault {
                    stage: "during evaluation of objective function at new point",
                });
            }
            if self.func_new < self.func {
                break;
            }

            // Renegotiate the initial step: shrink below a failed short step,
            // otherwise retreat to the last accepted step once.
            if fell_back || self.step_size.is_zero() || self.step_size_new < self.step_size {
                self.trial_step.assign(&self.step_size_new);
                self.trial_step >>= 1u32;
            } else {
                self.trial_step.assign(&self.step_size);
                fell_back = true;
            }
            debug!(
                "step of size {} did not decrease the objective, retrying from {}",
                format_exp(&self.step_size_new, 6),
                format_exp(&self.trial_step, 6)
            );
        }

        self.f.grad(&mut self.grad_new, &self.x_new, &p);
        self.gradient_evaluations += 1;
        if linalg::has_nan(&self.grad_new) {
            return Err(SearchError::NumericalFault {
                stage: "during evaluation of objective gradient at new point",
            });
        }
        linalg::norm(&mut self.grad_new_norm, &self.grad_new, round);
        if self.grad_new_norm.is_nan() {
            return Err(SearchError::NumericalFault {
                stage: "while evaluating norm of objective gradient",
            });
        }
        linalg::norm(&mut self.x_new_norm, &self.x_new, round);
        linalg::set_sub(&mut self.grad_delta, &self.grad_new, &self.grad, round);
        if linalg::has_nan(&self.grad_delta) {
            return Err(SearchError::NumericalFault {
                stage: "while subtracting consecutive gradient vectors",
            });
        }

        self.hessian.apply(
            &mut self.hess_inv,
            &self.grad_delta,
            &self.step_size_new,
            &self.step_dir,
            Curvature {
                f_old: &self.func,
                f_new: &self.func_new,
                grad_old: &self.grad,
            },
        )?;
        self.status = Status::Decreased;
        Ok(StepOutcome::Decreased)
    }

    /// Line search from the current point, racing the steepest descent
    /// direction against the quasi-Newton one when configured to
    fn search(&mut self) -> Result<LineSearchResult, SearchError> {
        let primary =
            self.line_search
                .search(&*self.f, &self.x, &self.func, &self.step_dir, &self.trial_step)?;
        self.function_evaluations += primary.evaluations;
        if !self.compare_gradient_step || self.step_kind != StepKind::Bfgs {
            return Ok(primary);
        }

        let descent =
            self.line_search
                .search(&*self.f, &self.x, &self.func, &self.grad_dir, &self.trial_step)?;
        self.function_evaluations += descent.evaluations;
        if descent.value < primary.value {
            debug!("gradient step beat quasi-Newton step at iteration {}", self.iteration);
            linalg::set_copy(&mut self.step_dir, &self.grad_dir, self.precision.round);
            linalg::set_identity(&mut self.hess_inv);
            self.step_kind = StepKind::Grad;
            Ok(descent)
        } else {
            Ok(primary)
        }
    }

    /// Make the candidate slot a copy of the current point
    fn hold_position(&mut self) {
        let round = self.precision.round;
        linalg::set_copy(&mut self.x_new, &self.x, round);
        linalg::set_copy(&mut self.grad_new, &self.grad, round);
        self.x_new_norm.assign(&self.x_norm);
        self.grad_new_norm.assign(&self.grad_norm);
        self.func_new.assign(&self.func);
        self.step_size_new.assign(0);
    }

    fn converge(&mut self) -> StepOutcome {
        self.hold_position();
        self.step_kind = StepKind::None;
        self.status = Status::Converged;
        StepOutcome::Converged
    }

    /// Commit the candidate produced by a decreasing [`step`](Self::step)
    pub fn shift(&mut self) -> Result<(), SearchError> {
        if self.status != Status::Decreased {
            return Err(SearchError::InvalidState(
                "shift called without a strictly decreasing step",
            ));
        }
        swap(&mut self.x, &mut self.x_new);
        swap(&mut self.x_norm, &mut self.x_new_norm);
        swap(&mut self.func, &mut self.func_new);
        swap(&mut self.grad, &mut self.grad_new);
        swap(&mut self.grad_norm, &mut self.grad_new_norm);
        swap(&mut self.step_size, &mut self.step_size_new);
        self.iteration += 1;
        self.status = Status::Ready;
        Ok(())
    }

    /// Whether the last step produced a strictly lower objective value that
    /// has not been committed yet
    pub fn has_decreased(&self) -> bool {
        self.status == Status::Decreased && self.func_new < self.func
    }

    // ------------------------------------------------------------- reporting

    /// `iteration | f | |g| | step | |x| | KIND`, scalars in `%+.*e` form.
    /// A `print_precision` of zero prints every significant digit.
    pub fn progress_line(&self, print_precision: usize) -> String {
        let digits = if print_precision == 0 {
            self.precision.decimal_digits()
        } else {
            print_precision
        };
        format!(
            "{:012} | {} | {} | {} | {} | {}",
            self.iteration,
            format_exp(&self.func, digits),
            format_exp(&self.grad_norm, digits),
            format_exp(&self.step_size, digits),
            format_exp(&self.x_norm, digits),
            self.step_kind
        )
    }

    /// Name the current state would be checkpointed under
    pub fn checkpoint_name(&self) -> CheckpointName {
        CheckpointName::new(&self.func, &self.grad_norm, self.run_id, self.iteration)
    }

    /// Write the current point to a checkpoint file in `dir`
    pub fn write_checkpoint(&self, dir: &Path) -> Result<PathBuf, SearchError> {
        if self.status == Status::Uninitialized {
            return Err(SearchError::InvalidState("no point to checkpoint"));
        }
        let path = checkpoint::write_checkpoint(
            dir,
            &self.checkpoint_name(),
            &self.x,
            Summary {
                value: &self.func,
                gradient_norm: &self.grad_norm,
                step_size: &self.step_size,
                point_norm: &self.x_norm,
            },
            &self.precision,
        )?;
        info!("wrote checkpoint '{}'", path.display());
        Ok(path)
    }

    // ------------------------------------------------------------- accessors

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn dimension(&self) -> usize {
        self.x.len()
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn update_rule(&self) -> UpdateRule {
        self.hessian.rule()
    }

    pub fn point(&self) -> &Array1<Float> {
        &self.x
    }

    pub fn value(&self) -> &Float {
        &self.func
    }

    pub fn gradient(&self) -> &Array1<Float> {
        &self.grad
    }

    pub fn gradient_norm(&self) -> &Float {
        &self.grad_norm
    }

    pub fn point_norm(&self) -> &Float {
        &self.x_norm
    }

    /// Size of the last accepted step, zero before the first one
    pub fn step_size(&self) -> &Float {
        &self.step_size
    }

    pub fn candidate(&self) -> &Array1<Float> {
        &self.x_new
    }

    pub fn candidate_value(&self) -> &Float {
        &self.func_new
    }

    pub fn candidate_step_size(&self) -> &Float {
        &self.step_size_new
    }

    pub fn inverse_hessian(&self) -> &Array2<Float> {
        &self.hess_inv
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn step_kind(&self) -> StepKind {
        self.step_kind
    }

    pub fn function_evaluations(&self) -> usize {
        self.function_evaluations
    }

    pub fn gradient_evaluations(&self) -> usize {
        self.gradient_evaluations
    }
}
