use clap::Parser;
use log::{error, info};
use rktk::objective;
use rktk::prelude::*;
use rktk::report::ProgressReporter;
use rug::float::Round;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "rksearch")]
#[command(about = "Search for Runge-Kutta methods with arbitrary-precision BFGS")]
struct Args {
    /// Working precision in bits (invalid values fall back to 53)
    precision: Option<String>,

    /// Seconds between progress lines (invalid values fall back to 0.5)
    print_period: Option<String>,

    /// Digits printed per value, 0 for every significant digit
    print_precision: Option<String>,

    /// Checkpoint or coordinate file to resume from
    resume_file: Option<PathBuf>,

    /// Objective to minimize: rosenbrock, quadratic
    #[arg(long, default_value = "rosenbrock")]
    objective: String,

    /// Number of unknowns
    #[arg(long, default_value_t = rktk::config::DEFAULT_DIMENSION)]
    dimension: usize,

    /// Inverse Hessian update: bfgs, modified-bfgs
    #[arg(long, default_value = "bfgs")]
    update_rule: UpdateRule,

    /// Rounding mode: nearest, zero, up, down
    #[arg(long, default_value = "nearest")]
    rounding: String,

    /// Race a steepest descent line search against every quasi-Newton one
    #[arg(long, default_value = "false")]
    compare_gradient: bool,

    /// Directory checkpoints are written to
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Accepted steps between checkpoints
    #[arg(long, default_value_t = rktk::config::DEFAULT_CHECKPOINT_CADENCE)]
    checkpoint_cadence: u64,
}

impl Args {
    fn precision_bits(&self) -> u32 {
        self.precision
            .as_deref()
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|&bits| bits > 0 && bits <= i64::from(i32::MAX))
            .map(|bits| bits as u32)
            .unwrap_or(rktk::config::DEFAULT_PRECISION)
    }

    fn print_period(&self) -> f64 {
        self.print_period
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|&secs| secs.is_finite() && secs >= 0.0)
            .unwrap_or(0.5)
    }

    fn print_digits(&self) -> usize {
        self.print_precision
            .as_deref()
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|&digits| digits >= 0 && digits <= i64::from(i32::MAX))
            .map(|digits| digits as usize)
            .unwrap_or(0)
    }

    fn rounding(&self) -> Result<Round, SearchError> {
        match self.rounding.to_ascii_lowercase().as_str() {
            "nearest" => Ok(Round::Nearest),
            "zero" => Ok(Round::Zero),
            "up" => Ok(Round::Up),
            "down" => Ok(Round::Down),
            other => Err(SearchError::InvalidConfig(format!(
                "unknown rounding mode '{}'",
                other
            ))),
        }
    }

    fn config(&self) -> Result<SearchConfig, SearchError> {
        let config = SearchConfig {
            precision: self.precision_bits(),
            rounding: self.rounding()?,
            dimension: self.dimension,
            update_rule: self.update_rule,
            compare_gradient_step: self.compare_gradient,
            checkpoint_cadence: self.checkpoint_cadence,
            output_dir: self.output_dir.clone(),
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }
}

fn run(args: &Args) -> Result<(), SearchError> {
    let config = args.config()?;
    let digits = args.print_digits();
    let f = objective::by_name(&args.objective)
        .ok_or_else(|| SearchError::InvalidConfig(format!("unknown objective '{}'", args.objective)))?;
    fs::create_dir_all(&config.output_dir).map_err(|source| SearchError::Io {
        path: config.output_dir.clone(),
        source,
    })?;

    info!(
        "{} unknowns at {} bits, {} update, objective {}",
        config.dimension, config.precision, config.update_rule, args.objective
    );
    let mut opt = BfgsOptimizer::new_boxed(f, &config)?;
    match &args.resume_file {
        Some(path) => opt.initialize_from_file(path)?,
        None => opt.initialize_random()?,
    }

    let mut reporter = ProgressReporter::from_secs(args.print_period());
    reporter.print(&opt.progress_line(digits));
    opt.write_checkpoint(&config.output_dir)?;

    loop {
        match opt.step()? {
            StepOutcome::Converged => {
                reporter.print(&opt.progress_line(digits));
                info!("located candidate local minimum");
                opt.write_checkpoint(&config.output_dir)?;
                return Ok(());
            }
            StepOutcome::Decreased => {
                opt.shift()?;
                if opt.iteration() % config.checkpoint_cadence == 0 {
                    opt.write_checkpoint(&config.output_dir)?;
                }
                reporter.maybe_print(|| opt.progress_line(digits));
            }
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
