use ndarray::prelude::*;
use rug::float::{Round, prec_max, prec_min};
use rug::ops::AssignRound;
use rug::Float;
use simple_error::{SimpleError, bail};
use std::cmp::Ordering;

/// log10(2), converts a binary precision into a decimal digit count
const LOG10_2: f64 = 0.301_029_995_663_981_2;

/// Working precision and rounding mode shared by every arbitrary-precision
/// value belonging to one optimizer run.
///
/// All storage is allocated through this context so that scalars, vectors and
/// matrices of a run always agree on their bit precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precision {
    pub bits: u32,
    pub round: Round,
}

impl Precision {
    /// Create a context rounding to nearest
    pub fn new(bits: u32) -> Self {
        Precision {
            bits,
            round: Round::Nearest,
        }
    }

    /// Create a context with an explicit rounding mode
    pub fn with_round(bits: u32, round: Round) -> Self {
        Precision { bits, round }
    }

    /// Check that the bit precision is supported by MPFR
    pub fn is_valid(&self) -> bool {
        (prec_min()..=prec_max()).contains(&self.bits)
    }

    /// A positive zero at the working precision
    pub fn zero(&self) -> Float {
        Float::new(self.bits)
    }

    /// Convert an f64 to the working precision
    pub fn from_f64(&self, value: f64) -> Float {
        Float::with_val_round(self.bits, value, self.round).0
    }

    /// Evaluate an expression (possibly an incomplete rug computation) into a
    /// new value at the working precision and rounding mode
    pub fn eval<T>(&self, src: T) -> Float
    where
        Float: AssignRound<T, Round = Round, Ordering = Ordering>,
    {
        Float::with_val_round(self.bits, src, self.round).0
    }

    /// A zero vector of length `n`
    pub fn vector(&self, n: usize) -> Array1<Float> {
        Array1::from_shape_fn(n, |_| self.zero())
    }

    /// A zero matrix of shape `n x n`
    pub fn matrix(&self, n: usize) -> Array2<Float> {
        Array2::from_shape_fn((n, n), |_| self.zero())
    }

    /// The `n x n` identity matrix
    pub fn identity(&self, n: usize) -> Array2<Float> {
        Array2::from_shape_fn((n, n), |(i, j)| {
            Float::with_val(self.bits, if i == j { 1 } else { 0 })
        })
    }

    /// Initial line search step used before any step has been accepted: 2^(-bits/2)
    pub fn default_step(&self) -> Float {
        let mut step = Float::with_val(self.bits, 1);
        step >>= self.bits / 2;
        step
    }

    /// Number of fractional decimal digits needed to represent the precision
    pub fn decimal_digits(&self) -> usize {
        (f64::from(self.bits) * LOG10_2) as usize + 2
    }
}

/// Format a value as `[+-]d.ddd...e[+-]XX` with `digits` fractional digits.
///
/// The exponent always carries a sign and at least two digits.
pub fn format_exp(x: &Float, digits: usize) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    let sign = if x.is_sign_negative() { '-' } else { '+' };
    if x.is_infinite() {
        return format!("{sign}inf");
    }
    if x.is_zero() {
        return if digits == 0 {
            format!("{sign}0e+00")
        } else {
            format!("{sign}0.{}e+00", "0".repeat(digits))
        };
    }

    let (_, significand, exp) = x.to_sign_string_exp(10, Some(digits + 1));
    let Some(exp) = exp else {
        return format!("{sign}{significand}");
    };
    let (lead, frac) = significand.split_at(1);
    let exp = exp - 1;
    let exp_sign = if exp < 0 { '-' } else { '+' };
    if frac.is_empty() {
        format!("{sign}{lead}e{exp_sign}{:02}", exp.abs())
    } else {
        format!("{sign}{lead}.{frac}e{exp_sign}{:02}", exp.abs())
    }
}

/// Parse a decimal entry (optionally signed, optionally with exponent) at the
/// given precision.
pub fn parse_float(text: &str, precision: &Precision) -> Result<Float, SimpleError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        bail!("empty decimal entry");
    }
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let normalized = unsigned.replace("e+", "e").replace("E+", "E");
    match Float::parse(&normalized) {
        Ok(parsed) => Ok(Float::with_val_round(precision.bits, parsed, precision.round).0),
        Err(e) => bail!("invalid decimal entry '{}': {}", trimmed, e),
    }
}
