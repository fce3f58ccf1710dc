use crate::error::SearchError;
use crate::numeric::{Precision, format_exp, parse_float};
use ndarray::prelude::*;
use rand::Rng;
use regex::Regex;
use rug::Float;
use simple_error::{SimpleError, bail};
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Checkpoint file names are exactly this long
pub const NAME_LEN: usize = 68;

/// Highest quality score encoded in a file name
pub const MAX_SCORE: u32 = 9999;

static RE_CHECKPOINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?<f>\d{4})-(?<g>\d{4})-RKTK-(?<s0>[0-9A-Fa-f]{8})-(?<s1>[0-9A-Fa-f]{4})-(?<s2>[0-9A-Fa-f]{4})-(?<s3>[0-9A-Fa-f]{4})-(?<s4>[0-9A-Fa-f]{12})-(?<iter>\d{12})\.txt$",
    )
    .expect("Invalid regex!")
});

/// 128-bit tag shared by every checkpoint of one optimization run.
///
/// Laid out like a UUID: 32/16/16/16/48-bit segments, most significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(pub u128);

impl RunId {
    const WIDTHS: [u32; 5] = [32, 16, 16, 16, 48];

    /// Draw a fresh identifier
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        RunId(rng.random::<u128>())
    }

    /// Assemble an identifier from its five segments; excess high bits of each
    /// segment are discarded.
    pub fn from_segments(segments: [u64; 5]) -> Self {
        let mut value = 0u128;
        for (segment, width) in segments.iter().zip(Self::WIDTHS) {
            let mask = (1u128 << width) - 1;
            value = (value << width) | (u128::from(*segment) & mask);
        }
        RunId(value)
    }

    pub fn segments(&self) -> [u64; 5] {
        let mut segments = [0u64; 5];
        let mut shift = 128;
        for (segment, width) in segments.iter_mut().zip(Self::WIDTHS) {
            shift -= width;
            *segment = ((self.0 >> shift) & ((1u128 << width) - 1)) as u64;
        }
        segments
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [s0, s1, s2, s3, s4] = self.segments();
        write!(f, "{:08X}-{:04X}-{:04X}-{:04X}-{:012X}", s0, s1, s2, s3, s4)
    }
}

/// Map an objective value or gradient norm onto 0..=9999 as -100 log10(x).
///
/// Zero and values too small for an f64 saturate at the top, values of one
/// or more (and NaN) score zero.
pub fn quality_score(x: &Float) -> u32 {
    if x.is_nan() {
        return 0;
    }
    let score = -100.0 * x.to_f64().log10();
    if score.is_nan() {
        return 0;
    }
    score.round().clamp(0.0, f64::from(MAX_SCORE)) as u32
}

/// Metadata carried by a checkpoint file name:
/// `FFFF-GGGG-RKTK-AAAAAAAA-BBBB-CCCC-DDDD-EEEEEEEEEEEE-IIIIIIIIIIII.txt`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointName {
    pub f_score: u32,
    pub g_score: u32,
    pub run_id: RunId,
    pub iteration: u64,
}

impl CheckpointName {
    pub fn new(value: &Float, gradient_norm: &Float, run_id: RunId, iteration: u64) -> Self {
        CheckpointName {
            f_score: quality_score(value),
            g_score: quality_score(gradient_norm),
            run_id,
            iteration,
        }
    }

    /// Recognise a checkpoint name; anything not matching the grammar exactly is `None`
    pub fn parse(name: &str) -> Option<Self> {
        if name.len() != NAME_LEN {
            return None;
        }
        let caps = RE_CHECKPOINT.captures(name)?;
        let hex = |key: &str| u64::from_str_radix(&caps[key], 16).ok();
        Some(CheckpointName {
            f_score: caps["f"].parse().ok()?,
            g_score: caps["g"].parse().ok()?,
            run_id: RunId::from_segments([hex("s0")?, hex("s1")?, hex("s2")?, hex("s3")?, hex("s4")?]),
            iteration: caps["iter"].parse().ok()?,
        })
    }

    /// Recognise the file-name component of a path
    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(CheckpointName::parse)
    }

    pub fn file_name(&self) -> String {
        format!(
            "{:04}-{:04}-RKTK-{}-{:012}.txt",
            self.f_score.min(MAX_SCORE),
            self.g_score.min(MAX_SCORE),
            self.run_id,
            self.iteration
        )
    }
}

impl fmt::Display for CheckpointName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

/// Human-readable trailer of a checkpoint body
#[derive(Debug, Clone, Copy)]
pub struct Summary<'a> {
    pub value: &'a Float,
    pub gradient_norm: &'a Float,
    pub step_size: &'a Float,
    pub point_norm: &'a Float,
}

/// Write `point` and its summary to `dir/<name>`, returning the full path.
///
/// One coordinate per line in `%+.*e` form with enough digits to round-trip
/// at `precision`, then a blank line and the four labelled summary lines.
pub fn write_checkpoint(
    dir: &Path,
    name: &CheckpointName,
    point: &Array1<Float>,
    summary: Summary<'_>,
    precision: &Precision,
) -> Result<PathBuf, SearchError> {
    let path = dir.join(name.file_name());
    let io_err = |source| SearchError::Io {
        path: path.clone(),
        source,
    };

    let digits = precision.decimal_digits();
    let file = fs::File::create(&path).map_err(io_err)?;
    let mut out = BufWriter::new(file);
    for x in point.iter() {
        writeln!(out, "{}", format_exp(x, digits)).map_err(io_err)?;
    }
    writeln!(out).map_err(io_err)?;
    writeln!(out, "Objective function value: {}", format_exp(summary.value, digits)).map_err(io_err)?;
    writeln!(out, "Objective gradient norm:  {}", format_exp(summary.gradient_norm, digits)).map_err(io_err)?;
    writeln!(out, "Most recent step size:    {}", format_exp(summary.step_size, digits)).map_err(io_err)?;
    writeln!(out, "Distance from origin:     {}", format_exp(summary.point_norm, digits)).map_err(io_err)?;
    out.flush().map_err(io_err)?;
    Ok(path)
}

/// Parse the first `dimension` whitespace-separated entries of `text`.
///
/// Trailing content (such as a checkpoint summary) is ignored. On failure the
/// index of the offending entry is returned alongside the parse error.
pub fn parse_point(
    text: &str,
    dimension: usize,
    precision: &Precision,
) -> Result<Array1<Float>, (usize, SimpleError)> {
    let mut tokens = text.split_whitespace();
    let mut point = Vec::with_capacity(dimension);
    for index in 0..dimension {
        let entry = match tokens.next() {
            Some(token) => parse_float(token, precision),
            None => Err(SimpleError::new("unexpected end of input")),
        };
        match entry {
            Ok(x) => point.push(x),
            Err(e) => return Err((index, e)),
        }
    }
    Ok(Array1::from(point))
}

/// Read a point of length `dimension` from a checkpoint or plain coordinate file
pub fn read_point(path: &Path, dimension: usize, precision: &Precision) -> Result<Array1<Float>, SearchError> {
    let text = fs::read_to_string(path).map_err(|source| SearchError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_point(&text, dimension, precision).map_err(|(index, e)| {
        log::debug!("entry {} of '{}': {}", index, path.display(), e);
        SearchError::MalformedEntry {
            path: path.to_path_buf(),
            index,
        }
    })
}

/// Read the summary value recorded under `label` in a checkpoint body
pub fn read_summary_field(text: &str, label: &str, precision: &Precision) -> Result<Float, SimpleError> {
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix(label) {
            let value = rest.trim_start_matches(':');
            return parse_float(value, precision);
        }
    }
    bail!("no summary line '{}'", label)
}

#[cfg(test)]
mod checkpoint_tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rktk-checkpoint-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_parse_reference_name() {
        let name = CheckpointName::parse("0102-0304-RKTK-0000002A-0003-0004-0005-000000000006-000000000042.txt")
            .unwrap();
        assert_eq!(name.f_score, 102);
        assert_eq!(name.g_score, 304);
        assert_eq!(name.iteration, 42);
        assert_eq!(name.run_id.segments(), [0x2A, 0x3, 0x4, 0x5, 0x6]);
    }

    #[test]
    fn test_reject_malformed_names() {
        let good = "0102-0304-RKTK-0000002A-0003-0004-0005-000000000006-000000000042.txt";
        assert!(CheckpointName::parse(good).is_some());
        // wrong length
        assert!(CheckpointName::parse(&good[1..]).is_none());
        // wrong separator literal
        assert!(CheckpointName::parse(&good.replace("RKTK", "RKTX")).is_none());
        // non-hex in run identifier
        assert!(CheckpointName::parse(&good.replace("002A", "002G")).is_none());
        // non-decimal in score
        assert!(CheckpointName::parse(&good.replacen("0102", "01A2", 1)).is_none());
        assert!(CheckpointName::parse(&good.replace(".txt", ".dat")).is_none());
        assert!(CheckpointName::parse("point.txt").is_none());
    }

    #[test]
    fn test_lowercase_hex_accepted() {
        let name = CheckpointName::parse("0000-0000-RKTK-deadbeef-cafe-0001-f00d-00000000abcd-000000000000.txt")
            .unwrap();
        assert_eq!(name.run_id.segments(), [0xDEADBEEF, 0xCAFE, 0x1, 0xF00D, 0xABCD]);
        assert_eq!(name.run_id.to_string(), "DEADBEEF-CAFE-0001-F00D-00000000ABCD");
    }

    #[test]
    fn test_file_name_round_trip() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let name = CheckpointName {
            f_score: 1234,
            g_score: 5,
            run_id: RunId::generate(&mut rng),
            iteration: 987_654_321,
        };
        let text = name.file_name();
        assert_eq!(text.len(), NAME_LEN);
        assert!(text.starts_with("1234-0005-RKTK-"));
        assert!(text.ends_with("-000987654321.txt"));
        assert_eq!(CheckpointName::parse(&text), Some(name));
    }

    #[test]
    fn test_run_id_segments() {
        let id = RunId::from_segments([0xFFFF_FFFF, 0x1234, 0xABCD, 0x0F0F, 0xFFFF_FFFF_FFFF]);
        assert_eq!(id.segments(), [0xFFFF_FFFF, 0x1234, 0xABCD, 0x0F0F, 0xFFFF_FFFF_FFFF]);
        // excess bits are masked off
        let id = RunId::from_segments([0x1_0000_0001, 0x1_0002, 0, 0, 0]);
        assert_eq!(id.segments(), [1, 2, 0, 0, 0]);
        assert_eq!(RunId(u128::MAX).to_string().len(), 36);
    }

    #[test]
    fn test_quality_score() {
        let p = Precision::new(64);
        assert_eq!(quality_score(&p.from_f64(1e-3)), 300);
        assert_eq!(quality_score(&p.from_f64(0.5)), 30);
        assert_eq!(quality_score(&p.from_f64(2.0)), 0);
        assert_eq!(quality_score(&p.zero()), MAX_SCORE);
        assert_eq!(quality_score(&p.from_f64(1e-200)), MAX_SCORE);
        assert_eq!(quality_score(&p.from_f64(f64::NAN)), 0);
        let tiny = Float::with_val(64, Float::parse("1e-100000").unwrap());
        assert_eq!(quality_score(&tiny), MAX_SCORE);
    }

    #[test]
    fn test_write_and_read_back() {
        let p = Precision::new(128);
        let dir = scratch_dir("write");
        let third = Float::with_val(128, 1) / Float::with_val(128, 3);
        let point = array![p.eval(&third * 1), p.eval(-&third), p.from_f64(2.5e-30)];
        let value = p.from_f64(1e-4);
        let gnorm = p.from_f64(3e-2);
        let step = p.from_f64(0.125);
        let xnorm = p.from_f64(1.0);
        let name = CheckpointName::new(&value, &gnorm, RunId(42), 100);

        let path = write_checkpoint(
            &dir,
            &name,
            &point,
            Summary {
                value: &value,
                gradient_norm: &gnorm,
                step_size: &step,
                point_norm: &xnorm,
            },
            &p,
        )
        .unwrap();
        assert_eq!(CheckpointName::from_path(&path), Some(name));
        assert_eq!(name.f_score, 400);
        assert_eq!(name.g_score, 152);

        let back = read_point(&path, 3, &p).unwrap();
        for (a, b) in back.iter().zip(point.iter()) {
            let diff = Float::with_val(128, a - b).abs();
            assert!(diff <= Float::with_val(128, 1e-38) * Float::with_val(128, b.abs_ref()));
        }

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3 + 1 + 4);
        assert_eq!(lines[3], "");
        assert!(lines[0].starts_with('+'));
        assert!(lines[1].starts_with('-'));
        let recorded = read_summary_field(&text, "Most recent step size", &p).unwrap();
        assert_eq!(recorded, step);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_read_short_file() {
        let p = Precision::new(64);
        let dir = scratch_dir("short");
        let path = dir.join("point.txt");
        fs::write(&path, "+1.0e+00\n-2.0e-01\n").unwrap();
        let err = read_point(&path, 3, &p).unwrap_err();
        assert!(matches!(err, SearchError::MalformedEntry { index: 2, .. }));

        fs::write(&path, "+1.0e+00\nbad\n+3.0e+00\n").unwrap();
        let err = read_point(&path, 3, &p).unwrap_err();
        assert!(matches!(err, SearchError::MalformedEntry { index: 1, .. }));

        let err = read_point(&dir.join("missing.txt"), 3, &p).unwrap_err();
        assert!(matches!(err, SearchError::Io { .. }));
        fs::remove_dir_all(&dir).unwrap();
    }
}
