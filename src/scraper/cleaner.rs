use crate::models::{ClassifiedChange, Direction};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ClassifyError {
    #[error("unparseable change value {0:?}")]
    Malformed(String),
}

// ── Parsers ───────────────────────────────────────────────────────────────────

/// Parse a change percentage: drop every `%` and `+`, then read a decimal.
/// "+1.23%" → 1.23 | "-0.50%" → -0.5 | "0.00%" → 0.0
pub fn parse_change_pct(s: &str) -> Result<f64, ClassifyError> {
    let cleaned = s.trim().replace(['%', '+'], "");
    let cleaned = cleaned.trim();

    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ClassifyError::Malformed(s.to_string())),
    }
}

/// Exact comparison against zero: "0.00%" and "-0.00%" are both flat.
pub fn classify_change(s: &str) -> Result<ClassifiedChange, ClassifyError> {
    let value = parse_change_pct(s)?;

    let direction = if value > 0.0 {
        Direction::Up
    } else if value < 0.0 {
        Direction::Down
    } else {
        Direction::Flat
    };

    Ok(ClassifiedChange { direction, value })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
