use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Extraction ────────────────────────────────────────────────────────────────

/// One symbol as scraped from a listing row.
///
/// `change` stays `None` until a change cell is found for the symbol; such
/// entries are never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuoteEntry {
    pub name: String,
    pub change: Option<String>,
}

impl QuoteEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), change: None }
    }
}

/// Symbol → entry, accumulated across every source of one run.
/// The first source (and row) to register a symbol wins.
pub type ExtractionMap = BTreeMap<String, QuoteEntry>;

// ── Classification ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    /// Value stored in the `UpDown` column.
    pub fn as_i32(self) -> i32 {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
            Direction::Flat => 0,
        }
    }
}

impl TryFrom<i32> for Direction {
    type Error = i32;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Direction::Up),
            -1 => Ok(Direction::Down),
            0 => Ok(Direction::Flat),
            other => Err(other),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Flat => "flat",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifiedChange {
    pub direction: Direction,
    pub value: f64,
}

// ── Persisted record ──────────────────────────────────────────────────────────

/// Row of the `StockChanges` table. Every column is part of the primary key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StockChangeRecord {
    pub date: String,   // "YYYY-MM-DD HH:MM:SS", one value per run
    pub symbol: String,
    pub direction: Direction,
    pub change: String, // raw text, e.g. "+1.23%"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_column_values() {
        for d in [Direction::Up, Direction::Down, Direction::Flat] {
            assert_eq!(Direction::try_from(d.as_i32()), Ok(d));
        }
        assert_eq!(Direction::try_from(7), Err(7));
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Up.to_string(), "up");
        assert_eq!(Direction::Flat.to_string(), "flat");
    }
}
