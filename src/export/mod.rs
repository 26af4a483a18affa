//! Files written next to the database: CSV dumps of stored records and the
//! per-name change history kept as JSON.

use crate::models::{ExtractionMap, StockChangeRecord};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Write records as CSV with a `date,symbol,direction,change` header.
pub fn write_csv(records: &[StockChangeRecord], path: &Path) -> Result<usize> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Cannot create {:?}", path))?;

    for r in records {
        writer.serialize(r)?;
    }
    writer.flush()?;

    info!("{} records written to {:?}", records.len(), path);
    Ok(records.len())
}

/// Stock name → list of `[date, change]` pairs, oldest first.
pub type ChangeHistory = BTreeMap<String, Vec<[String; 2]>>;

/// Append today's change of every quote to `history`, keyed by display name.
/// Quotes without a change are left out.
pub fn append_history(history: &mut ChangeHistory, quotes: &ExtractionMap, date: &str) -> usize {
    let mut added = 0;
    for entry in quotes.values() {
        let Some(change) = &entry.change else { continue };
        history
            .entry(entry.name.clone())
            .or_default()
            .push([date.to_string(), change.clone()]);
        added += 1;
    }
    added
}

/// Load the history file (missing file → empty), append, write it back.
pub fn update_history_file(path: &Path, quotes: &ExtractionMap, date: &str) -> Result<usize> {
    let mut history: ChangeHistory = if path.exists() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {:?}", path))?;
        serde_json::from_str(&text).with_context(|| format!("Bad history JSON in {:?}", path))?
    } else {
        debug!("{:?} does not exist yet, starting a new history", path);
        ChangeHistory::new()
    };

    let added = append_history(&mut history, quotes, date);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(&history)?)
        .with_context(|| format!("Cannot write {:?}", path))?;

    info!("{} history entries appended to {:?}", added, path);
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, QuoteEntry};

    fn scratch(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("quote_changes_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn quotes() -> ExtractionMap {
        let mut q = ExtractionMap::new();
        q.insert(
            "ABC".into(),
            QuoteEntry { name: "Able Corp".into(), change: Some("+2.50%".into()) },
        );
        q.insert("NOC".into(), QuoteEntry::new("No Change SA"));
        q
    }

    #[test]
    fn test_append_history_groups_by_name() {
        let mut history = ChangeHistory::new();
        assert_eq!(append_history(&mut history, &quotes(), "2024-03-01"), 1);
        assert_eq!(append_history(&mut history, &quotes(), "2024-03-02"), 1);

        assert_eq!(
            history["Able Corp"],
            vec![
                ["2024-03-01".to_string(), "+2.50%".to_string()],
                ["2024-03-02".to_string(), "+2.50%".to_string()],
            ]
        );
        assert!(!history.contains_key("No Change SA"));
    }

    #[test]
    fn test_history_file_round_trip() {
        let dir = scratch("history");
        let path = dir.join("history.json");

        update_history_file(&path, &quotes(), "2024-03-01").unwrap();
        update_history_file(&path, &quotes(), "2024-03-02").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let history: ChangeHistory = serde_json::from_str(&text).unwrap();
        assert_eq!(history["Able Corp"].len(), 2);
        assert_eq!(history["Able Corp"][1][0], "2024-03-02");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_write_csv() {
        let dir = scratch("csv");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("changes.csv");

        let records = vec![StockChangeRecord {
            date: "2024-03-01 18:00:00".into(),
            symbol: "ABC".into(),
            direction: Direction::Down,
            change: "-1.50%".into(),
        }];
        assert_eq!(write_csv(&records, &path).unwrap(), 1);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "date,symbol,direction,change\n2024-03-01 18:00:00,ABC,down,-1.50%\n");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
