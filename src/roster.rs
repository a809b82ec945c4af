//! Fighter rosters and strength tables loaded from CSV.
//!
//! Each corner has two files in the roster directory:
//! - `<corner>-roster.csv`: a `name` column plus one column per trait category
//! - `<corner>-strength.csv`: `category,value,strength`

use crate::domain::{Corner, TraitSet};
use crate::engine::StrengthTable;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },
    #[error("csv parse error in {path}: {message}")]
    Csv { path: String, message: String },
    #[error("{path} has no name column")]
    MissingNameColumn { path: String },
}

/// Trait sets of every known fighter of one corner, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    fighters: HashMap<String, TraitSet>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, traits: TraitSet) -> Self {
        self.fighters.insert(name.to_string(), traits);
        self
    }

    pub fn traits(&self, name: &str) -> Option<&TraitSet> {
        self.fighters.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fighters.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fighters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fighters.is_empty()
    }

    /// Parse a roster CSV. Empty cells are treated as absent traits.
    pub fn parse_csv<R: Read>(reader: R, path: &str) -> Result<Self, RosterError> {
        let csv_err = |e: csv::Error| RosterError::Csv {
            path: path.to_string(),
            message: e.to_string(),
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader.headers().map_err(csv_err)?.clone();
        let name_col = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case("name"))
            .ok_or_else(|| RosterError::MissingNameColumn {
                path: path.to_string(),
            })?;

        let mut roster = Roster::new();
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            let Some(name) = record.get(name_col).filter(|n| !n.is_empty()) else {
                continue;
            };
            let mut traits = TraitSet::new();
            for (i, (category, value)) in headers.iter().zip(record.iter()).enumerate() {
                if i != name_col && !value.is_empty() {
                    traits.insert(category, value);
                }
            }
            roster.fighters.insert(name.to_string(), traits);
        }
        Ok(roster)
    }
}

/// Parse a `category,value,strength` CSV into a strength table.
pub fn parse_strength_csv<R: Read>(reader: R, path: &str) -> Result<StrengthTable, RosterError> {
    #[derive(Debug, serde::Deserialize)]
    struct Row {
        category: String,
        value: String,
        strength: i64,
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut table = StrengthTable::new();
    for record in reader.deserialize::<Row>() {
        let row = record.map_err(|e| RosterError::Csv {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        table.insert(&row.category, &row.value, row.strength);
    }
    Ok(table)
}

/// Both corners' rosters and strength tables.
#[derive(Debug, Clone, Default)]
pub struct Rosters {
    pub red: Roster,
    pub blue: Roster,
    pub red_strength: StrengthTable,
    pub blue_strength: StrengthTable,
}

impl Rosters {
    pub fn load(dir: &Path) -> Result<Self, RosterError> {
        let rosters = Rosters {
            red: Roster::parse_csv(open(dir, "red-roster.csv")?, "red-roster.csv")?,
            blue: Roster::parse_csv(open(dir, "blue-roster.csv")?, "blue-roster.csv")?,
            red_strength: parse_strength_csv(open(dir, "red-strength.csv")?, "red-strength.csv")?,
            blue_strength: parse_strength_csv(
                open(dir, "blue-strength.csv")?,
                "blue-strength.csv",
            )?,
        };
        info!(
            red = rosters.red.len(),
            blue = rosters.blue.len(),
            red_categories = rosters.red_strength.category_count(),
            blue_categories = rosters.blue_strength.category_count(),
            "Loaded rosters"
        );
        Ok(rosters)
    }

    pub fn roster(&self, corner: Corner) -> &Roster {
        match corner {
            Corner::Red => &self.red,
            Corner::Blue => &self.blue,
        }
    }

    pub fn strength_table(&self, corner: Corner) -> &StrengthTable {
        match corner {
            Corner::Red => &self.red_strength,
            Corner::Blue => &self.blue_strength,
        }
    }
}

fn open(dir: &Path, file: &str) -> Result<std::fs::File, RosterError> {
    let path = dir.join(file);
    std::fs::File::open(&path).map_err(|e| RosterError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
