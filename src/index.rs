// Result index over the per-year cost tables
//
// Tables live in `<working_dir>/outputs/<prefix>_<YYYY>.csv` and are loaded
// once per session. All queries are pure reads; misses are logged and
// answered with empty results.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::logging::{operations, status};

/// One row of a result table
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Row {
    pub technology: String,
    pub parameter: String,
    /// The `value` cell as written in the table
    #[serde(rename = "value", default)]
    pub raw_value: Option<String>,
    /// `raw_value` parsed as a number; `None` when empty or non-numeric
    #[serde(skip)]
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub source: Option<String>,
    #[serde(rename = "further description")]
    pub further_description: Option<String>,
}

/// The record returned for a (year, technology, parameter) lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub source: Option<String>,
    #[serde(rename = "further description")]
    pub further_description: Option<String>,
}

impl From<&Row> for Entry {
    fn from(row: &Row) -> Self {
        Self {
            value: row.value,
            unit: row.unit.clone(),
            source: row.source.clone(),
            further_description: row.further_description.clone(),
        }
    }
}

/// Why a lookup produced no entry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("No results for year {0}")]
    MissingYear(i32),

    #[error("No results for [year={year}, tech={technology}]")]
    UnknownTechnology { year: i32, technology: String },

    /// The technology exists but has zero rows for this parameter
    #[error("Zero (0) results for [year={year}, tech={technology}, param={parameter}]")]
    UnknownParameter {
        year: i32,
        technology: String,
        parameter: String,
    },

    #[error("Ambiguous results ({count} rows) for [year={year}, tech={technology}, param={parameter}]")]
    Ambiguous {
        year: i32,
        technology: String,
        parameter: String,
        count: usize,
    },
}

/// All rows for one year
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    rows: Vec<Row>,
}

impl ResultTable {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// Parse a CSV table with a header row
    pub fn from_reader<R: Read>(reader: R) -> std::result::Result<Self, csv::Error> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(reader);
        let mut rows = reader.deserialize().collect::<std::result::Result<Vec<Row>, _>>()?;
        for row in &mut rows {
            row.value = parse_value(row);
        }
        Ok(Self { rows })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file).map_err(|source| Error::Table {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct technologies in first-seen order
    pub fn technologies(&self) -> Vec<String> {
        distinct(self.rows.iter().map(|row| row.technology.as_str()))
    }

    /// Distinct parameters of `technology` in first-seen order
    pub fn parameters(&self, technology: &str) -> Vec<String> {
        distinct(
            self.rows
                .iter()
                .filter(|row| row.technology == technology)
                .map(|row| row.parameter.as_str()),
        )
    }

    fn matching<'a>(&'a self, technology: &'a str, parameter: &'a str) -> impl Iterator<Item = &'a Row> {
        self.rows
            .iter()
            .filter(move |row| row.technology == technology && row.parameter == parameter)
    }
}

fn parse_value(row: &Row) -> Option<f64> {
    let raw = row.raw_value.as_deref()?.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            debug!(
                technology = %row.technology,
                parameter = %row.parameter,
                raw,
                "Non-numeric value cell"
            );
            None
        }
    }
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .filter(|value| seen.insert(*value))
        .map(str::to_string)
        .collect()
}

/// Extract the year from `<prefix>_<YYYY>.csv`
fn parse_year(file_name: &str, prefix: &str) -> Option<i32> {
    let digits = file_name
        .strip_prefix(prefix)?
        .strip_prefix('_')?
        .strip_suffix(".csv")?;
    if digits.len() == 4 && digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

/// Year → table mapping, immutable once built
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultIndex {
    tables: BTreeMap<i32, ResultTable>,
}

impl ResultIndex {
    pub fn from_tables(tables: impl IntoIterator<Item = (i32, ResultTable)>) -> Self {
        Self {
            tables: tables.into_iter().collect(),
        }
    }

    /// Load every `<prefix>_<YYYY>.csv` found in `outputs_dir`.
    ///
    /// Tables that fail to parse are logged and skipped; a missing directory
    /// yields an empty index.
    pub fn build(outputs_dir: &Path, prefix: &str) -> Self {
        if !outputs_dir.is_dir() {
            warn!(path = %outputs_dir.display(), "No outputs directory; result index is empty");
            return Self::default();
        }

        let pattern = format!(
            "{}/{}_*.csv",
            glob::Pattern::escape(&outputs_dir.to_string_lossy()),
            glob::Pattern::escape(prefix)
        );

        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(e) => {
                error!(pattern = %pattern, "Invalid results pattern: {}", e);
                return Self::default();
            }
        };

        let mut tables = BTreeMap::new();
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!("Skipping unreadable output entry: {}", e);
                    continue;
                }
            };

            let Some(year) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| parse_year(name, prefix))
            else {
                debug!(path = %path.display(), "Ignoring file not matching the results pattern");
                continue;
            };

            match ResultTable::load(&path) {
                Ok(table) => {
                    debug!(year, rows = table.len(), "Loaded results table");
                    tables.insert(year, table);
                }
                Err(e) => {
                    error!(
                        operation = operations::LOAD,
                        status = status::ERROR,
                        year,
                        "{}",
                        e
                    );
                }
            }
        }

        info!(
            operation = operations::LOAD,
            tables = tables.len(),
            "Found a total of {} applicable output files",
            tables.len()
        );

        Self { tables }
    }

    pub fn years(&self) -> Vec<i32> {
        self.tables.keys().copied().collect()
    }

    pub fn table(&self, year: i32) -> Option<&ResultTable> {
        self.tables.get(&year)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Distinct technologies for `year`; empty (and logged) if the year is absent
    pub fn technologies(&self, year: i32) -> Vec<String> {
        match self.tables.get(&year) {
            Some(table) => table.technologies(),
            None => {
                log_miss(&LookupError::MissingYear(year));
                Vec::new()
            }
        }
    }

    /// Distinct parameters for `technology` in `year`; empty (and logged) if the year is absent
    pub fn parameters(&self, year: i32, technology: &str) -> Vec<String> {
        match self.tables.get(&year) {
            Some(table) => table.parameters(technology),
            None => {
                log_miss(&LookupError::UnknownTechnology {
                    year,
                    technology: technology.to_string(),
                });
                Vec::new()
            }
        }
    }

    /// Resolve the unique row for (year, technology, parameter)
    pub fn lookup(
        &self,
        year: i32,
        technology: &str,
        parameter: &str,
    ) -> std::result::Result<Entry, LookupError> {
        let table = self.tables.get(&year).ok_or(LookupError::MissingYear(year))?;

        if !table.rows.iter().any(|row| row.technology == technology) {
            return Err(LookupError::UnknownTechnology {
                year,
                technology: technology.to_string(),
            });
        }

        let mut matches = table.matching(technology, parameter);
        let first = matches.next().ok_or_else(|| LookupError::UnknownParameter {
            year,
            technology: technology.to_string(),
            parameter: parameter.to_string(),
        })?;

        let extra = matches.count();
        if extra > 0 {
            return Err(LookupError::Ambiguous {
                year,
                technology: technology.to_string(),
                parameter: parameter.to_string(),
                count: extra + 1,
            });
        }

        Ok(Entry::from(first))
    }

    /// Like [`ResultIndex::lookup`], but logs the miss and returns `None`
    pub fn get(&self, year: i32, technology: &str, parameter: &str) -> Option<Entry> {
        self.lookup(year, technology, parameter)
            .map_err(|e| log_miss(&e))
            .ok()
    }
}

fn log_miss(err: &LookupError) {
    let status = match err {
        LookupError::Ambiguous { .. } => status::AMBIGUOUS,
        _ => status::MISS,
    };
    error!(operation = operations::LOOKUP, status, "{}", err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const COSTS_2030: &str = "\
technology,parameter,value,unit,source,further description,currency_year
solar,investment,492.5,EUR/kWel,DEA,utility-scale,2020
solar,lifetime,40.0,years,DEA,,2020
solar,FOM,1.9,%/year,DEA,,2020
onwind,lifetime,30.0,years,DEA,,2020
onwind,investment,1035.5,EUR/kWel,DEA,,2020
";

    fn index() -> ResultIndex {
        let table = ResultTable::from_reader(COSTS_2030.as_bytes()).unwrap();
        ResultIndex::from_tables([(2030, table)])
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("costs_2030.csv", "costs"), Some(2030));
        assert_eq!(parse_year("costs_230.csv", "costs"), None);
        assert_eq!(parse_year("costs_20301.csv", "costs"), None);
        assert_eq!(parse_year("costs_2030.csv.bak", "costs"), None);
        assert_eq!(parse_year("other_2030.csv", "costs"), None);
        assert_eq!(parse_year("costs_abcd.csv", "costs"), None);
    }

    #[test]
    fn test_technologies_are_distinct_and_ordered() {
        assert_eq!(index().technologies(2030), vec!["solar", "onwind"]);
    }

    #[test]
    fn test_technologies_missing_year_is_empty() {
        assert!(index().technologies(1900).is_empty());
    }

    #[test]
    fn test_parameters() {
        let index = index();
        assert_eq!(
            index.parameters(2030, "solar"),
            vec!["investment", "lifetime", "FOM"]
        );
        assert!(index.parameters(2030, "nuclear").is_empty());
        assert!(index.parameters(1900, "solar").is_empty());
    }

    #[test]
    fn test_get_unique_row() {
        let entry = index().get(2030, "solar", "lifetime").unwrap();
        assert_eq!(entry.value, Some(40.0));
        assert_eq!(entry.unit.as_deref(), Some("years"));
        assert_eq!(entry.source.as_deref(), Some("DEA"));
        assert_eq!(entry.further_description, None);

        let investment = index().get(2030, "solar", "investment").unwrap();
        assert_eq!(investment.further_description.as_deref(), Some("utility-scale"));
    }

    #[test]
    fn test_entry_serializes_four_fields() {
        let entry = index().get(2030, "solar", "investment").unwrap();
        let yaml = serde_yaml::to_value(&entry).unwrap();
        let mapping = yaml.as_mapping().unwrap();
        assert_eq!(mapping.len(), 4);
        assert!(mapping.contains_key("further description"));
    }

    #[test]
    fn test_lookup_miss_reasons() {
        let index = index();
        assert_eq!(
            index.lookup(1900, "solar", "lifetime"),
            Err(LookupError::MissingYear(1900))
        );
        assert!(matches!(
            index.lookup(2030, "nuclear", "lifetime"),
            Err(LookupError::UnknownTechnology { .. })
        ));
        assert!(matches!(
            index.lookup(2030, "solar", "efficiency"),
            Err(LookupError::UnknownParameter { .. })
        ));
        assert_eq!(index.get(2030, "solar", "efficiency"), None);
    }

    #[test]
    fn test_ambiguous_lookup() {
        let csv = "\
technology,parameter,value,unit,source,further description
solar,lifetime,40.0,years,DEA,
solar,lifetime,35.0,years,IEA,
";
        let table = ResultTable::from_reader(csv.as_bytes()).unwrap();
        let index = ResultIndex::from_tables([(2030, table)]);

        assert_eq!(
            index.lookup(2030, "solar", "lifetime"),
            Err(LookupError::Ambiguous {
                year: 2030,
                technology: "solar".to_string(),
                parameter: "lifetime".to_string(),
                count: 2,
            })
        );
        assert_eq!(index.get(2030, "solar", "lifetime"), None);
    }

    #[test]
    fn test_non_numeric_value_is_absent() {
        let csv = "\
technology,parameter,value,unit,source,further description
solar,note,n/a,,,
";
        let table = ResultTable::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.rows()[0].value, None);
        assert_eq!(table.rows()[0].raw_value.as_deref(), Some("n/a"));
        assert_eq!(table.rows()[0].unit, None);
    }

    #[test]
    fn test_value_cell_keeps_raw_text() {
        let csv = "\
technology,parameter,value,unit,source,further description
solar,lifetime, 40 ,years,DEA,
solar,efficiency,,,,
";
        let table = ResultTable::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.rows()[0].value, Some(40.0));
        assert_eq!(table.rows()[0].raw_value.as_deref(), Some(" 40 "));
        assert_eq!(table.rows()[1].value, None);
        assert_eq!(table.rows()[1].raw_value, None);
    }

    #[test]
    fn test_build_from_outputs_dir() {
        let temp = TempDir::new().unwrap();
        let outputs = temp.path().join("outputs");
        fs::create_dir_all(&outputs).unwrap();
        fs::write(outputs.join("costs_2030.csv"), COSTS_2030).unwrap();
        fs::write(outputs.join("costs_2025.csv"), COSTS_2030).unwrap();
        fs::write(outputs.join("costs_20250.csv"), COSTS_2030).unwrap();
        fs::write(outputs.join("notes.txt"), "ignored").unwrap();
        // Missing required column: skipped, not fatal
        fs::write(outputs.join("costs_2040.csv"), "foo,bar\n1,2\n").unwrap();

        let index = ResultIndex::build(&outputs, "costs");
        assert_eq!(index.years(), vec![2025, 2030]);
        assert_eq!(index.technologies(2025), vec!["solar", "onwind"]);
    }

    #[test]
    fn test_build_without_outputs_dir() {
        let temp = TempDir::new().unwrap();
        let index = ResultIndex::build(&temp.path().join("outputs"), "costs");
        assert!(index.is_empty());
    }
}
