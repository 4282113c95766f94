// State records and CSV parsing
// Fixed five-column schema: state,abbreviation,capital,population,area_sq_mi

use crate::error::{LoadError, LoadResult};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Expected header row, in column order
pub const HEADER: [&str; 5] = ["state", "abbreviation", "capital", "population", "area_sq_mi"];

/// One U.S. state, as read from a source row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub state: String,
    pub abbreviation: String,
    pub capital: String,
    pub population: u64,
    pub area_sq_mi: u64,
}

impl StateRecord {
    /// Build a record from one CSV row; `line` is the row's 1-based source line
    pub fn from_fields(fields: &StringRecord, line: u64) -> LoadResult<Self> {
        if fields.len() != HEADER.len() {
            return Err(LoadError::parse(
                line,
                format!("expected {} columns, found {}", HEADER.len(), fields.len()),
            ));
        }

        let state = required_text(&fields[0], "state", line)?;
        let abbreviation = parse_abbreviation(&fields[1], line)?;
        let capital = required_text(&fields[2], "capital", line)?;
        let population = parse_count(&fields[3], "population", line)?;
        let area_sq_mi = parse_count(&fields[4], "area_sq_mi", line)?;

        Ok(StateRecord {
            state,
            abbreviation,
            capital,
            population,
            area_sq_mi,
        })
    }

    /// Parse a single headerless data row
    pub fn parse_row(row: &str, line: u64) -> LoadResult<Self> {
        let mut rdr = reader(row.as_bytes(), false);
        match rdr.records().next() {
            Some(Ok(fields)) => Self::from_fields(&fields, line),
            Some(Err(e)) => Err(LoadError::parse(line, e.to_string())),
            None => Err(LoadError::parse(line, "empty row")),
        }
    }
}

fn reader(data: &[u8], has_headers: bool) -> csv::Reader<&[u8]> {
    ReaderBuilder::new()
        .has_headers(has_headers)
        // Column counts are checked per row so the error can name the line
        .flexible(true)
        .trim(Trim::All)
        .from_reader(data)
}

fn required_text(value: &str, column: &str, line: u64) -> LoadResult<String> {
    if value.is_empty() {
        return Err(LoadError::parse(line, format!("{} is empty", column)));
    }
    Ok(value.to_string())
}

fn parse_abbreviation(value: &str, line: u64) -> LoadResult<String> {
    if value.len() != 2 || !value.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(LoadError::parse(
            line,
            format!("abbreviation must be a 2-letter code, got '{}'", value),
        ));
    }
    Ok(value.to_string())
}

/// Non-negative integer that also fits a signed 64-bit warehouse column
fn parse_count(value: &str, column: &str, line: u64) -> LoadResult<u64> {
    let parsed: u64 = value.parse().map_err(|_| {
        LoadError::parse(
            line,
            format!("{} must be a non-negative integer, got '{}'", column, value),
        )
    })?;

    if i64::try_from(parsed).is_err() {
        return Err(LoadError::parse(
            line,
            format!("{} {} exceeds the INTEGER range", column, parsed),
        ));
    }

    Ok(parsed)
}

fn check_header(headers: &StringRecord) -> LoadResult<()> {
    if headers.is_empty() || (headers.len() == 1 && headers[0].is_empty()) {
        return Err(LoadError::parse(1, "missing header row"));
    }

    let found: Vec<&str> = headers.iter().collect();
    if found != HEADER {
        return Err(LoadError::parse(
            1,
            format!(
                "header must be '{}', found '{}'",
                HEADER.join(","),
                found.join(",")
            ),
        ));
    }

    Ok(())
}

/// Parse a whole source file. Fails on the first bad line; nothing is
/// returned unless every row parsed.
pub fn parse_records(data: &[u8]) -> LoadResult<Vec<StateRecord>> {
    let mut rdr = reader(data, true);

    let headers = rdr
        .headers()
        .map_err(|e| LoadError::parse(position_line(&e).unwrap_or(1), e.to_string()))?
        .clone();
    check_header(&headers)?;

    let mut records = Vec::new();
    let mut seen = HashSet::new();

    for result in rdr.records() {
        let fields = result.map_err(|e| {
            let line = position_line(&e).unwrap_or(0);
            LoadError::parse(line, e.to_string())
        })?;
        let line = fields.position().map(|p| p.line()).unwrap_or(0);

        let record = StateRecord::from_fields(&fields, line)?;

        if !seen.insert(record.abbreviation.clone()) {
            tracing::warn!(
                abbreviation = %record.abbreviation,
                line,
                "duplicate abbreviation in batch; loading anyway"
            );
        }

        records.push(record);
    }

    Ok(records)
}

fn position_line(err: &csv::Error) -> Option<u64> {
    err.position().map(|p| p.line())
}
