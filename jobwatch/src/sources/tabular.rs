//! Parsers for the two text layouts the scheduler tools print: pipe-delimited
//! tables with a header row, and `Key=Value` detail records.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

pub type Row = BTreeMap<String, String>;

/// Parse a `|`-delimited table. Header names are passed through `rename`,
/// which maps scheduler column names onto canonical field names. Rows whose
/// column count differs from the header are dropped.
pub fn parse_delimited<F>(output: &str, rename: F) -> Vec<Row>
where
    F: Fn(&str) -> Option<&'static str>,
{
    let mut lines = output.lines().filter(|line| !line.trim().is_empty());
    let headers: Vec<String> = match lines.next() {
        Some(header) => header
            .trim()
            .split('|')
            .map(|h| rename(h).map(str::to_string).unwrap_or_else(|| h.to_string()))
            .collect(),
        None => return Vec::new(),
    };

    lines
        .filter_map(|line| {
            let cells: Vec<&str> = line.trim().split('|').collect();
            if cells.len() != headers.len() {
                tracing::warn!(
                    "Skipping row with {} columns (expected {}): {}",
                    cells.len(),
                    headers.len(),
                    line
                );
                return None;
            }
            // Duplicate headers keep the first column's value.
            let mut row = Row::new();
            for (header, cell) in headers.iter().zip(cells) {
                row.entry(header.clone()).or_insert_with(|| cell.to_string());
            }
            Some(row)
        })
        .collect()
}

static DETAIL_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?P<key>[A-Z][A-Za-z_/:]+)=(?P<value>\S+)").unwrap());

/// Keys whose value runs to the end of the line and may contain spaces.
const REST_OF_LINE_KEYS: &[&str] = &["Command"];

/// Parse `scontrol show job` style output into one flat record.
pub fn parse_key_values(output: &str) -> Row {
    let mut record = Row::new();
    for line in output.lines() {
        for caps in DETAIL_PAIR.captures_iter(line) {
            let key = &caps["key"];
            if REST_OF_LINE_KEYS.contains(&key) {
                let start = caps.name("value").map_or(line.len(), |m| m.start());
                record.insert(key.to_string(), line[start..].trim().to_string());
                break;
            }
            record.insert(key.to_string(), caps["value"].to_string());
        }
    }
    record
}
