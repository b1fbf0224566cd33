//! Parsing of column-aligned tabular scheduler output.
//!
//! Column boundaries come from the header, never from fixed widths: the dash
//! separator line under the header is used when present, otherwise header
//! tokens separated by two or more spaces mark the column starts.

use std::collections::BTreeMap;

/// One data row, keyed by header column name.
pub type TableRow = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Column {
    name: String,
    start: usize,
    end: Option<usize>,
}

/// Parse a table whose header row is the first line accepted by `is_header`.
///
/// Lines before the header (banners, secondary header lines) are ignored.
/// Returns an empty list if no header is found.
pub fn parse_table(text: &str, is_header: impl Fn(&str) -> bool) -> Vec<TableRow> {
    let lines: Vec<&str> = text.lines().collect();
    let Some(header_pos) = lines.iter().position(|line| is_header(line)) else {
        return Vec::new();
    };

    let header = lines[header_pos];
    let mut body = &lines[header_pos + 1..];

    let columns = match body.first() {
        Some(line) if is_separator(line) => {
            let columns = columns_from_separator(header, line);
            body = &body[1..];
            columns
        }
        _ => columns_from_header(header),
    };

    if columns.is_empty() {
        return Vec::new();
    }

    body.iter()
        .filter(|line| !line.trim().is_empty() && !is_separator(line))
        .map(|line| split_row(line, &columns))
        .collect()
}

fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c == '-' || c.is_whitespace())
}

fn columns_from_separator(header: &str, separator: &str) -> Vec<Column> {
    let bytes = separator.as_bytes();
    let mut starts = Vec::new();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'-' && (i == 0 || bytes[i - 1] != b'-') {
            starts.push(i);
        }
    }
    build_columns(header, &starts)
}

fn columns_from_header(header: &str) -> Vec<Column> {
    let bytes = header.as_bytes();
    let mut starts = Vec::new();
    for (i, b) in bytes.iter().enumerate() {
        if b.is_ascii_whitespace() {
            continue;
        }
        let gap = bytes[..i]
            .iter()
            .rev()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        if starts.is_empty() || gap >= 2 {
            starts.push(i);
        }
    }
    build_columns(header, &starts)
}

fn build_columns(header: &str, starts: &[usize]) -> Vec<Column> {
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied();
            let name = slice(header, start, end);
            Column {
                name: if name.is_empty() {
                    format!("column{}", i)
                } else {
                    name.to_string()
                },
                start,
                end,
            }
        })
        .collect()
}

fn split_row(line: &str, columns: &[Column]) -> TableRow {
    // Rows with one token per column are immune to alignment drift.
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() == columns.len() {
        return columns
            .iter()
            .zip(tokens)
            .map(|(column, token)| (column.name.clone(), token.to_string()))
            .collect();
    }

    columns
        .iter()
        .map(|column| {
            (
                column.name.clone(),
                slice(line, column.start, column.end).to_string(),
            )
        })
        .collect()
}

fn slice(line: &str, start: usize, end: Option<usize>) -> &str {
    let len = line.len();
    let start = start.min(len);
    let end = end.map_or(len, |e| e.min(len));
    line.get(start..end).unwrap_or("").trim()
}
