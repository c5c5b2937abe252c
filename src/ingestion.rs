use crate::error::{LedgerError, Result};
use crate::schema::{CellValue, LedgerEntry, RawRow, UNCATEGORIZED_SECTION};
use crate::utils::parse_numeric_value;
use calamine::{Data, Reader, Xlsx};
use log::debug;
use std::io::Cursor;
use uuid::Uuid;

/// Value placed in either amount column to mark a row as a section header.
pub const SECTION_MARKER: &str = "#";

/// Label prefix (lowercased) that marks a total line.
pub const TOTAL_PREFIX: &str = "jumlah";

pub fn is_total_label(label: &str) -> bool {
    label.trim().to_lowercase().starts_with(TOTAL_PREFIX)
}

fn is_section_marker(cell: &CellValue) -> bool {
    cell.as_trimmed_text() == SECTION_MARKER
}

/// Convert worksheet rows into ordered ledger entries.
///
/// The first row is the sheet header and is dropped. Rows with a blank label are
/// skipped without consuming a sort order. `statement_id` is left unset.
pub fn parse_statement_rows(
    rows: &[RawRow],
    year_current: i32,
    year_previous: i32,
) -> Vec<LedgerEntry> {
    let mut current_section: Option<String> = None;
    let mut sort_order: u32 = 0;
    let mut entries = Vec::new();

    for row in rows.iter().skip(1) {
        let label = row.label.as_trimmed_text();
        if label.is_empty() {
            continue;
        }
        sort_order += 1;

        if is_section_marker(&row.previous) || is_section_marker(&row.current) {
            current_section = Some(label.clone());
            entries.push(LedgerEntry {
                statement_id: None,
                section: label.clone(),
                label,
                amount_current: None,
                amount_previous: None,
                year_current,
                year_previous,
                is_total: false,
                parent_section: None,
                sort_order,
            });
            continue;
        }

        entries.push(LedgerEntry {
            statement_id: None,
            section: current_section
                .clone()
                .unwrap_or_else(|| UNCATEGORIZED_SECTION.to_string()),
            is_total: is_total_label(&label),
            label,
            amount_current: Some(parse_numeric_value(&row.current)),
            amount_previous: Some(parse_numeric_value(&row.previous)),
            year_current,
            year_previous,
            parent_section: current_section.clone(),
            sort_order,
        });
    }

    debug!(
        "Parsed {} ledger entries from {} worksheet rows",
        entries.len(),
        rows.len()
    );

    entries
}

pub fn assign_statement_id(entries: &mut [LedgerEntry], statement_id: Uuid) {
    for entry in entries {
        entry.statement_id = Some(statement_id);
    }
}

/// Read columns A-C of the first worksheet of an `.xlsx` workbook.
pub fn read_statement_rows(bytes: &[u8]) -> Result<Vec<RawRow>> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| LedgerError::Validation("No worksheet found in the Excel file".to_string()))??;

    // Ranges begin at the first used cell, so column A may be offset.
    let start_col = range.start().map(|(_, col)| col).unwrap_or(0);
    let cell = |row: &[Data], col: u32| -> CellValue {
        if col < start_col {
            return CellValue::Empty;
        }
        row.get((col - start_col) as usize)
            .map(cell_value)
            .unwrap_or_default()
    };

    let rows = range
        .rows()
        .map(|row| RawRow {
            label: cell(row, 0),
            previous: cell(row, 1),
            current: cell(row, 2),
        })
        .collect();

    Ok(rows)
}

pub fn cell_value(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::Bool(b) => CellValue::Text(b.to_string()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Text(e.to_string()),
    }
}
