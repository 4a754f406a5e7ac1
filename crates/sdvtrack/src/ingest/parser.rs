//! Turns the bytes of one chunk into typed rows.

use crate::error::{IngestError, RowError};
use crate::ingest::chunker::{ChunkPlan, ChunkSpec, ColumnLayout};
use crate::model::row::optional_cell;
use crate::model::{
    ChunkRows, CompositeKey, ExtraAttributes, FileRole, PrimaryRow, VerificationRow,
};

/// Rows of a chunk plus the rows that had to be skipped.
#[derive(Debug)]
pub struct ParsedChunk {
    pub rows: ChunkRows,
    pub errors: Vec<RowError>,
}

impl ParsedChunk {
    /// Number of data rows the chunk consumed, skipped ones included.
    pub fn consumed(&self) -> u64 {
        (self.rows.len() + self.errors.len()) as u64
    }
}

/// Parses `bytes` (exactly the chunk's byte range) using the plan's layout.
///
/// Malformed rows become [`RowError`]s; only an unreadable chunk fails.
pub fn parse_chunk(
    plan: &ChunkPlan,
    spec: &ChunkSpec,
    bytes: &[u8],
) -> Result<ParsedChunk, IngestError> {
    let layout = &plan.layout;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(plan.delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut primary = Vec::new();
    let mut verification = Vec::new();
    let mut errors = Vec::new();
    let mut record = csv::ByteRecord::new();
    let mut row_number = spec.first_row;

    while reader.read_byte_record(&mut record)? {
        let cells = match decode_cells(layout, &record, row_number) {
            Ok(cells) => cells,
            Err(e) => {
                log::debug!("Skipping {}", e);
                errors.push(e);
                row_number += 1;
                continue;
            }
        };

        let result = match layout.role {
            FileRole::Primary => {
                build_primary(layout, &record, &cells, row_number).map(|r| primary.push(r))
            }
            FileRole::Verification => build_verification(layout, &record, &cells, row_number)
                .map(|r| verification.push(r)),
        };
        if let Err(e) = result {
            log::debug!("Skipping {}", e);
            errors.push(e);
        }
        row_number += 1;
    }

    let consumed = row_number - spec.first_row;
    if consumed != spec.row_count {
        log::warn!(
            "Chunk {} held {} rows, plan expected {}",
            spec.index,
            consumed,
            spec.row_count
        );
    }

    let rows = match layout.role {
        FileRole::Primary => ChunkRows::Primary(primary),
        FileRole::Verification => ChunkRows::Verification(verification),
    };
    Ok(ParsedChunk { rows, errors })
}

/// Required cells of a row, in the role's canonical column order.
fn decode_cells<'r>(
    layout: &ColumnLayout,
    record: &'r csv::ByteRecord,
    row: u64,
) -> Result<Vec<&'r str>, RowError> {
    if record.len() < layout.min_width() {
        return Err(RowError::MissingFields {
            row,
            expected: layout.width,
            found: record.len(),
        });
    }

    layout
        .required
        .iter()
        .map(|&index| {
            let raw = record.get(index).unwrap_or_default();
            std::str::from_utf8(raw).map_err(|e| RowError::Malformed {
                row,
                reason: format!("column {} is not valid UTF-8: {}", index + 1, e),
            })
        })
        .collect()
}

fn build_key(cells: &[&str], row: u64) -> Result<CompositeKey, RowError> {
    CompositeKey::from_raw(cells[0], cells[1], cells[2], cells[3], cells[4])
        .map_err(|column| RowError::BlankKey { row, column })
}

fn build_extra(layout: &ColumnLayout, record: &csv::ByteRecord) -> ExtraAttributes {
    let mut extra = ExtraAttributes::new();
    for column in &layout.extras {
        if let Some(raw) = record.get(column.index) {
            let value = String::from_utf8_lossy(raw);
            if !value.trim().is_empty() {
                extra.insert(&column.name, &value);
            }
        }
    }
    extra
}

fn build_primary(
    layout: &ColumnLayout,
    record: &csv::ByteRecord,
    cells: &[&str],
    row: u64,
) -> Result<PrimaryRow, RowError> {
    let key = build_key(cells, row)?;
    Ok(PrimaryRow {
        row_number: row,
        key,
        value: cells[5].trim().to_string(),
        entered_by: optional_cell(cells[6]),
        entered_date: optional_cell(cells[7]),
        extra: build_extra(layout, record),
    })
}

fn build_verification(
    layout: &ColumnLayout,
    record: &csv::ByteRecord,
    cells: &[&str],
    row: u64,
) -> Result<VerificationRow, RowError> {
    let key = build_key(cells, row)?;
    Ok(VerificationRow {
        row_number: row,
        key,
        verified_by: optional_cell(cells[5]),
        verified_date: optional_cell(cells[6]),
        verification_status: optional_cell(cells[7]),
        extra: build_extra(layout, record),
    })
}
