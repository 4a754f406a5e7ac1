//! Splits a submitted file into ordered, bounded chunks.
//!
//! Planning reads the file once: it validates the header against the role's
//! required column set and records, for every chunk, the byte range its rows
//! occupy. Chunks are later re-read through a ranged blob read, so the plan
//! (not the rows) is what gets persisted with the job.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::config::ChunkConfig;
use crate::error::IngestError;
use crate::model::columns::{missing_columns, required_columns, MAX_EXTRA_ATTRIBUTES};
use crate::model::{normalize_header, FileRole};

const CANDIDATE_DELIMITERS: [u8; 3] = [b',', b';', b'\t'];

/// A non-required column carried into the extra attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraColumn {
    pub name: String,
    pub index: usize,
}

/// Where each column of interest sits in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLayout {
    pub role: FileRole,
    /// Number of header cells.
    pub width: usize,
    /// Position of each required column, in the role's canonical order.
    pub required: Vec<usize>,
    pub extras: Vec<ExtraColumn>,
}

impl ColumnLayout {
    /// Maps normalized headers onto the role's required set.
    ///
    /// Fails with the full list of missing columns. Duplicate headers resolve
    /// to their first occurrence.
    pub fn from_headers(role: FileRole, headers: &[String]) -> Result<Self, IngestError> {
        let missing = missing_columns(role, headers);
        if !missing.is_empty() {
            return Err(IngestError::Validation { role, missing });
        }

        let required_set = required_columns(role);
        let required = required_set
            .iter()
            .filter_map(|name| headers.iter().position(|h| h == name))
            .collect();

        let mut extras: Vec<ExtraColumn> = Vec::new();
        let mut dropped = 0usize;
        for (index, name) in headers.iter().enumerate() {
            if name.is_empty()
                || required_set.contains(&name.as_str())
                || extras.iter().any(|e| &e.name == name)
            {
                continue;
            }
            if extras.len() >= MAX_EXTRA_ATTRIBUTES {
                dropped += 1;
                continue;
            }
            extras.push(ExtraColumn {
                name: name.clone(),
                index,
            });
        }
        if dropped > 0 {
            log::warn!(
                "Ignoring {} extra {} columns beyond the limit of {}",
                dropped,
                role,
                MAX_EXTRA_ATTRIBUTES
            );
        }

        Ok(Self {
            role,
            width: headers.len(),
            required,
            extras,
        })
    }

    /// Position of a required column by its normalized name.
    pub fn position(&self, name: &str) -> Option<usize> {
        required_columns(self.role)
            .iter()
            .position(|required| *required == name)
            .and_then(|i| self.required.get(i).copied())
    }

    /// Minimum number of cells a row needs to carry every required column.
    pub fn min_width(&self) -> usize {
        self.required.iter().max().map_or(0, |max| max + 1)
    }
}

/// One chunk of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpec {
    /// 0-based position in the plan.
    pub index: u32,
    /// 1-based data row number of the chunk's first row.
    pub first_row: u64,
    pub row_count: u64,
    /// Byte offset of the first row within the file.
    pub start: u64,
    /// Byte offset just past the chunk's last row.
    pub end: u64,
}

impl ChunkSpec {
    pub fn byte_range(&self) -> Range<u64> {
        self.start..self.end
    }
}

/// The persisted recipe for processing a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub delimiter: u8,
    pub layout: ColumnLayout,
    pub total_records: u64,
    pub total_bytes: u64,
    pub chunks: Vec<ChunkSpec>,
}

impl ChunkPlan {
    pub fn role(&self) -> FileRole {
        self.layout.role
    }

    pub fn total_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }
}

/// Picks the delimiter occurring most often (outside quotes) in the header
/// line. Ties, and headers with none of the candidates, fall back to `,`.
pub fn sniff_delimiter(data: &[u8]) -> u8 {
    let mut counts = [0usize; CANDIDATE_DELIMITERS.len()];
    let mut in_quotes = false;

    for &b in data {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'\n' | b'\r' if !in_quotes => break,
            _ if !in_quotes => {
                if let Some(i) = CANDIDATE_DELIMITERS.iter().position(|d| *d == b) {
                    counts[i] += 1;
                }
            }
            _ => {}
        }
    }

    let mut best = 0;
    for i in 1..counts.len() {
        if counts[i] > counts[best] {
            best = i;
        }
    }
    CANDIDATE_DELIMITERS[best]
}

/// Validates `data` for `role` and splits its rows into chunks.
///
/// Row order is preserved exactly: chunk `n + 1` starts where chunk `n`
/// ends. A header-only file yields a plan with zero chunks.
pub fn plan_chunks(
    data: &[u8],
    role: FileRole,
    limits: &ChunkConfig,
) -> Result<ChunkPlan, IngestError> {
    let delimiter = sniff_delimiter(data);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(data);

    let raw_headers = reader.byte_headers()?.clone();
    let headers: Vec<String> = raw_headers
        .iter()
        .map(|h| normalize_header(&String::from_utf8_lossy(h)))
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(IngestError::EmptyHeader);
    }

    let layout = ColumnLayout::from_headers(role, &headers)?;

    let max_rows = limits.max_rows.max(1) as u64;
    let mut chunks: Vec<ChunkSpec> = Vec::new();
    let mut current: Option<ChunkSpec> = None;
    let mut rows: u64 = 0;
    let mut record = csv::ByteRecord::new();

    while reader.read_byte_record(&mut record)? {
        let start = match record.position() {
            Some(pos) => pos.byte(),
            None => reader.position().byte(),
        };
        rows += 1;

        let full = current
            .as_ref()
            .is_some_and(|c| c.row_count >= max_rows || start - c.start >= limits.max_bytes);
        if full {
            if let Some(mut done) = current.take() {
                done.end = start;
                chunks.push(done);
            }
        }

        match current.as_mut() {
            Some(chunk) => chunk.row_count += 1,
            None => {
                current = Some(ChunkSpec {
                    index: chunks.len() as u32,
                    first_row: rows,
                    row_count: 1,
                    start,
                    end: start,
                });
            }
        }
    }

    let total_bytes = data.len() as u64;
    if let Some(mut last) = current.take() {
        last.end = total_bytes;
        chunks.push(last);
    }

    log::debug!(
        "Planned {} {} rows into {} chunks",
        rows,
        role,
        chunks.len()
    );

    Ok(ChunkPlan {
        delimiter,
        layout,
        total_records: rows,
        total_bytes,
        chunks,
    })
}
