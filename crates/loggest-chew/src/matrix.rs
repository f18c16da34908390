//! Step x logger entry matrix.
//!
//! Row `2k` holds what each logger did in the gap before step `k`, row
//! `2k + 1` what it did during step `k`, and the final row whatever came
//! after the last step. A cell is a range into the logger's own entry list,
//! or `None` when the logger logged nothing there. Concatenating a column's
//! cells in row order yields the logger's whole entry list: the slicing is a
//! partition, never a filter.

use std::ops::Range;

use serde::Serialize;

use crate::entry::{LogEntry, Stamp};
use crate::error::{ChewError, Result};

/// Time span a step covers, taken from its own `run` bracketing entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepSpan {
    /// The step logged nothing; it claims no entries.
    Empty,
    /// The step began but never finished (crash, hang): it claims everything
    /// from its start onwards.
    Open { start: Stamp },
    Closed { start: Stamp, end: Stamp },
}

impl StepSpan {
    #[must_use]
    pub fn start(&self) -> Option<Stamp> {
        match self {
            Self::Empty => None,
            Self::Open { start } | Self::Closed { start, .. } => Some(*start),
        }
    }

    #[must_use]
    pub fn end(&self) -> Option<Stamp> {
        match self {
            Self::Closed { end, .. } => Some(*end),
            Self::Empty | Self::Open { .. } => None,
        }
    }
}

/// Derive step `step`'s span from its sorted entries.
///
/// The first entry must begin the `run_job` async job. A last entry that
/// ends the job or is the `timeout_error` error closes the span; anything
/// else leaves it open.
pub fn step_span(
    step: usize,
    entries: &[LogEntry],
    run_job: &str,
    timeout_error: &str,
) -> Result<StepSpan> {
    let Some(first) = entries.first() else {
        return Ok(StepSpan::Empty);
    };
    if !first.is_async_begin(run_job) {
        return Err(ChewError::StepNotStartedByRun {
            step,
            found: first.name().to_string(),
        });
    }
    let start = first.stamp();
    match entries {
        [_, .., last] if last.is_async_end(run_job) || last.is_error_named(timeout_error) => {
            Ok(StepSpan::Closed {
                start,
                end: last.stamp(),
            })
        }
        _ => Ok(StepSpan::Open { start }),
    }
}

pub type Cell = Option<Range<usize>>;

fn cell(start: usize, end: usize) -> Cell {
    (end > start).then_some(start..end)
}

/// Slice one logger's chronologically ordered entries into `2 * spans + 1`
/// cells with a single forward scan.
#[must_use]
pub fn slice_column(entries: &[LogEntry], spans: &[StepSpan]) -> Vec<Cell> {
    let len = entries.len();
    let mut cells = Vec::with_capacity(2 * spans.len() + 1);
    let mut i = 0;

    for span in spans {
        let mark = i;
        if let Some(start) = span.start() {
            while i < len && entries[i].stamp() < start {
                i += 1;
            }
        }
        cells.push(cell(mark, i));

        let mark = i;
        match span {
            StepSpan::Empty => {}
            StepSpan::Open { .. } => i = len,
            StepSpan::Closed { end, .. } => {
                while i < len && entries[i].stamp() <= *end {
                    i += 1;
                }
            }
        }
        cells.push(cell(mark, i));
    }

    cells.push(cell(i, len));
    cells
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntryMatrix {
    rows: Vec<Vec<Cell>>,
    columns: usize,
}

impl EntryMatrix {
    /// An all-`None` matrix of `2 * step_count + 1` rows.
    #[must_use]
    pub fn new(step_count: usize, columns: usize) -> Self {
        Self {
            rows: vec![vec![None; columns]; 2 * step_count + 1],
            columns,
        }
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns
    }

    #[must_use]
    pub fn cell(&self, row: usize, column: usize) -> Cell {
        self.rows.get(row)?.get(column)?.clone()
    }

    #[must_use]
    pub fn row(&self, row: usize) -> Option<&[Cell]> {
        self.rows.get(row).map(Vec::as_slice)
    }

    /// Install the cells of one column; missing trailing rows stay `None`.
    pub fn set_column(&mut self, column: usize, cells: Vec<Cell>) {
        for (row, cell) in self.rows.iter_mut().zip(cells) {
            row[column] = cell;
        }
    }

    /// Row index of the gap before step `k`.
    #[must_use]
    pub const fn before_row(step: usize) -> usize {
        2 * step
    }

    /// Row index of step `k` itself.
    #[must_use]
    pub const fn during_row(step: usize) -> usize {
        2 * step + 1
    }

    /// Row index of everything after the last step.
    #[must_use]
    pub fn leftover_row(&self) -> usize {
        self.rows.len() - 1
    }
}
