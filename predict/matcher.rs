//! Row selection and pattern matching against a [`ClinicalTable`].
//!
//! The observed side of a prevalence scenario: how many eligible patients in
//! the cohort show the scenario's pattern under a given diagnostic modality.

use crate::pattern::{self, Pattern, Side, SidePattern};
use crate::scenario::{PrevalenceScenario, TStage};
use crate::table::{ClinicalTable, RowMask};
use ndarray::Array1;
use thiserror::Error;

/// The clinical table does not have the layout a query needs.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Data has neither 2 nor 3 header rows (found {0}).")]
    Depth(usize),
    #[error("Data does not seem to have midline extension information.")]
    MissingMidline,
    #[error("Data has no columns for the diagnostic modality '{0}'.")]
    MissingModality(String),
    #[error("Data has no column for lymph node level '{0}'.")]
    MissingColumn(String),
    #[error("Data has no '{0}' information.")]
    MissingInfo(&'static str),
    #[error(transparent)]
    Table(#[from] crate::table::TableError),
}

/// Observed matches of a pattern among the eligible patients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedCounts {
    pub matched: usize,
    pub total: usize,
}

fn stage_column(table: &ClinicalTable) -> Result<&[Option<String>], SchemaError> {
    let label: &[&str] = match table.depth() {
        2 => &["info", "t_stage"],
        3 => &["info", "tumor", "t_stage"],
        other => return Err(SchemaError::Depth(other)),
    };
    table
        .column(label)
        .map(|c| c.cells.as_slice())
        .ok_or(SchemaError::MissingInfo("t_stage"))
}

/// Rows whose t-stage matches `stage`. The `early/late` marker selects every
/// row staged as either `early` or `late`.
pub fn stage_selector(table: &ClinicalTable, stage: &TStage) -> Result<RowMask, SchemaError> {
    let cells = stage_column(table)?;
    Ok(cells
        .iter()
        .map(|cell| match cell.as_deref() {
            Some(value) => stage.matches(value),
            None => false,
        })
        .collect())
}

/// Rows whose midline extension matches `midline_ext`. Unknown extension, or
/// a unilateral table, selects every row.
pub fn midline_selector(
    table: &ClinicalTable,
    midline_ext: Option<bool>,
) -> Result<RowMask, SchemaError> {
    let wanted = match midline_ext {
        Some(wanted) if table.depth() != 2 => wanted,
        _ => return Ok(Array1::from_elem(table.num_rows(), true)),
    };
    let column = table
        .column(&["info", "tumor", "midline_extension"])
        .ok_or(SchemaError::MissingMidline)?;
    Ok(column
        .bools()?
        .into_iter()
        .map(|cell| cell == Some(wanted))
        .collect())
}

/// Number of levels in `levels` that `pattern` actually constrains.
pub fn constrained_levels(pattern: &SidePattern, levels: &[String]) -> usize {
    levels
        .iter()
        .filter(|lnl| pattern.get(*lnl).is_some_and(|s| s.is_known()))
        .count()
}

/// Row predicate for one side's `pattern` over the requested `levels` of a
/// single-level table slice.
///
/// Normal mode ANDs per-level equality starting from all rows; inverted mode
/// ORs per-level inequality starting from no rows, i.e. "at least one
/// specified level disagrees". A missing cell never equals a state.
pub fn pattern_match_mask(
    slice: &ClinicalTable,
    pattern: &SidePattern,
    levels: &[String],
    invert: bool,
) -> Result<RowMask, SchemaError> {
    let mut mask = Array1::from_elem(slice.num_rows(), !invert);
    for lnl in levels {
        let Some(wanted) = pattern.get(lnl).and_then(|s| s.as_bool()) else {
            continue;
        };
        let column = slice
            .column(&[lnl.as_str()])
            .ok_or_else(|| SchemaError::MissingColumn(lnl.clone()))?;
        let cells = column.bools()?;
        for (keep, cell) in mask.iter_mut().zip(cells) {
            let equal = cell == Some(wanted);
            if invert {
                *keep |= !equal;
            } else {
                *keep &= equal;
            }
        }
    }
    Ok(mask)
}

/// Counts the eligible patients of `table` and how many of them show the
/// scenario's pattern.
pub fn count_observed(
    table: &ClinicalTable,
    scenario: &PrevalenceScenario,
    levels: &[String],
) -> Result<ObservedCounts, SchemaError> {
    let pattern = pattern::complete(&scenario.pattern, levels);
    let invert = scenario.invert;

    let stage_ok = stage_selector(table, &scenario.t_stage)?;
    let midline_ok = midline_selector(table, scenario.midline_ext)?;
    let eligible_mask = &stage_ok & &midline_ok;

    let eligible = table
        .filter(&eligible_mask)
        .group(&[scenario.modality.as_str()])
        .ok_or_else(|| SchemaError::MissingModality(scenario.modality.clone()))?
        .drop_empty_rows();
    let total = eligible.num_rows();

    let (mask, constrained) = if table.depth() == 2 {
        (
            pattern_match_mask(&eligible, &pattern.ipsi, levels, invert)?,
            constrained_levels(&pattern.ipsi, levels),
        )
    } else {
        side_masks(&eligible, &pattern, levels, invert)?
    };

    if constrained == 0 {
        // Nothing to match against: every eligible row counts in normal mode,
        // none in inverted mode.
        log::warn!(
            "Scenario '{}' constrains no lymph node level; reporting degenerate counts.",
            scenario.name
        );
        let matched = if invert { 0 } else { total };
        return Ok(ObservedCounts { matched, total });
    }

    Ok(ObservedCounts {
        matched: mask.iter().filter(|m| **m).count(),
        total,
    })
}

fn side_masks(
    eligible: &ClinicalTable,
    pattern: &Pattern,
    levels: &[String],
    invert: bool,
) -> Result<(RowMask, usize), SchemaError> {
    let mut mask = Array1::from_elem(eligible.num_rows(), !invert);
    let mut constrained = 0;
    for side in Side::BOTH {
        let side_pattern = pattern.side(side);
        let count = constrained_levels(side_pattern, levels);
        if count == 0 {
            continue;
        }
        let slice = eligible
            .group(&[side.label()])
            .ok_or_else(|| SchemaError::MissingColumn(format!("{} side", side.label())))?;
        let side_mask = pattern_match_mask(&slice, side_pattern, levels, invert)?;
        mask = if invert {
            &mask | &side_mask
        } else {
            &mask & &side_mask
        };
        constrained += count;
    }
    Ok((mask, constrained))
}
