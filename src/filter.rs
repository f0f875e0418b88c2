// Date-range and categorical filtering over a survey table

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::models::{SurveyRecord, SurveyTable};

// Inclusive date range; `end` covers its whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    pub fn single_day(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.start > self.end {
            return Err(ValidationError::InvertedDateRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    pub fn lower_bound(&self) -> NaiveDateTime {
        self.start.and_hms_opt(0, 0, 0).unwrap_or(NaiveDateTime::MIN)
    }

    // end + 1 day - 1ns
    pub fn upper_bound(&self) -> NaiveDateTime {
        self.end
            .and_hms_nano_opt(23, 59, 59, 999_999_999)
            .unwrap_or(NaiveDateTime::MAX)
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.lower_bound() <= t && t <= self.upper_bound()
    }
}

// Everything the presentation layer selected, rebuilt per interaction.
// An empty value set for a column means "no constraint on this column".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub selections: BTreeMap<String, BTreeSet<String>>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dates(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn select<I, S>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selections
            .insert(column.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_unconstrained(&self) -> bool {
        self.date_range.is_none() && self.selections.values().all(BTreeSet::is_empty)
    }
}

enum Predicate<'a> {
    Submitted { from: NaiveDateTime, to: NaiveDateTime },
    OneOf { column: &'a str, allowed: &'a BTreeSet<String> },
}

impl Predicate<'_> {
    fn keeps(&self, row: &SurveyRecord) -> bool {
        match self {
            Predicate::Submitted { from, to } => {
                *from <= row.submission_time && row.submission_time <= *to
            }
            Predicate::OneOf { column, allowed } => allowed.contains(&row.display(column)),
        }
    }
}

// Returns the rows of `table` matching every predicate in `spec`.
// The input is never modified and the result keeps every column. Selections
// on columns the table does not have are ignored.
pub fn filter(table: &SurveyTable, spec: &FilterSpec) -> Result<SurveyTable, ValidationError> {
    if spec.is_unconstrained() {
        return Ok(table.clone());
    }

    let mut predicates = Vec::new();

    if let Some(range) = &spec.date_range {
        range.validate()?;
        predicates.push(Predicate::Submitted {
            from: range.lower_bound(),
            to: range.upper_bound(),
        });
    }

    for (column, allowed) in &spec.selections {
        if allowed.is_empty() {
            continue;
        }
        if !table.has_column(column) {
            tracing::debug!(column = %column, "Ignoring selection on a column this table does not have");
            continue;
        }
        predicates.push(Predicate::OneOf { column, allowed });
    }

    let rows: Vec<Arc<SurveyRecord>> = table
        .rows()
        .iter()
        .filter(|row| predicates.iter().all(|p| p.keeps(row)))
        .cloned()
        .collect();

    tracing::debug!(
        kept = rows.len(),
        total = table.len(),
        predicates = predicates.len(),
        "Filtered survey table"
    );
    Ok(table.with_rows(rows))
}
