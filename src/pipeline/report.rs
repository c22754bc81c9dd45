//! Structured run report written once per pipeline run.

use crate::core::{FallbackKind, FitStatus, FitSummary, GeoLevel, GeographyId};
use crate::data::Exclusion;
use crate::error::Result;
use crate::recovery::RecoveryTrace;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// How a geography's forecasts were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeographyOutcome {
    /// A fitted model produced the forecasts.
    Modelled,
    /// Fitting failed; forecasts come from the fallback ladder.
    Fallback,
    /// Excluded before fitting; no forecasts.
    Skipped,
}

/// Per-geography entry of the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeographyReport {
    pub geography: GeographyId,
    pub level: GeoLevel,
    pub outcome: GeographyOutcome,
    pub status: FitStatus,
    /// Fitted model description, when a model was fitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<FitSummary>,
    /// Attempt that fitted, e.g. `primary` or `ridge-regularized`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<String>,
    /// Fallback used per scenario.
    #[serde(default)]
    pub fallbacks: BTreeMap<String, FallbackKind>,
    pub trace: RecoveryTrace,
}

impl GeographyReport {
    pub fn used_fallback(&self) -> bool {
        !self.fallbacks.is_empty()
    }
}

/// Counts for one level of the hierarchy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCounts {
    pub total: usize,
    pub succeeded: usize,
    pub degraded: usize,
    pub fallback: usize,
    pub skipped: usize,
}

impl LevelCounts {
    /// Share of geographies that ended in fallback or were skipped.
    pub fn failure_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.fallback + self.skipped) as f64 / self.total as f64
        }
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub scenarios: Vec<String>,
    pub geographies: Vec<GeographyReport>,
    /// Geographies dropped while building the dataset.
    pub exclusions: Vec<Exclusion>,
    pub regions: LevelCounts,
    pub areas: LevelCounts,
    /// Pipeline-level warnings such as failure-budget breaches.
    pub warnings: Vec<String>,
}

impl RunReport {
    pub fn new(scenarios: Vec<String>, mut geographies: Vec<GeographyReport>, exclusions: Vec<Exclusion>) -> Self {
        geographies.sort_by(|a, b| (a.level, &a.geography).cmp(&(b.level, &b.geography)));
        let count = |level: GeoLevel| {
            let mut counts = LevelCounts::default();
            for g in geographies.iter().filter(|g| g.level == level) {
                counts.total += 1;
                match g.outcome {
                    GeographyOutcome::Skipped => counts.skipped += 1,
                    GeographyOutcome::Fallback => counts.fallback += 1,
                    GeographyOutcome::Modelled if g.status.is_degraded() => counts.degraded += 1,
                    GeographyOutcome::Modelled => counts.succeeded += 1,
                }
            }
            counts
        };
        Self {
            generated_at: Utc::now(),
            scenarios,
            regions: count(GeoLevel::Region),
            areas: count(GeoLevel::Area),
            geographies,
            exclusions,
            warnings: Vec::new(),
        }
    }

    pub fn geography(&self, id: &GeographyId) -> Option<&GeographyReport> {
        self.geographies.iter().find(|g| &g.geography == id)
    }

    pub fn counts(&self, level: GeoLevel) -> &LevelCounts {
        match level {
            GeoLevel::Region => &self.regions,
            GeoLevel::Area => &self.areas,
        }
    }

    /// Add a warning for each level whose failure ratio exceeds its budget.
    pub fn check_budgets(&mut self, max_region_ratio: f64, max_area_ratio: f64) -> bool {
        let mut breached = false;
        for (level, budget) in [(GeoLevel::Region, max_region_ratio), (GeoLevel::Area, max_area_ratio)] {
            let counts = *self.counts(level);
            if counts.failure_ratio() > budget + 1e-9 {
                breached = true;
                self.warnings.push(format!(
                    "{} failure budget exceeded: {} of {} in fallback or skipped (budget {:.1}%)",
                    level.as_str(),
                    counts.fallback + counts.skipped,
                    counts.total,
                    100.0 * budget
                ));
            }
        }
        breached
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}
