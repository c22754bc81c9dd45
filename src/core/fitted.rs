//! Fit status, diagnostics and attempt parameters shared by both model stages.

use crate::config::LagCriterion;
use crate::core::forecast::ModelKind;
use crate::core::geography::{GeoLevel, GeographyId};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Outcome of a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FitStatus {
    /// All diagnostics passed.
    Success,
    /// The model forecasts, but with reduced confidence.
    Degraded { reasons: Vec<String> },
    /// No model could be fitted.
    Failed { reason: String },
}

impl FitStatus {
    /// Status from a list of degradation reasons.
    pub fn from_reasons(reasons: Vec<String>) -> Self {
        if reasons.is_empty() {
            FitStatus::Success
        } else {
            FitStatus::Degraded { reasons }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FitStatus::Success)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, FitStatus::Degraded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FitStatus::Failed { .. })
    }

    /// Reasons attached to a degraded status.
    pub fn reasons(&self) -> &[String] {
        match self {
            FitStatus::Degraded { reasons } => reasons,
            _ => &[],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FitStatus::Success => "success",
            FitStatus::Degraded { .. } => "degraded",
            FitStatus::Failed { .. } => "failed",
        }
    }
}

/// Result of one statistical check on a fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticTest {
    /// Test name, e.g. `ljung-box`.
    pub name: String,
    /// Series or equation the test was applied to.
    pub variable: Option<String>,
    #[serde(deserialize_with = "nan_if_null")]
    pub statistic: f64,
    #[serde(deserialize_with = "nan_if_null")]
    pub p_value: f64,
    pub passed: bool,
}

/// JSON writes non-finite floats as `null`; read them back as NaN.
fn nan_if_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

impl DiagnosticTest {
    /// A test whose null hypothesis is the desirable state: it passes when
    /// the p-value is above `significance` (or undefined).
    pub fn from_p_value(name: &str, statistic: f64, p_value: f64, significance: f64) -> Self {
        Self {
            name: name.to_string(),
            variable: None,
            statistic,
            p_value,
            passed: !(p_value <= significance),
        }
    }

    /// A test with an externally decided verdict.
    pub fn with_verdict(name: &str, statistic: f64, p_value: f64, passed: bool) -> Self {
        Self {
            name: name.to_string(),
            variable: None,
            statistic,
            p_value,
            passed,
        }
    }

    pub fn on(mut self, variable: impl Into<String>) -> Self {
        self.variable = Some(variable.into());
        self
    }

    /// Reason label used in degraded statuses, e.g. `ljung-box:volume`.
    pub fn failure_reason(&self) -> String {
        match &self.variable {
            Some(v) => format!("{}:{}", self.name, v),
            None => self.name.clone(),
        }
    }
}

/// Selected model order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "lowercase")]
pub enum ModelOrder {
    /// VAR lag and per-variable differencing order.
    Var { lag: usize, differencing: Vec<usize> },
    /// ARIMAX (p, d, q).
    Arimax { p: usize, d: usize, q: usize },
}

impl fmt::Display for ModelOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelOrder::Var { lag, differencing } => {
                let d: Vec<String> = differencing.iter().map(|d| d.to_string()).collect();
                write!(f, "VAR({lag}) d=[{}]", d.join(","))
            }
            ModelOrder::Arimax { p, d, q } => write!(f, "ARIMAX({p},{d},{q})"),
        }
    }
}

/// Parameters of one fitting attempt.
///
/// The primary attempt uses the configured search; retries narrow it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    /// Attempt label, e.g. `primary` or `ridge-regularized`.
    pub label: String,
    /// Apply the ridge penalty to the regression.
    pub ridge: bool,
    /// Upper bound on the AR / lag order search.
    pub max_order: Option<usize>,
    /// Skip the search and use this AR / lag order.
    pub fixed_order: Option<usize>,
    /// Override the configured selection criterion.
    pub criterion: Option<LagCriterion>,
    /// Upper bound on the MA order (area models only).
    pub max_ma: Option<usize>,
    /// Force this differencing order (area models only).
    pub fixed_differencing: Option<usize>,
}

impl FitOptions {
    /// The first attempt: configured search, no penalty.
    pub fn primary() -> Self {
        Self {
            label: "primary".to_string(),
            ridge: false,
            max_order: None,
            fixed_order: None,
            criterion: None,
            max_ma: None,
            fixed_differencing: None,
        }
    }

    pub fn labelled(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..Self::primary()
        }
    }

    pub fn with_ridge(mut self) -> Self {
        self.ridge = true;
        self
    }

    pub fn with_max_order(mut self, max_order: usize) -> Self {
        self.max_order = Some(max_order);
        self
    }

    pub fn with_fixed_order(mut self, order: usize) -> Self {
        self.fixed_order = Some(order);
        self
    }

    pub fn with_criterion(mut self, criterion: LagCriterion) -> Self {
        self.criterion = Some(criterion);
        self
    }

    pub fn with_max_ma(mut self, max_ma: usize) -> Self {
        self.max_ma = Some(max_ma);
        self
    }

    pub fn with_fixed_differencing(mut self, d: usize) -> Self {
        self.fixed_differencing = Some(d);
        self
    }
}

impl fmt::Display for FitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)?;
        let mut params = Vec::new();
        if self.ridge {
            params.push("ridge".to_string());
        }
        if let Some(order) = self.fixed_order {
            params.push(format!("order={order}"));
        }
        if let Some(max) = self.max_order {
            params.push(format!("max_order={max}"));
        }
        if let Some(max) = self.max_ma {
            params.push(format!("max_ma={max}"));
        }
        if let Some(d) = self.fixed_differencing {
            params.push(format!("d={d}"));
        }
        if let Some(criterion) = self.criterion {
            params.push(format!("criterion={criterion:?}").to_lowercase());
        }
        if !params.is_empty() {
            write!(f, " [{}]", params.join(", "))?;
        }
        Ok(())
    }
}

/// Serializable description of a fitted model, for the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub geography: GeographyId,
    pub level: GeoLevel,
    pub model: ModelKind,
    pub order: ModelOrder,
    pub status: FitStatus,
    pub diagnostics: Vec<DiagnosticTest>,
    /// Data-handling notes, e.g. dropped regressors.
    pub notes: Vec<String>,
    #[serde(deserialize_with = "nan_if_null")]
    pub aic: f64,
    pub observations: usize,
}
