//! Retry-then-fallback state machine.

use crate::config::{PipelineConfig, RetryConfig};
use crate::core::{FallbackKind, FitOptions, Forecast, GeoLevel, GeographyId};
use crate::error::{ErrorCategory, ForecastError, Result};
use crate::recovery::retry::retry_grid;
use crate::recovery::strategies::{
    default_ladder, ExternalPredictor, FallbackRequest, FallbackStrategy, NaiveFallback,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// States of the recovery state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum RecoveryState {
    /// Trying a fit attempt or a fallback strategy.
    Attempting { strategy: String },
    /// The named attempt or strategy produced a result.
    Succeeded { strategy: String },
    /// Every fit attempt failed.
    Exhausted,
    /// The geography was excluded before fitting.
    Skipped,
}

/// Result of one attempt or strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed { category: ErrorCategory, error: String },
    Skipped { error: String },
}

impl AttemptOutcome {
    fn from_error(err: &ForecastError) -> Self {
        AttemptOutcome::Failed {
            category: err.category(),
            error: err.to_string(),
        }
    }
}

/// One entry of a geography's retry history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Attempt label or fallback kind.
    pub strategy: String,
    /// Parameters tried, rendered for the report.
    pub parameters: String,
    /// Scenario, for fallback attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    pub outcome: AttemptOutcome,
}

/// Everything the controller did for one geography.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryTrace {
    pub geography: GeographyId,
    pub level: GeoLevel,
    pub attempts: Vec<AttemptRecord>,
    pub transitions: Vec<RecoveryState>,
    /// Fallback kinds that produced forecasts, one per scenario in order.
    pub fallbacks: Vec<FallbackKind>,
}

impl RecoveryTrace {
    pub fn new(geography: GeographyId, level: GeoLevel) -> Self {
        Self {
            geography,
            level,
            attempts: Vec::new(),
            transitions: Vec::new(),
            fallbacks: Vec::new(),
        }
    }

    fn enter(&mut self, state: RecoveryState) {
        debug!(geography = %self.geography, ?state, "recovery transition");
        self.transitions.push(state);
    }

    fn record(&mut self, strategy: &str, parameters: String, scenario: Option<&str>, outcome: AttemptOutcome) {
        self.attempts.push(AttemptRecord {
            strategy: strategy.to_string(),
            parameters,
            scenario: scenario.map(str::to_string),
            outcome,
        });
    }

    /// Record a fitted model that could not forecast `scenario`; the
    /// scenario then goes to the fallback ladder.
    pub fn record_forecast_failure(&mut self, scenario: &str, horizon: usize, err: &ForecastError) {
        warn!(geography = %self.geography, scenario, error = %err, "model forecast failed");
        self.record("forecast", format!("horizon={horizon}"), Some(scenario), AttemptOutcome::from_error(err));
    }

    pub fn final_state(&self) -> Option<&RecoveryState> {
        self.transitions.last()
    }

    /// Fit attempts made after the primary one.
    pub fn retries(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.scenario.is_none())
            .count()
            .saturating_sub(1)
    }

    pub fn exhausted(&self) -> bool {
        self.transitions.contains(&RecoveryState::Exhausted)
    }

    pub fn skipped(&self) -> bool {
        self.transitions.contains(&RecoveryState::Skipped)
    }

    /// The attempt label that fitted, if any.
    pub fn fitted_with(&self) -> Option<&str> {
        if self.exhausted() {
            return None;
        }
        self.transitions.iter().find_map(|s| match s {
            RecoveryState::Succeeded { strategy } => Some(strategy.as_str()),
            _ => None,
        })
    }
}

/// What fitting with retries produced.
#[derive(Debug)]
pub enum FitOutcome<M> {
    /// A model fitted on the named attempt.
    Fitted { model: M, attempt: FitOptions },
    /// The geography is excluded; no forecast will be produced.
    Skipped(ForecastError),
    /// Every attempt failed; forecasts must come from the fallback ladder.
    Failed(ForecastError),
}

impl<M> FitOutcome<M> {
    pub fn model(&self) -> Option<&M> {
        match self {
            FitOutcome::Fitted { model, .. } => Some(model),
            _ => None,
        }
    }

    pub fn into_model(self) -> Option<M> {
        match self {
            FitOutcome::Fitted { model, .. } => Some(model),
            _ => None,
        }
    }
}

/// Runs the retry grid and, when it is exhausted, the fallback ladder.
///
/// The controller holds no per-geography state and can be shared across
/// threads.
pub struct RecoveryController {
    retry: RetryConfig,
    ladder: Vec<Box<dyn FallbackStrategy>>,
}

impl RecoveryController {
    pub fn new(retry: RetryConfig, ladder: Vec<Box<dyn FallbackStrategy>>) -> Self {
        Self { retry, ladder }
    }

    /// The default ladder for a run, with an optional external predictor.
    pub fn from_config(config: &PipelineConfig, external: Option<Arc<dyn ExternalPredictor>>) -> Self {
        Self::new(
            config.retry.clone(),
            default_ladder(config.similarity.clone(), external),
        )
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Fit with the primary options, then each retry variant in turn,
    /// accepting the first attempt that succeeds.
    ///
    /// Data insufficiency skips the geography at once; errors that are not
    /// estimation problems end the retries early. Each retry's options
    /// depend on the error that triggered it (see [`RetryVariant::after`]).
    ///
    /// [`RetryVariant::after`]: crate::recovery::RetryVariant::after
    pub fn fit_with_retries<M, F>(
        &self,
        geography: &GeographyId,
        level: GeoLevel,
        mut fit: F,
    ) -> (FitOutcome<M>, RecoveryTrace)
    where
        F: FnMut(&FitOptions) -> Result<M>,
    {
        let mut trace = RecoveryTrace::new(geography.clone(), level);
        let mut last_error: Option<ForecastError> = None;
        let mut grid = retry_grid(&self.retry, level).into_iter();
        let mut next = Some(FitOptions::primary());

        while let Some(options) = next.take() {
            trace.enter(RecoveryState::Attempting {
                strategy: options.label.clone(),
            });
            match fit(&options) {
                Ok(model) => {
                    trace.record(&options.label, options.to_string(), None, AttemptOutcome::Succeeded);
                    trace.enter(RecoveryState::Succeeded {
                        strategy: options.label.clone(),
                    });
                    return (FitOutcome::Fitted { model, attempt: options }, trace);
                }
                Err(err) if err.category() == ErrorCategory::DataInsufficiency => {
                    warn!(geography = %geography, error = %err, "skipping geography");
                    trace.record(
                        &options.label,
                        options.to_string(),
                        None,
                        AttemptOutcome::Skipped {
                            error: err.to_string(),
                        },
                    );
                    trace.enter(RecoveryState::Skipped);
                    return (FitOutcome::Skipped(err), trace);
                }
                Err(err) => {
                    warn!(geography = %geography, attempt = %options, error = %err, "fit attempt failed");
                    trace.record(&options.label, options.to_string(), None, AttemptOutcome::from_error(&err));
                    if err.is_retryable() {
                        next = grid.by_ref().find_map(|variant| {
                            let options = variant.after(level, &err);
                            if options.is_none() {
                                debug!(geography = %geography, %variant, error = %err, "retry variant does not apply");
                            }
                            options
                        });
                    }
                    last_error = Some(err);
                }
            }
        }

        trace.enter(RecoveryState::Exhausted);
        let err = last_error.unwrap_or_else(|| {
            ForecastError::ComputationError("no fit attempts configured".to_string())
        });
        (FitOutcome::Failed(err), trace)
    }

    /// Walk the fallback ladder for one scenario. Always returns a forecast:
    /// when every strategy declines, the naïve estimate is used.
    pub fn run_fallbacks(&self, request: &FallbackRequest<'_>, trace: &mut RecoveryTrace) -> Forecast {
        let level = request.panel.level();
        for strategy in self.ladder.iter().filter(|s| s.applies_to(level)) {
            let kind = strategy.kind();
            trace.enter(RecoveryState::Attempting {
                strategy: kind.as_str().to_string(),
            });
            match strategy.estimate(request) {
                Ok(forecast) => {
                    warn!(
                        geography = %request.panel.geography(),
                        scenario = request.scenario,
                        fallback = kind.as_str(),
                        "forecast produced by fallback"
                    );
                    self.finish_fallback(trace, request, kind, AttemptOutcome::Succeeded);
                    return forecast;
                }
                Err(err) => {
                    debug!(fallback = kind.as_str(), error = %err, "fallback declined");
                    trace.record(
                        kind.as_str(),
                        format!("horizon={}", request.horizon),
                        Some(request.scenario),
                        AttemptOutcome::from_error(&err),
                    );
                }
            }
        }

        warn!(geography = %request.panel.geography(), "fallback ladder declined, using naive estimate");
        trace.enter(RecoveryState::Attempting {
            strategy: FallbackKind::Naive.as_str().to_string(),
        });
        let forecast = NaiveFallback::forecast(request);
        self.finish_fallback(trace, request, FallbackKind::Naive, AttemptOutcome::Succeeded);
        forecast
    }

    fn finish_fallback(
        &self,
        trace: &mut RecoveryTrace,
        request: &FallbackRequest<'_>,
        kind: FallbackKind,
        outcome: AttemptOutcome,
    ) {
        trace.record(
            kind.as_str(),
            format!("horizon={}", request.horizon),
            Some(request.scenario),
            outcome,
        );
        trace.enter(RecoveryState::Succeeded {
            strategy: kind.as_str().to_string(),
        });
        trace.fallbacks.push(kind);
    }
}

impl std::fmt::Debug for RecoveryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryController")
            .field("retry", &self.retry)
            .field("ladder", &self.ladder.iter().map(|s| s.kind()).collect::<Vec<_>>())
            .finish()
    }
}
