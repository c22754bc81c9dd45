//! Common interface of fitted regional and area models.

use crate::core::{
    DiagnosticTest, FitStatus, FitSummary, GeoLevel, GeographyId, ModelKind, ModelOrder,
};

/// A model fitted to one geography's panel.
///
/// Fitted models are immutable; a refit produces a new value.
pub trait FittedModel: Send + Sync {
    /// Geography the model was fitted to.
    fn geography(&self) -> &GeographyId;

    /// Level of the hierarchy the model belongs to.
    fn level(&self) -> GeoLevel;

    /// Model family.
    fn kind(&self) -> ModelKind;

    /// Selected lag / order.
    fn order(&self) -> ModelOrder;

    /// Fit status after diagnostics.
    fn status(&self) -> &FitStatus;

    /// All diagnostic tests run on the fit.
    fn diagnostics(&self) -> &[DiagnosticTest];

    /// Data-handling notes, e.g. dropped regressors.
    fn notes(&self) -> &[String];

    /// Residuals of the appreciation equation.
    fn residuals(&self) -> &[f64];

    /// Akaike information criterion of the selected fit.
    fn aic(&self) -> f64;

    /// Observations used in estimation.
    fn observations(&self) -> usize;

    /// Serializable description for the run report.
    fn summary(&self) -> FitSummary {
        FitSummary {
            geography: self.geography().clone(),
            level: self.level(),
            model: self.kind(),
            order: self.order(),
            status: self.status().clone(),
            diagnostics: self.diagnostics().to_vec(),
            notes: self.notes().to_vec(),
            aic: self.aic(),
            observations: self.observations(),
        }
    }
}
