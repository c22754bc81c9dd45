//! Graduated recovery from failed fits.
//!
//! A geography is first fitted with the configured search, then with up to
//! `max_retries` narrower variants. When every attempt fails the fallback
//! ladder produces its forecasts: regional average (areas only), nearest
//! peers, an injected external predictor, and finally the naïve estimate.
//! Everything the controller does is recorded in a [`RecoveryTrace`].

mod controller;
mod retry;
mod similarity;
mod strategies;

pub use controller::{
    AttemptOutcome, AttemptRecord, FitOutcome, RecoveryController, RecoveryState, RecoveryTrace,
};
pub use retry::{retry_grid, RetryVariant};
pub use similarity::{nearest, SimilarityProfile};
pub use strategies::{
    default_ladder, ladder_kinds, ExternalModelFallback, ExternalPredictor, FallbackRequest,
    FallbackStrategy, NaiveFallback, PeerForecast, RegionalAverageFallback, SimilarityFallback,
};
