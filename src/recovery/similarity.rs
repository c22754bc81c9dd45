//! Geography similarity over price level, volume and amenities.

use crate::config::SimilarityConfig;
use crate::core::{GeographyId, TimeSeriesPanel};
use crate::utils::stats::{mean, std_dev};
use std::collections::{BTreeMap, BTreeSet};

/// Months averaged for the price and volume levels.
pub const PROFILE_WINDOW: usize = 12;

/// What a geography looks like for nearest-neighbour purposes.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityProfile {
    pub geography: GeographyId,
    pub price_level: f64,
    pub volume_level: f64,
    pub amenities: BTreeMap<String, f64>,
}

impl SimilarityProfile {
    /// Recent averages of price and volume plus the latest feature values.
    pub fn from_panel(panel: &TimeSeriesPanel) -> Self {
        let tail = |values: &[f64]| -> f64 {
            let start = values.len().saturating_sub(PROFILE_WINDOW);
            let m = mean(&values[start..]);
            if m.is_finite() {
                m
            } else {
                0.0
            }
        };
        Self {
            geography: panel.geography().clone(),
            price_level: tail(panel.price_per_area()),
            volume_level: tail(panel.volume()),
            amenities: panel.feature_profile(),
        }
    }
}

/// Mean and spread of one profile dimension over the comparison set.
fn standardizer(values: &[f64]) -> (f64, f64) {
    let sd = std_dev(values);
    let sd = if sd.is_finite() && sd > 1e-12 { sd } else { 1.0 };
    (mean(values), sd)
}

/// The `k` candidates closest to `target`, nearest first, as
/// `(candidate index, distance)`.
///
/// Each dimension is z-scored over target and candidates together. The
/// distance is `sqrt(w_p z_p² + w_v z_v² + w_a · mean z_a²)` where the
/// amenity term averages over the union of feature names; a feature a
/// geography lacks sits at the mean. Ties break on geography id.
pub fn nearest(
    target: &SimilarityProfile,
    candidates: &[SimilarityProfile],
    config: &SimilarityConfig,
) -> Vec<(usize, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let everyone: Vec<&SimilarityProfile> = std::iter::once(target).chain(candidates).collect();

    let prices: Vec<f64> = everyone.iter().map(|p| p.price_level).collect();
    let volumes: Vec<f64> = everyone.iter().map(|p| p.volume_level).collect();
    let price_scale = standardizer(&prices);
    let volume_scale = standardizer(&volumes);

    let names: BTreeSet<&String> = everyone.iter().flat_map(|p| p.amenities.keys()).collect();
    let amenity_scales: BTreeMap<&String, (f64, f64)> = names
        .iter()
        .map(|name| {
            let values: Vec<f64> = everyone
                .iter()
                .filter_map(|p| p.amenities.get(*name).copied())
                .collect();
            (*name, standardizer(&values))
        })
        .collect();

    let z = |value: f64, (m, sd): (f64, f64)| (value - m) / sd;
    let amenity_z = |profile: &SimilarityProfile, name: &String| -> f64 {
        let scale = amenity_scales[name];
        profile.amenities.get(name).map_or(0.0, |v| z(*v, scale))
    };

    let mut scored: Vec<(usize, f64)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let dp = z(c.price_level, price_scale) - z(target.price_level, price_scale);
            let dv = z(c.volume_level, volume_scale) - z(target.volume_level, volume_scale);
            let da = if names.is_empty() {
                0.0
            } else {
                names
                    .iter()
                    .map(|name| (amenity_z(c, name) - amenity_z(target, name)).powi(2))
                    .sum::<f64>()
                    / names.len() as f64
            };
            let d2 = config.price_weight * dp * dp
                + config.volume_weight * dv * dv
                + config.amenity_weight * da;
            (i, d2.max(0.0).sqrt())
        })
        .collect();

    scored.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| candidates[a.0].geography.cmp(&candidates[b.0].geography))
    });
    scored.truncate(config.k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str, price: f64, volume: f64, mrt: f64) -> SimilarityProfile {
        SimilarityProfile {
            geography: GeographyId::new(id),
            price_level: price,
            volume_level: volume,
            amenities: [("mrt_score".to_string(), mrt)].into_iter().collect(),
        }
    }

    #[test]
    fn closest_profiles_come_first() {
        let target = profile("target", 6000.0, 40.0, 0.8);
        let candidates = vec![
            profile("far", 12000.0, 5.0, 0.1),
            profile("near", 6100.0, 42.0, 0.8),
            profile("mid", 7000.0, 30.0, 0.6),
            profile("other", 9000.0, 20.0, 0.3),
        ];
        let hits = nearest(&target, &candidates, &SimilarityConfig::default());
        let ids: Vec<&str> = hits.iter().map(|(i, _)| candidates[*i].geography.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "other"]);
        assert!(hits[0].1 < hits[1].1);
    }

    #[test]
    fn weights_change_the_ranking() {
        let target = profile("t", 6000.0, 40.0, 0.5);
        let candidates = vec![profile("same-price", 6000.0, 10.0, 0.5), profile("same-volume", 9000.0, 40.0, 0.5)];
        let price_only = SimilarityConfig {
            k: 1,
            price_weight: 1.0,
            volume_weight: 0.0,
            amenity_weight: 0.0,
        };
        let volume_only = SimilarityConfig {
            k: 1,
            price_weight: 0.0,
            volume_weight: 1.0,
            amenity_weight: 0.0,
        };
        assert_eq!(nearest(&target, &candidates, &price_only)[0].0, 0);
        assert_eq!(nearest(&target, &candidates, &volume_only)[0].0, 1);
    }

    #[test]
    fn empty_candidates_and_missing_features() {
        let target = profile("t", 1.0, 1.0, 0.5);
        assert!(nearest(&target, &[], &SimilarityConfig::default()).is_empty());

        let mut bare = profile("bare", 1.0, 1.0, 0.0);
        bare.amenities.clear();
        let hits = nearest(&target, &[bare], &SimilarityConfig::default());
        assert_eq!(hits.len(), 1);
        assert!(hits[0].1.is_finite());
    }
}
