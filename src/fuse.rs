use std::collections::BTreeMap;

use log::debug;
use ndarray::{Array2, Zip};
use rayon::prelude::*;

use crate::config::NODATA_SENTINEL;
use crate::error::{GeomedianError, Result};
use crate::model::Observation;

/// Collapse one solar-day group into a single observation.
///
/// Spectral bands take the value of the first observation in group order
/// whose pixel is valid (non-sentinel); a pixel left uncovered by every
/// observation stays at the sentinel. The cloud mask is ORed across the
/// group, so a pixel is flagged if ANY contributing acquisition saw
/// cloud. The first-valid rule is order-sensitive by contract; callers
/// must hand groups over in stable acquisition order.
pub fn fuse_group(group: &[Observation]) -> Result<Observation> {
    let first = group.first().ok_or(GeomedianError::EmptyGroup)?;
    let (h, w) = first.shape();

    for obs in group {
        obs.ensure_consistent()?;
        if obs.shape() != (h, w) {
            return Err(GeomedianError::ShapeMismatch {
                band: "cloud_mask".to_string(),
                expected: vec![h, w],
                actual: vec![obs.shape().0, obs.shape().1],
            });
        }
        for name in first.bands.keys() {
            if !obs.bands.contains_key(name) {
                return Err(GeomedianError::MissingBand(name.clone()));
            }
        }
        if obs.bands.len() != first.bands.len() {
            let extra = obs
                .bands
                .keys()
                .find(|k| !first.bands.contains_key(*k))
                .cloned()
                .unwrap_or_default();
            return Err(GeomedianError::MissingBand(extra));
        }
    }

    debug!("Fusing {} same-day observations", group.len());

    let fused: Vec<(String, Array2<u16>)> = first
        .bands
        .keys()
        .collect::<Vec<_>>()
        .par_iter()
        .map(|&name| {
            let mut out = first.bands[name].clone();
            for obs in &group[1..] {
                fill_first_valid(&mut out, &obs.bands[name]);
            }
            (name.clone(), out)
        })
        .collect();

    let mut cloud_mask = first.cloud_mask.clone();
    for obs in &group[1..] {
        Zip::from(&mut cloud_mask)
            .and(&obs.cloud_mask)
            .for_each(|a, &b| *a |= b);
    }

    Ok(Observation {
        bands: BTreeMap::from_iter(fused),
        cloud_mask,
    })
}

/// Fill sentinel pixels of `out` from `next` where `next` is valid.
fn fill_first_valid(out: &mut Array2<u16>, next: &Array2<u16>) {
    Zip::from(out).and(next).for_each(|a, &b| {
        if *a == NODATA_SENTINEL {
            *a = b;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn obs(red: Array2<u16>, cloud: Array2<bool>) -> Observation {
        let mut bands = BTreeMap::new();
        bands.insert("red".to_string(), red);
        Observation { bands, cloud_mask: cloud }
    }

    #[test]
    fn test_singleton_is_identity() {
        let o = obs(
            arr2(&[[100, 0], [300, 400]]),
            arr2(&[[true, false], [false, false]]),
        );
        let fused = fuse_group(std::slice::from_ref(&o)).unwrap();
        assert_eq!(fused, o);
    }

    #[test]
    fn test_first_valid_wins() {
        let a = obs(arr2(&[[100, 0]]), arr2(&[[false, false]]));
        let b = obs(arr2(&[[900, 200]]), arr2(&[[false, false]]));
        let fused = fuse_group(&[a, b]).unwrap();
        // First observation valid at px 0, so 100 wins; px 1 falls
        // through to the second observation.
        assert_eq!(fused.bands["red"], arr2(&[[100, 200]]));
    }

    #[test]
    fn test_sentinel_when_no_valid_observation() {
        let a = obs(arr2(&[[0u16]]), arr2(&[[false]]));
        let b = obs(arr2(&[[0u16]]), arr2(&[[false]]));
        let fused = fuse_group(&[a, b]).unwrap();
        assert_eq!(fused.bands["red"][[0, 0]], NODATA_SENTINEL);
    }

    #[test]
    fn test_cloud_mask_is_or_of_group() {
        let a = obs(arr2(&[[1, 2]]), arr2(&[[true, false]]));
        let b = obs(arr2(&[[3, 4]]), arr2(&[[false, false]]));
        let c = obs(arr2(&[[5, 6]]), arr2(&[[false, true]]));
        let fused = fuse_group(&[a, b, c]).unwrap();
        assert_eq!(fused.cloud_mask, arr2(&[[true, true]]));
    }

    #[test]
    fn test_cloud_fusion_independent_of_band_validity() {
        // Pixel valid only in obs#2, cloud only in obs#1: spectral value
        // comes from obs#2 while the cloud flag still ORs to true.
        let a = obs(arr2(&[[0u16]]), arr2(&[[true]]));
        let b = obs(arr2(&[[700u16]]), arr2(&[[false]]));
        let fused = fuse_group(&[a, b]).unwrap();
        assert_eq!(fused.bands["red"][[0, 0]], 700);
        assert!(fused.cloud_mask[[0, 0]]);
    }

    #[test]
    fn test_empty_group_rejected() {
        assert!(matches!(fuse_group(&[]), Err(GeomedianError::EmptyGroup)));
    }

    #[test]
    fn test_band_set_mismatch_rejected() {
        let a = obs(arr2(&[[1u16]]), arr2(&[[false]]));
        let mut b = obs(arr2(&[[2u16]]), arr2(&[[false]]));
        b.bands.insert("green".to_string(), arr2(&[[3u16]]));
        assert!(matches!(
            fuse_group(&[a, b]),
            Err(GeomedianError::MissingBand(_))
        ));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let a = obs(arr2(&[[1u16]]), arr2(&[[false]]));
        let b = obs(arr2(&[[2u16, 3]]), arr2(&[[false, false]]));
        assert!(matches!(
            fuse_group(&[a, b]),
            Err(GeomedianError::ShapeMismatch { .. })
        ));
    }
}
