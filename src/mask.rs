use std::collections::BTreeMap;

use log::debug;
use ndarray::{Array2, Array3, Zip};
use rayon::prelude::*;

use crate::config::NODATA_SENTINEL;
use crate::error::{GeomedianError, Result};
use crate::model::{Observation, RawObservation};

/// The two boolean masks derived from one quality-flag band.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMasks {
    /// True where the pixel is cloud/shadow/dilated-cloud affected.
    pub cloud: Array2<bool>,
    /// True where the pixel carries usable sensor data.
    pub valid: Array2<bool>,
}

/// Decode a packed quality-flag band into cloud and validity masks.
pub fn decode_bitmask(qa: &Array2<u16>, cloud_bits: u16, nodata_bits: u16) -> DecodedMasks {
    let cloud = qa.mapv(|v| v & cloud_bits != 0);
    let valid = qa.mapv(|v| v & nodata_bits == 0);
    DecodedMasks { cloud, valid }
}

/// Set the sentinel wherever the pixel is not valid, in place.
pub fn keep_good(band: &mut Array2<u16>, valid: &Array2<bool>) {
    Zip::from(band).and(valid).for_each(|v, &ok| {
        if !ok {
            *v = NODATA_SENTINEL;
        }
    });
}

/// Decode one raw acquisition: split off the quality-flag band, derive
/// the cloud mask, and erase no-data pixels from every spectral band.
pub fn decode_observation(
    mut raw: RawObservation,
    mask_band: &str,
    cloud_bits: u16,
    nodata_bits: u16,
) -> Result<Observation> {
    let qa = raw
        .remove(mask_band)
        .ok_or_else(|| GeomedianError::MissingBand(mask_band.to_string()))?;

    let masks = decode_bitmask(&qa, cloud_bits, nodata_bits);
    let (h, w) = qa.dim();

    for (name, band) in &mut raw {
        if band.dim() != (h, w) {
            return Err(GeomedianError::ShapeMismatch {
                band: name.clone(),
                expected: vec![h, w],
                actual: vec![band.dim().0, band.dim().1],
            });
        }
        keep_good(band, &masks.valid);
    }

    debug!(
        "Decoded {}: {} cloud px, {} invalid px",
        mask_band,
        masks.cloud.iter().filter(|&&c| c).count(),
        masks.valid.iter().filter(|&&v| !v).count()
    );

    Ok(Observation {
        bands: raw,
        cloud_mask: masks.cloud,
    })
}

/// Erase every band value at every pixel/time-step flagged by the cloud
/// mask. Bands are processed in parallel.
pub fn erase_bad(bands: &mut BTreeMap<String, Array3<u16>>, cloud_mask: &Array3<bool>) -> Result<()> {
    let dim = cloud_mask.dim();
    for (name, band) in bands.iter() {
        if band.dim() != dim {
            return Err(GeomedianError::ShapeMismatch {
                band: name.clone(),
                expected: vec![dim.0, dim.1, dim.2],
                actual: vec![band.dim().0, band.dim().1, band.dim().2],
            });
        }
    }

    let mut cubes: Vec<&mut Array3<u16>> = bands.values_mut().collect();
    cubes.par_iter_mut().for_each(|band| {
        Zip::from(&mut **band).and(cloud_mask).for_each(|v, &bad| {
            if bad {
                *v = NODATA_SENTINEL;
            }
        });
    });

    Ok(())
}
