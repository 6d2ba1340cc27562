use crate::error::{GeomedianError, Result};

/// Bit positions of the Landsat Collection 2 QA_PIXEL flag band.
///
/// Bits 0..8 are single-bit flags, bits 8..16 hold two-bit confidence
/// fields. Combine these constants to build `cloud_bits`/`nodata_bits`
/// for a different masking policy.
pub mod qa_bits {
    /// Fill pixel, no sensor data.
    pub const NODATA: u16 = 1 << 0;
    pub const DILATED_CLOUD: u16 = 1 << 1;
    pub const CIRRUS: u16 = 1 << 2;
    pub const CLOUD: u16 = 1 << 3;
    pub const CLOUD_SHADOW: u16 = 1 << 4;
    pub const SNOW: u16 = 1 << 5;
    pub const CLEAR: u16 = 1 << 6;
    pub const WATER: u16 = 1 << 7;
    pub const CLOUD_CONFIDENCE: u16 = 0b11 << 8;
    pub const CLOUD_SHADOW_CONFIDENCE: u16 = 0b11 << 10;
    pub const SNOW_ICE_CONFIDENCE: u16 = 0b11 << 12;
    pub const CIRRUS_CONFIDENCE: u16 = 0b11 << 14;
}

/// Value a spectral pixel takes when no usable observation exists.
/// Consumers test against this, never against a null/gap.
pub const NODATA_SENTINEL: u16 = 0;

/// Advertised names for the reducer's fixed auxiliary outputs
/// (`sdev`, `edev`, `bcdev`, `count`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxNames {
    pub sdev: String,
    pub edev: String,
    pub bcdev: String,
    pub count: String,
}

impl Default for AuxNames {
    fn default() -> Self {
        Self {
            sdev: "smad".to_string(),
            edev: "emad".to_string(),
            bcdev: "bcmad".to_string(),
            count: "count".to_string(),
        }
    }
}

impl AuxNames {
    pub fn advertised(&self) -> Vec<String> {
        vec![
            self.sdev.clone(),
            self.edev.clone(),
            self.bcdev.clone(),
            self.count.clone(),
        ]
    }
}

/// Full configuration surface of the plugin, validated once at
/// construction. Defaults reproduce the USGS Landsat Collection 2
/// surface-reflectance setup.
#[derive(Debug, Clone)]
pub struct GeomedianConfig {
    /// Spectral bands to composite.
    pub bands: Vec<String>,
    /// Name of the packed quality-flag band.
    pub mask_band: String,
    /// A pixel is cloud-affected when `qa & cloud_bits != 0`.
    pub cloud_bits: u16,
    /// A pixel is valid when `qa & nodata_bits == 0`.
    pub nodata_bits: u16,
    /// Morphology radii `(r_shrink, r_grow)` in pixels; `None` disables
    /// mask cleanup entirely.
    pub filter: Option<(usize, usize)>,
    pub aux_names: AuxNames,
    /// Resampling method name handed to the loader.
    pub resampling: String,
    /// Work-chunk hint for the reducer.
    pub work_chunks: (usize, usize),
    /// Digital-number to reflectance affine: `reflectance = scale * dn + offset`.
    pub scale: f64,
    pub offset: f64,
    /// Storage scale factor applied when quantizing back to integers.
    pub sr_scale: f64,
    /// Convergence iteration cap for the reducer.
    pub maxiters: usize,
    /// Thread-count hint for the reducer; 1 avoids oversubscription when
    /// tiles are already scheduled in parallel by the host runtime.
    pub num_threads: usize,
}

impl Default for GeomedianConfig {
    fn default() -> Self {
        Self {
            bands: ["red", "green", "blue", "nir", "swir1", "swir2"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            mask_band: "QA_PIXEL".to_string(),
            cloud_bits: qa_bits::DILATED_CLOUD | qa_bits::CLOUD | qa_bits::CLOUD_SHADOW,
            nodata_bits: qa_bits::NODATA,
            filter: None,
            aux_names: AuxNames::default(),
            resampling: "nearest".to_string(),
            work_chunks: (400, 400),
            scale: 0.0000275,
            offset: -0.2,
            sr_scale: 10000.0,
            maxiters: 1000,
            num_threads: 1,
        }
    }
}

impl GeomedianConfig {
    /// Check the configuration before any per-pixel work happens.
    pub fn validate(&self) -> Result<()> {
        if self.bands.is_empty() {
            return Err(GeomedianError::InvalidConfig(
                "band list is empty".to_string(),
            ));
        }
        if self.mask_band.is_empty() {
            return Err(GeomedianError::InvalidConfig(
                "mask band name is empty".to_string(),
            ));
        }
        if self.bands.iter().any(|b| *b == self.mask_band) {
            return Err(GeomedianError::InvalidConfig(format!(
                "mask band {} listed among spectral bands",
                self.mask_band
            )));
        }
        for aux in self.aux_names.advertised() {
            if self.bands.contains(&aux) {
                return Err(GeomedianError::InvalidConfig(format!(
                    "auxiliary name {} collides with a spectral band",
                    aux
                )));
            }
        }
        if self.cloud_bits == 0 {
            return Err(GeomedianError::InvalidConfig(
                "cloud_bits selects no bits".to_string(),
            ));
        }
        if self.work_chunks.0 == 0 || self.work_chunks.1 == 0 {
            return Err(GeomedianError::InvalidConfig(format!(
                "work chunks must be positive, got {:?}",
                self.work_chunks
            )));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(GeomedianError::InvalidConfig(format!(
                "scale must be finite and positive, got {}",
                self.scale
            )));
        }
        if !self.offset.is_finite() {
            return Err(GeomedianError::InvalidConfig(format!(
                "offset must be finite, got {}",
                self.offset
            )));
        }
        if !self.sr_scale.is_finite() || self.sr_scale <= 0.0 {
            return Err(GeomedianError::InvalidConfig(format!(
                "sr_scale must be finite and positive, got {}",
                self.sr_scale
            )));
        }
        if self.maxiters == 0 {
            return Err(GeomedianError::InvalidConfig(
                "maxiters must be positive".to_string(),
            ));
        }
        if self.num_threads == 0 {
            return Err(GeomedianError::InvalidConfig(
                "num_threads must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(GeomedianConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_cloud_bits() {
        // dilated_cloud + cloud + cloud_shadow
        assert_eq!(GeomedianConfig::default().cloud_bits, 0b0000_0000_0001_1010);
    }

    #[test]
    fn test_empty_bands_rejected() {
        let cfg = GeomedianConfig {
            bands: vec![],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_mask_band_among_spectral_rejected() {
        let cfg = GeomedianConfig {
            bands: vec!["red".to_string(), "QA_PIXEL".to_string()],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_aux_name_collision_rejected() {
        let cfg = GeomedianConfig {
            bands: vec!["red".to_string(), "smad".to_string()],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_cloud_bits_rejected() {
        let cfg = GeomedianConfig {
            cloud_bits: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_work_chunks_rejected() {
        let cfg = GeomedianConfig {
            work_chunks: (0, 400),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bad_scale_rejected() {
        let cfg = GeomedianConfig {
            scale: f64::NAN,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = GeomedianConfig {
            sr_scale: 0.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let cfg = GeomedianConfig {
            num_threads: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
