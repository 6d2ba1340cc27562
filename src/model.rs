use std::collections::BTreeMap;

use ndarray::{Array2, Array3, Axis};

use crate::error::{GeomedianError, Result};

/// Target grid for one tile, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSpec {
    pub height: usize,
    pub width: usize,
}

/// One unit of work handed to the plugin by the host runtime: the source
/// observations to composite and the grid to composite them onto.
#[derive(Debug, Clone)]
pub struct Task {
    pub datasets: Vec<String>,
    pub grid: GridSpec,
}

/// Raw per-acquisition pixels as materialized by the loader: spectral
/// bands plus the packed quality-flag band, all same shape.
pub type RawObservation = BTreeMap<String, Array2<u16>>;

/// A decoded acquisition: spectral bands with no-data pixels already set
/// to the sentinel, plus the derived cloud mask. The quality-flag band
/// does not survive decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub bands: BTreeMap<String, Array2<u16>>,
    pub cloud_mask: Array2<bool>,
}

impl Observation {
    pub fn shape(&self) -> (usize, usize) {
        self.cloud_mask.dim()
    }

    /// All bands must share the cloud mask's shape.
    pub fn ensure_consistent(&self) -> Result<()> {
        let (h, w) = self.shape();
        for (name, band) in &self.bands {
            if band.dim() != (h, w) {
                return Err(GeomedianError::ShapeMismatch {
                    band: name.clone(),
                    expected: vec![h, w],
                    actual: vec![band.dim().0, band.dim().1],
                });
            }
        }
        Ok(())
    }
}

/// Fused multi-temporal stack for one tile: per band a (time, y, x) cube
/// plus the cloud mask cube. One time slice per solar day.
#[derive(Debug, Clone)]
pub struct TileStack {
    pub bands: BTreeMap<String, Array3<u16>>,
    pub cloud_mask: Array3<bool>,
}

impl TileStack {
    /// Stack fused per-day observations along the time axis.
    pub fn from_observations(observations: &[Observation]) -> Result<Self> {
        let first = observations.first().ok_or(GeomedianError::EmptyGroup)?;
        let (h, w) = first.shape();
        let t = observations.len();

        for obs in observations {
            obs.ensure_consistent()?;
            if obs.shape() != (h, w) {
                return Err(GeomedianError::ShapeMismatch {
                    band: "cloud_mask".to_string(),
                    expected: vec![h, w],
                    actual: vec![obs.shape().0, obs.shape().1],
                });
            }
        }

        let mut bands = BTreeMap::new();
        for name in first.bands.keys() {
            let mut cube = Array3::from_elem((t, h, w), 0u16);
            for (i, obs) in observations.iter().enumerate() {
                let band = obs
                    .bands
                    .get(name)
                    .ok_or_else(|| GeomedianError::MissingBand(name.clone()))?;
                cube.index_axis_mut(Axis(0), i).assign(band);
            }
            bands.insert(name.clone(), cube);
        }

        let mut cloud_mask = Array3::from_elem((t, h, w), false);
        for (i, obs) in observations.iter().enumerate() {
            cloud_mask.index_axis_mut(Axis(0), i).assign(&obs.cloud_mask);
        }

        Ok(Self { bands, cloud_mask })
    }

    /// (time, y, x) dimensions shared by every band.
    pub fn dim(&self) -> (usize, usize, usize) {
        self.cloud_mask.dim()
    }
}

/// Memory layout strategy hint for the reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReshapeStrategy {
    /// Materialize the whole stack in memory before reducing.
    #[default]
    Mem,
    /// Transpose to (y, x, band, time) working layout.
    Yxbt,
}

/// Fixed configuration passed to the external reduction function.
#[derive(Debug, Clone)]
pub struct ReduceConfig {
    pub maxiters: usize,
    pub num_threads: usize,
    pub scale: f64,
    pub offset: f64,
    pub sr_scale: f64,
    pub reshape_strategy: ReshapeStrategy,
    pub out_chunks: (isize, isize, isize),
    pub work_chunks: (usize, usize),
    pub compute_count: bool,
    pub compute_mads: bool,
}

/// Output of the external reduction function: per-band geomedian, still
/// in the digital-number domain, plus auxiliary statistics under their
/// fixed generic names.
#[derive(Debug, Clone)]
pub struct ReductionOutput {
    pub bands: BTreeMap<String, Array2<f32>>,
    /// Spectral median absolute deviation.
    pub sdev: Array2<f32>,
    /// Temporal (Euclidean) median absolute deviation.
    pub edev: Array2<f32>,
    /// Bray-Curtis median absolute deviation.
    pub bcdev: Array2<f32>,
    /// Valid observations contributing at each pixel.
    pub count: Array2<u16>,
}

/// One output band of the final composite.
#[derive(Debug, Clone, PartialEq)]
pub enum BandData {
    U16(Array2<u16>),
    F32(Array2<f32>),
}

/// Final per-pixel composite dataset, keyed by advertised band name.
#[derive(Debug, Clone, Default)]
pub struct Composite {
    pub bands: BTreeMap<String, BandData>,
}

impl Composite {
    pub fn band(&self, name: &str) -> Option<&BandData> {
        self.bands.get(name)
    }
}

/// Chunked-array loading/reprojection layer, injected so the core can be
/// exercised with deterministic fakes. `native_transform` decodes the
/// quality flags per acquisition before regridding; `fuser` collapses one
/// solar-day group into a single observation. The loader must supply a
/// stable acquisition order within each group and must not reorder it.
pub trait Loader {
    fn load(
        &self,
        task: &Task,
        bands: &[String],
        native_transform: &dyn Fn(RawObservation) -> Result<Observation>,
        fuser: &dyn Fn(&[Observation]) -> Result<Observation>,
        resampling: &str,
    ) -> Result<TileStack>;
}

/// Geometric-median reduction, injected. Receives the cleaned stack
/// (cloud pixels already erased to the sentinel, no mask bands) and the
/// fixed numeric configuration. Convergence failures surface as
/// `GeomedianError::Reduction` and are propagated unmodified.
pub trait Reducer {
    fn reduce(
        &self,
        bands: &BTreeMap<String, Array3<u16>>,
        cfg: &ReduceConfig,
    ) -> Result<ReductionOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn obs(value: u16, cloud: bool) -> Observation {
        let mut bands = BTreeMap::new();
        bands.insert("red".to_string(), arr2(&[[value, value], [value, value]]));
        Observation {
            bands,
            cloud_mask: Array2::from_elem((2, 2), cloud),
        }
    }

    #[test]
    fn test_stack_from_observations() {
        let stack = TileStack::from_observations(&[obs(7, false), obs(9, true)]).unwrap();
        assert_eq!(stack.dim(), (2, 2, 2));
        let red = &stack.bands["red"];
        assert_eq!(red[[0, 0, 0]], 7);
        assert_eq!(red[[1, 1, 1]], 9);
        assert!(!stack.cloud_mask[[0, 0, 0]]);
        assert!(stack.cloud_mask[[1, 0, 1]]);
    }

    #[test]
    fn test_stack_rejects_empty() {
        assert!(matches!(
            TileStack::from_observations(&[]),
            Err(GeomedianError::EmptyGroup)
        ));
    }

    #[test]
    fn test_stack_rejects_shape_mismatch() {
        let mut small = obs(1, false);
        small
            .bands
            .insert("red".to_string(), arr2(&[[1u16, 2, 3], [4, 5, 6]]));
        assert!(matches!(
            TileStack::from_observations(&[small]),
            Err(GeomedianError::ShapeMismatch { .. })
        ));
    }
}
