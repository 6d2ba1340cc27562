use std::collections::BTreeMap;

use log::{debug, info};
use ndarray::Array2;
use rayon::prelude::*;

use crate::config::GeomedianConfig;
use crate::error::{GeomedianError, Result};
use crate::fuse::fuse_group;
use crate::mask::{decode_observation, erase_bad};
use crate::model::{
    BandData, Composite, Loader, ReduceConfig, Reducer, ReductionOutput, ReshapeStrategy, Task,
    TileStack,
};
use crate::morphology::mask_cleanup_stack;

/// QA-bitmask geomedian plugin: decodes quality flags while loading,
/// fuses same-day acquisitions, erases cloud pixels, runs the injected
/// geometric-median reduction and quantizes the result for storage.
pub struct GeomedianBitmask<L, R> {
    cfg: GeomedianConfig,
    loader: L,
    reducer: R,
}

impl<L: Loader, R: Reducer> GeomedianBitmask<L, R> {
    pub const NAME: &'static str = "gm-ls-bitmask";
    pub const VERSION: &'static str = "0.1.0";

    /// Build a configured pipeline instance. The configuration is
    /// validated here, before any task is accepted.
    pub fn new(cfg: GeomedianConfig, loader: L, reducer: R) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { cfg, loader, reducer })
    }

    pub fn config(&self) -> &GeomedianConfig {
        &self.cfg
    }

    /// Output bands this plugin advertises: spectral composites plus the
    /// auxiliary statistics under their advertised names.
    pub fn measurements(&self) -> Vec<String> {
        let mut out = self.cfg.bands.clone();
        out.extend(self.cfg.aux_names.advertised());
        out
    }

    /// Load and clean the input stack for one task: the loader fetches
    /// spectral bands plus the quality-flag band, decodes flags per
    /// acquisition in native projection, and fuses each solar-day group
    /// into one time slice.
    pub fn input_data(&self, task: &Task) -> Result<TileStack> {
        info!(
            "Loading {} datasets onto {}x{} grid",
            task.datasets.len(),
            task.grid.height,
            task.grid.width
        );

        let mut load_bands = self.cfg.bands.clone();
        load_bands.push(self.cfg.mask_band.clone());

        let mask_band = self.cfg.mask_band.clone();
        let cloud_bits = self.cfg.cloud_bits;
        let nodata_bits = self.cfg.nodata_bits;
        let native_transform =
            move |raw| decode_observation(raw, &mask_band, cloud_bits, nodata_bits);

        self.loader.load(
            task,
            &load_bands,
            &native_transform,
            &fuse_group,
            &self.cfg.resampling,
        )
    }

    /// Reduce a fused stack to the final composite: clean the cloud mask,
    /// erase flagged pixels, run the reduction, rename auxiliaries and
    /// rescale into the integer storage domain.
    pub fn reduce(&self, mut stack: TileStack) -> Result<Composite> {
        let (t, h, w) = stack.dim();
        info!("Reducing stack of {} time slices ({}x{})", t, h, w);

        let cloud_mask = mask_cleanup_stack(&stack.cloud_mask, self.cfg.filter);
        erase_bad(&mut stack.bands, &cloud_mask)?;

        let reduce_cfg = ReduceConfig {
            maxiters: self.cfg.maxiters,
            num_threads: self.cfg.num_threads,
            scale: self.cfg.scale,
            offset: self.cfg.offset,
            sr_scale: self.cfg.sr_scale,
            reshape_strategy: ReshapeStrategy::Mem,
            out_chunks: (-1, -1, -1),
            work_chunks: self.cfg.work_chunks,
            compute_count: true,
            compute_mads: true,
        };

        // The cloud mask must not reach the reduction
        let gm = self.reducer.reduce(&stack.bands, &reduce_cfg)?;
        self.check_output_shapes(&gm, (h, w))?;

        self.rescale(gm)
    }

    fn check_output_shapes(&self, gm: &ReductionOutput, dim: (usize, usize)) -> Result<()> {
        let check = |name: &str, actual: (usize, usize)| -> Result<()> {
            if actual != dim {
                return Err(GeomedianError::ShapeMismatch {
                    band: name.to_string(),
                    expected: vec![dim.0, dim.1],
                    actual: vec![actual.0, actual.1],
                });
            }
            Ok(())
        };
        for (name, band) in &gm.bands {
            check(name, band.dim())?;
        }
        check("sdev", gm.sdev.dim())?;
        check("edev", gm.edev.dim())?;
        check("bcdev", gm.bcdev.dim())?;
        check("count", gm.count.dim())
    }

    /// Rename auxiliaries to their advertised names and quantize: every
    /// spectral band goes back from reflectance into u16 storage units,
    /// the temporal deviation is scaled without offset, the remaining
    /// auxiliaries pass through untouched.
    fn rescale(&self, gm: ReductionOutput) -> Result<Composite> {
        let scale = self.cfg.scale * self.cfg.sr_scale;
        let offset = self.cfg.offset * self.cfg.sr_scale;

        debug!("Rescaling with scale={}, offset={}", scale, offset);

        let spectral: Vec<(String, BandData)> = gm
            .bands
            .par_iter()
            .map(|(name, band)| {
                let q = quantize_u16(name, band, scale, offset)?;
                Ok((name.clone(), BandData::U16(q)))
            })
            .collect::<Result<_>>()?;

        let names = &self.cfg.aux_names;
        let mut composite = Composite::default();
        composite.bands.extend(spectral);
        composite.bands.insert(
            names.edev.clone(),
            BandData::U16(quantize_u16(&names.edev, &gm.edev, scale, 0.0)?),
        );
        composite
            .bands
            .insert(names.sdev.clone(), BandData::F32(gm.sdev));
        composite
            .bands
            .insert(names.bcdev.clone(), BandData::F32(gm.bcdev));
        composite
            .bands
            .insert(names.count.clone(), BandData::U16(gm.count));

        Ok(composite)
    }
}

/// Affine-rescale a band and cast to u16. A non-finite input or a
/// rounded value outside the u16 range aborts the tile; values are never
/// clamped or wrapped, since silent wrap would corrupt downstream
/// reflectance.
fn quantize_u16(name: &str, band: &Array2<f32>, scale: f64, offset: f64) -> Result<Array2<u16>> {
    let mut out = Array2::zeros(band.dim());
    for (o, &v) in out.iter_mut().zip(band.iter()) {
        let v = f64::from(v);
        if !v.is_finite() {
            return Err(GeomedianError::NonFinite {
                band: name.to_string(),
            });
        }
        let scaled = (scale * v + offset).round();
        if scaled < 0.0 || scaled > f64::from(u16::MAX) {
            return Err(GeomedianError::NumericOverflow {
                band: name.to_string(),
                value: scaled,
            });
        }
        *o = scaled as u16;
    }
    Ok(out)
}
