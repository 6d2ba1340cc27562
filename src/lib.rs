// Library exports for testing and reuse

pub mod config;
pub mod error;
pub mod fuse;
pub mod mask;
pub mod model;
pub mod morphology;
pub mod plugin;

// Re-export commonly used types
pub use config::{qa_bits, AuxNames, GeomedianConfig, NODATA_SENTINEL};
pub use error::{GeomedianError, Result};
pub use fuse::fuse_group;
pub use mask::{decode_bitmask, decode_observation, erase_bad, keep_good, DecodedMasks};
pub use model::{
    BandData, Composite, GridSpec, Loader, Observation, RawObservation, ReduceConfig, Reducer,
    ReductionOutput, ReshapeStrategy, Task, TileStack,
};
pub use morphology::{mask_cleanup, mask_cleanup_stack};
pub use plugin::GeomedianBitmask;
