use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeomedianError {
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Required band not found: {0}")]
    MissingBand(String),

    #[error("Band {band}: shape {actual:?} does not match {expected:?}")]
    ShapeMismatch {
        band: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Empty solar-day group")]
    EmptyGroup,

    #[error("Band {band}: rescaled value {value} outside u16 range")]
    NumericOverflow { band: String, value: f64 },

    #[error("Band {band}: non-finite value reached final cast")]
    NonFinite { band: String },

    #[error("Reduction failed: {0}")]
    Reduction(String),

    #[error("Load failed: {0}")]
    Load(String),
}

pub type Result<T> = std::result::Result<T, GeomedianError>;
