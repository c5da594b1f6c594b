use thiserror::Error;

/// Errors raised while building a model from its configuration.
///
/// Every `init` in this crate validates its configuration before any parameter
/// is allocated, so a forward pass never starts from an inconsistent topology.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unsupported scale factor {0}: expected 2 or 4")]
    UnsupportedScaleFactor(usize),

    #[error("Channel mismatch at stage {stage}: expected {expected} input channels, found {found}")]
    ChannelMismatch {
        stage: usize,
        expected: usize,
        found: usize,
    },

    #[error("Invalid dimension `{name}`: {value}")]
    InvalidDimension { name: &'static str, value: usize },

    #[error("Invalid value for `{name}`: {value}")]
    InvalidValue { name: &'static str, value: f64 },
}

pub type Result<T> = core::result::Result<T, ConfigError>;

/// Reject a zero-sized dimension.
pub(crate) fn non_zero(name: &'static str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(ConfigError::InvalidDimension { name, value });
    }
    Ok(value)
}
