#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("no hardware session attached")]
    NotAttached,

    #[error("hardware call timed out")]
    Timeout,

    #[error("capability not present: {0}")]
    MissingCapability(&'static str),

    #[error("device error: {0}")]
    Device(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("geocoder error: {0}")]
    Geocoder(String),

    #[error("{0}")]
    Other(String),
}
