use thiserror::Error;
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("endpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed record: {0}")]
    Protocol(String),
    #[error("invalid session configuration: {0}")]
    Config(String),
    #[error("filter misconfigured: {0}")]
    Filter(String),
    #[error("a measurement is already in progress")]
    Busy,
    #[error("no connected endpoint")]
    NotConnected,
    #[error("measurement was stopped")]
    Cancelled,
    #[error("failed to persist measurement: {0}")]
    Persist(String),
    #[error("failed to render plot: {0}")]
    Plot(String),
}
impl From<serde_json::Error> for AcquisitionError {
    fn from(value: serde_json::Error) -> Self {
        AcquisitionError::Persist(value.to_string())
    }
}
impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for AcquisitionError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        AcquisitionError::Plot(format!("{value:?}"))
    }
}
impl From<image::ImageError> for AcquisitionError {
    fn from(value: image::ImageError) -> Self {
        AcquisitionError::Plot(value.to_string())
    }
}
