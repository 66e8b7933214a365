use thiserror::Error;

/// Errors raised by a work source while fetching or submitting.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Work source rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Malformed work: {0}")]
    Malformed(String),
    #[error("Work source unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by an accelerator. All of them are fatal to the run.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("OpenCL error: {0}")]
    OpenCl(String),
    #[error("No compute devices found")]
    NoDevices,
    #[error("Device initialization failed: {0}")]
    Init(String),
    #[error("Invalid device buffer: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },
}

#[cfg(feature = "opencl")]
impl From<ocl::Error> for DeviceError {
    fn from(err: ocl::Error) -> Self {
        DeviceError::OpenCl(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum MinerError {
    #[error("Device {device_id} failed: {source}")]
    Device {
        device_id: usize,
        #[source]
        source: DeviceError,
    },
    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Error, Debug, PartialEq)]
pub enum EncodingError {
    #[error("Invalid hash length: expected {expected} hex characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("Invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}
