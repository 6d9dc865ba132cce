use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Driver error taxonomy.
///
/// "Not found" is deliberately absent: the transport reports it as a value
/// (`RemoteResponse::NotFound`) because the daemon uses 404 both for genuine
/// absence and as an implicit "operation finished" marker, and neither is a
/// hard failure for us.
#[derive(Debug, Error)]
pub enum Error {
    // -- transport --
    #[error("{method} {url} failed: {detail}")]
    RequestFailed {
        method: String,
        url: String,
        detail: String,
    },

    #[error("remote returned status {status} for {url}: {body}")]
    RemoteFailure {
        url: String,
        status: u16,
        body: String,
    },

    // -- instance lifecycle --
    #[error("{0}")]
    InvalidOperation(String),

    /// The instance went down while a start was settling. Distinct from
    /// ordinary errors so callers can tell an aborted start from a failure.
    #[error("instance \"{name}\" shutdown during start")]
    StartAborted { name: String },

    #[error("failed to determine IP address for \"{name}\"")]
    IpTimeout { name: String },

    /// The remote no longer has a record for an instance we expected to
    /// exist (deleted out from under us).
    #[error("instance \"{name}\" no longer exists on the remote")]
    InstanceMissing { name: String },

    /// A polled operation reported a terminal error.
    #[error("operation {id} failed: {status}")]
    OperationFailed { id: String, status: String },

    // -- image fetch --
    #[error("download aborted")]
    DownloadAborted,

    #[error("remote \"{0}\" is unknown")]
    UnknownRemote(String),

    #[error("unable to find an image matching \"{0}\"")]
    NoMatchingImage(String),

    #[error("http and file based images are not supported")]
    UnsupportedImageSource,

    /// Failures bubbling out of an image-host implementation.
    #[error(transparent)]
    ImageHost(#[from] anyhow::Error),
}
