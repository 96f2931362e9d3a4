//! Error types for the transfer engine.

/// Broad classification of a [`TransferError`], used by the transport layer
/// to pick a wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Client-fixable request problem.
    Validation,
    /// Unknown/expired handle or missing file; the client must restart the
    /// transfer with a new connection.
    NotFound,
    /// A read past the last byte of the file.
    EndOfData,
    /// Anything unexpected on the server side.
    Internal,
}

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("file name is empty")]
    EmptyFilename,

    #[error("unexpected file type: {0}")]
    UnknownCategory(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid file size: {0}")]
    InvalidSize(u64),

    #[error("incorrect chunk size: {len} > {max}")]
    ChunkTooLarge { len: usize, max: u64 },

    #[error("bad file uuid")]
    BadHandle,

    #[error("unexpected file change")]
    UnexpectedFileChange,

    #[error("file not exist")]
    FileNotExist,

    #[error("end of file")]
    EndOfData,

    #[error("internal error in {op}: {source}")]
    Internal {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    /// Wraps an unexpected I/O error with the operation it came from.
    pub(crate) fn internal(op: &'static str, source: std::io::Error) -> Self {
        tracing::error!(op, error = %source, "transfer engine I/O failure");
        Self::Internal { op, source }
    }

    /// Maps an error from opening a file: a missing file is reported as
    /// [`TransferError::FileNotExist`], everything else is internal.
    pub(crate) fn from_open(op: &'static str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::FileNotExist
        } else {
            Self::internal(op, source)
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyFilename
            | Self::UnknownCategory(_)
            | Self::InvalidPath(_)
            | Self::InvalidSize(_)
            | Self::ChunkTooLarge { .. }
            | Self::BadHandle => ErrorKind::Validation,
            Self::UnexpectedFileChange | Self::FileNotExist => ErrorKind::NotFound,
            Self::EndOfData => ErrorKind::EndOfData,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Message safe to hand to a remote caller.
    ///
    /// Internal errors never carry OS error text across the boundary.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::EmptyFilename => "file name is empty",
            Self::UnknownCategory(_) => "unexpected file type",
            Self::InvalidPath(_) => "invalid path",
            Self::InvalidSize(_) => "invalid file size",
            Self::ChunkTooLarge { .. } => "incorrect chunk size",
            Self::BadHandle => "bad file uuid",
            Self::UnexpectedFileChange => "unexpected file change",
            Self::FileNotExist => "file not exist",
            Self::EndOfData => "end of file",
            Self::Internal { .. } => "internal error",
        }
    }
}
