// Licensed under the MIT License.

use std::{borrow::Cow, fmt::Display};

pub type Result<T> = ::std::result::Result<T, Error>;

/// One of the seven error families every command-level failure is classified into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing config file, invalid parameter range, or unknown enum value in the INI config.
    Configuration,

    /// File not found, open/read failure, or mmap failure while reading a dataset.
    Filesystem,

    /// Buffer-size mismatch or malformed payload while deserializing a wire message.
    Serialization,

    /// Send, receive, probe, or broadcast failure; unexpected tag order; received NACK.
    Communication,

    /// Partition id out of range, invalid cell assignment, or dataspace violation.
    Partitioning,

    /// Unknown query type, unsupported (dataType, queryType) combination, or invalid query geometry.
    Query,

    /// Allocation failure or other resource exhaustion.
    Resource,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "configuration error"),
            ErrorKind::Filesystem => write!(f, "filesystem error"),
            ErrorKind::Serialization => write!(f, "serialization error"),
            ErrorKind::Communication => write!(f, "communication error"),
            ErrorKind::Partitioning => write!(f, "partitioning error"),
            ErrorKind::Query => write!(f, "query error"),
            ErrorKind::Resource => write!(f, "resource error"),
        }
    }
}

impl ErrorKind {
    pub fn with_source(self, source: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::from(self).with_source(source)
    }

    pub fn with_message(self, message: impl Into<Cow<'static, str>>) -> Error {
        Error::from(self).with_message(message)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    message: Option<Cow<'static, str>>,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            source: None,
            message: None,
        }
    }
}

impl Error {
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn into_source(self) -> Option<Box<dyn std::error::Error + Send + Sync>> {
        self.source
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{message}"),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source = self.source.as_ref()?;
        Some(&**source)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        ErrorKind::Filesystem.with_source(err)
    }
}

impl From<ini::Error> for Error {
    fn from(err: ini::Error) -> Self {
        ErrorKind::Configuration.with_source(err)
    }
}
