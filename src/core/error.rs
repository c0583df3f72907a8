use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Corrupt,
    NotFound,
    DuplicateTitle,
    InvalidArgument,
    InvalidState,
    Internal,
    IndexingFailure,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context }
    }

    pub fn document_not_found(id: impl fmt::Display) -> Self {
        Error::new(ErrorKind::NotFound, format!("document not found: {}", id))
    }

    pub fn title_not_found(title: &str) -> Self {
        Error::new(ErrorKind::NotFound, format!("document not found: title '{}'", title))
    }

    pub fn duplicate_title(title: &str, owner: impl fmt::Display) -> Self {
        Error::new(
            ErrorKind::DuplicateTitle,
            format!("title '{}' is already used by document {}", title, owner),
        )
    }

    pub fn corrupt(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Corrupt, context.into())
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_duplicate_title(&self) -> bool {
        self.kind == ErrorKind::DuplicateTitle
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: err.to_string(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error {
            kind: ErrorKind::Corrupt,
            context: err.to_string(),
        }
    }
}

impl From<uuid::Error> for Error {
    fn from(err: uuid::Error) -> Self {
        Error {
            kind: ErrorKind::Corrupt,
            context: format!("invalid identifier: {}", err),
        }
    }
}

impl From<chrono::ParseError> for Error {
    fn from(err: chrono::ParseError) -> Self {
        Error {
            kind: ErrorKind::Corrupt,
            context: format!("invalid timestamp: {}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
