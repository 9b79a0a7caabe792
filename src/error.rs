//! Definitions of the crate's error and result types.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::io;

use crate::Addr;


/// A result type using our [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;


/// An enumeration of all the kinds of errors this crate reports.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An allocator symbol could not be located by any resolution
    /// strategy.
    SymbolUnresolvable,
    /// An address is not mapped or not currently readable.
    MemoryUnreadable,
    /// A structure layout disagrees with what the target's pointer
    /// width and allocator release require.
    LayoutMismatch,
    /// An entity was not found, often a file or a layout.
    NotFound,
    /// The operation lacked the necessary privileges to complete.
    PermissionDenied,
    /// A parameter was incorrect.
    InvalidInput,
    /// Data not valid for the operation were encountered.
    InvalidData,
    /// This operation is unsupported on this platform or for this
    /// allocator release.
    Unsupported,
    /// An error returned when an operation could not be completed
    /// because an "end of file" was reached prematurely.
    UnexpectedEof,
    /// A custom error that does not fall under any other kind.
    Other,
}

impl ErrorKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::SymbolUnresolvable => "symbol unresolvable",
            Self::MemoryUnreadable => "memory unreadable",
            Self::LayoutMismatch => "layout mismatch",
            Self::NotFound => "entity not found",
            Self::PermissionDenied => "permission denied",
            Self::InvalidInput => "invalid input parameter",
            Self::InvalidData => "invalid data",
            Self::Unsupported => "unsupported",
            Self::UnexpectedEof => "unexpected end of file",
            Self::Other => "other error",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl From<io::ErrorKind> for ErrorKind {
    fn from(other: io::ErrorKind) -> Self {
        match other {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::InvalidInput => Self::InvalidInput,
            io::ErrorKind::InvalidData => Self::InvalidData,
            io::ErrorKind::Unsupported => Self::Unsupported,
            io::ErrorKind::UnexpectedEof => Self::UnexpectedEof,
            _ => Self::Other,
        }
    }
}


enum ErrorImpl {
    Io(io::Error),
    Kind {
        kind: ErrorKind,
        message: Option<Cow<'static, str>>,
    },
    Symbol(Box<str>),
    Context {
        context: Cow<'static, str>,
        source: Box<ErrorImpl>,
    },
}

impl ErrorImpl {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(err) => ErrorKind::from(err.kind()),
            Self::Kind { kind, .. } => *kind,
            Self::Symbol(..) => ErrorKind::SymbolUnresolvable,
            Self::Context { source, .. } => source.kind(),
        }
    }

    fn symbol(&self) -> Option<&str> {
        match self {
            Self::Symbol(symbol) => Some(symbol),
            Self::Context { source, .. } => source.symbol(),
            Self::Io(..) | Self::Kind { .. } => None,
        }
    }
}

impl Debug for ErrorImpl {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Io(err) => f.debug_tuple("Io").field(err).finish(),
            Self::Kind { kind, message } => f
                .debug_struct("Kind")
                .field("kind", kind)
                .field("message", message)
                .finish(),
            Self::Symbol(symbol) => f.debug_tuple("Symbol").field(symbol).finish(),
            Self::Context { context, source } => f
                .debug_struct("Context")
                .field("context", context)
                .field("source", source)
                .finish(),
        }
    }
}

impl Display for ErrorImpl {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Io(err) => Display::fmt(err, f),
            Self::Kind {
                message: Some(message),
                ..
            } => f.write_str(message),
            Self::Kind {
                kind,
                message: None,
            } => Display::fmt(kind, f),
            Self::Symbol(symbol) => write!(f, "failed to resolve symbol `{symbol}`"),
            Self::Context { context, source } => {
                if f.alternate() {
                    write!(f, "{context}: {source:#}")
                } else {
                    f.write_str(context)
                }
            }
        }
    }
}

impl StdError for ErrorImpl {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io(err) => err.source(),
            Self::Context { source, .. } => Some(source.as_ref()),
            Self::Kind { .. } | Self::Symbol(..) => None,
        }
    }
}


/// The error type used by the library.
///
/// Errors carry a chain of human readable context, accessible through
/// the alternate [`Display`] representation (`{:#}`) or the
/// [`source`][StdError::source] chain, and an [`ErrorKind`] describing
/// the root cause.
pub struct Error {
    error: Box<ErrorImpl>,
}

impl Error {
    fn new(error: ErrorImpl) -> Self {
        Self {
            error: Box::new(error),
        }
    }

    pub(crate) fn with_kind<M>(kind: ErrorKind, message: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        Self::new(ErrorImpl::Kind {
            kind,
            message: Some(message.into()),
        })
    }

    /// Create an error signaling that `symbol` could not be resolved.
    pub fn symbol_unresolvable<S>(symbol: S) -> Self
    where
        S: Into<Box<str>>,
    {
        Self::new(ErrorImpl::Symbol(symbol.into()))
    }

    /// Create an error signaling that `len` bytes at `addr` could not be
    /// read.
    pub fn memory_unreadable(addr: Addr, len: usize) -> Self {
        Self::with_kind(
            ErrorKind::MemoryUnreadable,
            format!("cannot access {len} bytes of memory at {addr:#x}"),
        )
    }

    /// Create an error signaling a structure layout mismatch.
    pub fn layout_mismatch<M>(message: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        Self::with_kind(ErrorKind::LayoutMismatch, message)
    }

    /// Create an [`ErrorKind::NotFound`] error.
    pub fn with_not_found<M>(message: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        Self::with_kind(ErrorKind::NotFound, message)
    }

    /// Create an [`ErrorKind::InvalidData`] error.
    pub fn with_invalid_data<M>(message: M) -> Self
    where
        M: ToString,
    {
        Self::with_kind(ErrorKind::InvalidData, message.to_string())
    }

    /// Create an [`ErrorKind::InvalidInput`] error.
    pub fn with_invalid_input<M>(message: M) -> Self
    where
        M: ToString,
    {
        Self::with_kind(ErrorKind::InvalidInput, message.to_string())
    }

    /// Create an [`ErrorKind::Unsupported`] error.
    pub fn with_unsupported<M>(message: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        Self::with_kind(ErrorKind::Unsupported, message)
    }

    /// Retrieve the kind of the root cause of this error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Retrieve the name of the symbol that could not be resolved, if
    /// this is an [`ErrorKind::SymbolUnresolvable`] error.
    #[inline]
    pub fn symbol(&self) -> Option<&str> {
        self.error.symbol()
    }

    fn layer_context(self, context: Cow<'static, str>) -> Self {
        Self::new(ErrorImpl::Context {
            context,
            source: self.error,
        })
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if f.alternate() {
            Debug::fmt(&self.error, f)
        } else {
            write!(f, "Error({:?}, \"{:#}\")", self.kind(), self.error)
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.error, f)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.error.source()
    }
}

impl From<io::Error> for Error {
    fn from(other: io::Error) -> Self {
        Self::new(ErrorImpl::Io(other))
    }
}


/// A trait providing ergonomic chaining capabilities to [`Error`].
pub trait ErrorExt: private::Sealed {
    /// The output type produced by [`context`](Self::context) and
    /// [`with_context`](Self::with_context).
    type Output;

    /// Add context to this error.
    fn context<C>(self, context: C) -> Self::Output
    where
        C: Into<Cow<'static, str>>;

    /// Add context to this error, using a closure for lazy evaluation.
    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
        F: FnOnce() -> C;
}

impl ErrorExt for Error {
    type Output = Error;

    fn context<C>(self, context: C) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
    {
        self.layer_context(context.into())
    }

    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
        F: FnOnce() -> C,
    {
        self.layer_context(f().into())
    }
}

impl<T, E> ErrorExt for Result<T, E>
where
    E: ErrorExt,
{
    type Output = Result<T, E::Output>;

    fn context<C>(self, context: C) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
    {
        match self {
            Ok(val) => Ok(val),
            Err(err) => Err(err.context(context)),
        }
    }

    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
        F: FnOnce() -> C,
    {
        match self {
            Ok(val) => Ok(val),
            Err(err) => Err(err.with_context(f)),
        }
    }
}

impl ErrorExt for io::Error {
    type Output = Error;

    fn context<C>(self, context: C) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
    {
        Error::from(self).context(context)
    }

    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
        F: FnOnce() -> C,
    {
        Error::from(self).with_context(f)
    }
}


/// A trait providing conversion shortcuts for creating [`Error`]s.
pub trait IntoError<T>: private::Sealed
where
    Self: Sized,
{
    /// Unwrap `self` into an `Ok` or an [`Error`] of the given kind.
    fn ok_or_error<C, F>(self, kind: ErrorKind, f: F) -> Result<T>
    where
        C: ToString,
        F: FnOnce() -> C;

    /// Unwrap `self` into an `Ok` or an [`ErrorKind::InvalidData`] error.
    #[inline]
    fn ok_or_invalid_data<C, F>(self, f: F) -> Result<T>
    where
        C: ToString,
        F: FnOnce() -> C,
    {
        self.ok_or_error(ErrorKind::InvalidData, f)
    }

    /// Unwrap `self` into an `Ok` or an [`ErrorKind::InvalidInput`] error.
    #[inline]
    fn ok_or_invalid_input<C, F>(self, f: F) -> Result<T>
    where
        C: ToString,
        F: FnOnce() -> C,
    {
        self.ok_or_error(ErrorKind::InvalidInput, f)
    }

    /// Unwrap `self` into an `Ok` or an [`ErrorKind::UnexpectedEof`] error.
    #[inline]
    fn ok_or_unexpected_eof<C, F>(self, f: F) -> Result<T>
    where
        C: ToString,
        F: FnOnce() -> C,
    {
        self.ok_or_error(ErrorKind::UnexpectedEof, f)
    }
}

impl<T> IntoError<T> for Option<T> {
    #[inline]
    fn ok_or_error<C, F>(self, kind: ErrorKind, f: F) -> Result<T>
    where
        C: ToString,
        F: FnOnce() -> C,
    {
        self.ok_or_else(|| Error::with_kind(kind, f().to_string()))
    }
}


mod private {
    use super::Error;

    pub trait Sealed {}

    impl<T> Sealed for Option<T> {}
    impl<T, E> Sealed for Result<T, E> {}
    impl Sealed for Error {}
    impl Sealed for std::io::Error {}
}
