//! Error types for the proxy subsystem
//!
//! Foreign-side failures travel unmodified inside `ProxyError::Foreign`;
//! everything else is a host-side condition raised by the bridge itself.

use std::fmt;

/// Error raised by the foreign environment (a thrown foreign exception)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignError {
    /// Foreign exception class name, e.g. `TypeError`
    pub name: String,
    pub message: String,
}

impl ForeignError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ForeignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for ForeignError {}

/// Failure of a wrap operation or of a slot behavior on a proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    /// Host object or shape allocation failed
    OutOfMemory { resource: &'static str },
    /// Foreign code raised while probing, duplicating or invoking
    Foreign(ForeignError),
    /// The proxy's shape does not install the requested slot
    MissingSlot { slot: &'static str, shape: String },
    /// Attribute lookup found nothing on the foreign value
    NoSuchProperty { name: String },
    /// A capability bit was registered twice in a catalog
    DuplicateCapability { flag: u32 },
    /// The process-wide runtime has not been initialized
    NotInitialized,
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { resource } => write!(f, "Out of memory allocating {}", resource),
            Self::Foreign(err) => write!(f, "Foreign error: {}", err),
            Self::MissingSlot { slot, shape } => {
                write!(f, "'{}' object does not support {}", shape, slot)
            }
            Self::NoSuchProperty { name } => write!(f, "Foreign value has no attribute '{}'", name),
            Self::DuplicateCapability { flag } => {
                write!(f, "Capability bit {:#x} is already registered", flag)
            }
            Self::NotInitialized => write!(f, "Proxy runtime is not initialized"),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Foreign(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ForeignError> for ProxyError {
    #[inline]
    fn from(err: ForeignError) -> Self {
        Self::Foreign(err)
    }
}

impl ProxyError {
    /// True for the out-of-memory class of failures
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}
