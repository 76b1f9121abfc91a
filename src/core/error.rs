//! Error types for the packed annotation engine

use thiserror::Error;

use crate::value::ValueKind;

#[derive(Error, Debug)]
pub enum PackError {
    /// Builder parameter was never set
    #[error("Missing mandatory parameter: {0}")]
    MissingParameter(&'static str),

    /// Handle is already part of this manager
    #[error("Package handle already registered: {0}")]
    DuplicateHandle(String),

    /// Handle is not installed in this manager
    #[error("Package handle not registered: {0}")]
    UnknownHandle(String),

    /// Handle is still installed in a different manager
    #[error("Package handle already installed in another manager: {0}")]
    HandleAlreadyInstalled(String),

    /// Bit-packed handle offered to a manager without bit-packing
    #[error("Bit-packing is disabled for this manager (handle {0})")]
    BitPackingDisabled(String),

    /// Converter declares neither a byte width nor a usable bit width
    #[error("Converter does not support bit-packing: {0}")]
    BitPackingUnsupported(String),

    /// Option value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Options file is not valid TOML for `ManagerOptions`
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Arena has no free slot and cannot grow
    #[error("Out of capacity: no free slots available")]
    OutOfCapacity,

    /// Slot id outside the arena
    #[error("Invalid slot ID: {0}")]
    InvalidSlotId(usize),

    /// Read of a never-written item with `fail_on_unwritten_read`
    #[error("Item has no stored values: {0}")]
    UnwrittenItem(String),

    /// Write to an unknown item with auto-registration off
    #[error("Item is not registered: {0}")]
    UnregisteredItem(String),

    /// Schema change on a manager without dynamic schema
    #[error("Schema is locked: dynamic handle registration is disabled")]
    SchemaLocked,

    /// No client is attached
    #[error("Manager is not in use: attach a client first")]
    NotInUse,

    /// Accessor kind does not match the converter
    #[error("Converter {converter} does not support value kind {kind}")]
    UnsupportedKind {
        converter: &'static str,
        kind: ValueKind,
    },

    /// Decoded index has no entry in the substitution table
    #[error("Unknown substitution index: {0}")]
    UnknownSubstitute(u32),

    /// Annotation key not declared by the storage
    #[error("Unknown annotation key: {0}")]
    UnknownAnnotation(String),
}

/// Coarse classification of [`PackError`] variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Capacity,
    IllegalState,
    UnsupportedKind,
    /// Decode failure caused by reading inconsistent bytes
    TornRead,
}

impl PackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PackError::MissingParameter(_)
            | PackError::DuplicateHandle(_)
            | PackError::UnknownHandle(_)
            | PackError::HandleAlreadyInstalled(_)
            | PackError::BitPackingDisabled(_)
            | PackError::BitPackingUnsupported(_)
            | PackError::InvalidConfig(_)
            | PackError::ConfigParse(_)
            | PackError::UnknownAnnotation(_) => ErrorKind::Configuration,
            PackError::OutOfCapacity | PackError::InvalidSlotId(_) => ErrorKind::Capacity,
            PackError::UnwrittenItem(_)
            | PackError::UnregisteredItem(_)
            | PackError::SchemaLocked
            | PackError::NotInUse => ErrorKind::IllegalState,
            PackError::UnsupportedKind { .. } => ErrorKind::UnsupportedKind,
            PackError::UnknownSubstitute(_) => ErrorKind::TornRead,
        }
    }

    pub(crate) fn unsupported(converter: &'static str, kind: ValueKind) -> Self {
        PackError::UnsupportedKind { converter, kind }
    }
}

pub type Result<T> = std::result::Result<T, PackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            PackError::MissingParameter("arena_factory").kind(),
            ErrorKind::Configuration
        );
        assert_eq!(PackError::OutOfCapacity.kind(), ErrorKind::Capacity);
        assert_eq!(PackError::SchemaLocked.kind(), ErrorKind::IllegalState);
        assert_eq!(
            PackError::unsupported("int", ValueKind::Double).kind(),
            ErrorKind::UnsupportedKind
        );
        assert_eq!(PackError::UnknownSubstitute(7).kind(), ErrorKind::TornRead);
    }

    #[test]
    fn test_error_display() {
        let err = PackError::unsupported("boolean", ValueKind::Long);
        assert_eq!(
            err.to_string(),
            "Converter boolean does not support value kind long"
        );
    }
}
