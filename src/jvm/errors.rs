use super::class_file::Constant;
use super::code::InsnId;
use super::Opcode;
use std::path::PathBuf;

#[derive(Debug)]
pub enum Error {
    /// Bytes do not parse as a class file, or the model cannot be encoded back into one
    MalformedInput(String),

    /// The container (JAR or ZIP) is structurally broken
    ArchiveFormat(String),

    /// The path to load from does not exist
    NotFound(PathBuf),

    IoError(std::io::Error),

    /// Index-based access into a method body was out of range
    IndexOutOfRange { index: usize, size: usize },

    /// The instruction handle does not refer to a node currently linked into this code
    UnlinkedInstruction(InsnId),

    /// Neither a loader nor any of its parents could find the class
    ClassNotFound(String),

    /// A loader already defined a class with this name
    DuplicateClass(String),

    /// Bytes registered under one name declare a different class
    ClassNameMismatch { expected: String, found: String },

    ConstantPoolOverflow {
        constant: Constant,
        offset: u16,
    },

    /// Constant pool tag which the model has no representation for
    UnsupportedConstant(u8),

    /// The bytecode array of a method got larger than the 65535 bytes the format allows
    MethodCodeOverflow(usize),

    /// A jump target is too far away for the jump's offset encoding
    JumpOverflow { opcode: Opcode, offset: i64 },
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Error {
        match err {
            zip::result::ZipError::Io(err) => Error::IoError(err),
            other => Error::ArchiveFormat(other.to_string()),
        }
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Error {
        Error::IoError(err.into())
    }
}
