use super::{ClassBuffer, Serialize};
use crate::jvm::Error;
use byteorder::WriteBytesExt;
use std::fmt;

/// `major.minor` version found right after the magic number
///
/// Versions order by major first, so comparisons read naturally (`version >= Version::JAVA11`).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub major_version: u16,
    pub minor_version: u16,
}

impl Version {
    /// Java SE 8, the version new classes get
    pub const JAVA8: Version = Version {
        major_version: 52,
        minor_version: 0,
    };

    /// Java SE 11, the first version with nest-based access
    pub const JAVA11: Version = Version {
        major_version: 55,
        minor_version: 0,
    };

    /// Java SE 21
    pub const LATEST_MAJOR_VERSION: u16 = 65;

    /// Read the version stored at `offset` (minor first), rejecting majors newer than
    /// [`Version::LATEST_MAJOR_VERSION`]
    pub fn parse(buffer: &ClassBuffer<'_>, offset: usize) -> Result<Version, Error> {
        let version = Version {
            minor_version: buffer.read_u16(offset)?,
            major_version: buffer.read_u16(offset + 2)?,
        };
        if version.major_version > Version::LATEST_MAJOR_VERSION {
            return Err(Error::MalformedInput(format!(
                "unsupported class file version {:?}",
                version
            )));
        }
        Ok(version)
    }
}

impl Serialize for Version {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.minor_version.serialize(writer)?;
        self.major_version.serialize(writer)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major_version, self.minor_version)
    }
}
