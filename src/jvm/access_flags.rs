use crate::jvm::class_file::Serialize;
use bitflags::bitflags;
use byteorder::WriteBytesExt;

/// Declares a `u16` flag set which is written to class files as its raw bits
///
/// Bits the declaration does not name are dropped when reading (see `from_bits_truncate`).
macro_rules! access_flags {
    ($(#[$meta:meta])* $name:ident { $($flag:ident = $bits:expr,)* }) => {
        bitflags! {
            $(#[$meta])*
            pub struct $name: u16 {
                $(const $flag = $bits;)*
            }
        }

        impl Serialize for $name {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                self.bits().serialize(writer)
            }
        }
    };
}

access_flags! {
    /// `access_flags` of a `ClassFile` (JVMS 4.1)
    ClassAccessFlags {
        PUBLIC = 0x0001,
        FINAL = 0x0010,
        SUPER = 0x0020,
        INTERFACE = 0x0200,
        ABSTRACT = 0x0400,
        SYNTHETIC = 0x1000,
        ANNOTATION = 0x2000,
        ENUM = 0x4000,
        MODULE = 0x8000,
    }
}

access_flags! {
    /// `access_flags` of a `method_info` (JVMS 4.6)
    MethodAccessFlags {
        PUBLIC = 0x0001,
        PRIVATE = 0x0002,
        PROTECTED = 0x0004,
        STATIC = 0x0008,
        FINAL = 0x0010,
        SYNCHRONIZED = 0x0020,
        BRIDGE = 0x0040,
        VARARGS = 0x0080,
        NATIVE = 0x0100,
        ABSTRACT = 0x0400,
        STRICT = 0x0800,
        SYNTHETIC = 0x1000,
    }
}

access_flags! {
    /// `access_flags` of a `field_info` (JVMS 4.5)
    FieldAccessFlags {
        PUBLIC = 0x0001,
        PRIVATE = 0x0002,
        PROTECTED = 0x0004,
        STATIC = 0x0008,
        FINAL = 0x0010,
        VOLATILE = 0x0040,
        TRANSIENT = 0x0080,
        SYNTHETIC = 0x1000,
        ENUM = 0x4000,
    }
}

impl MethodAccessFlags {
    /// Whether a method with these flags carries a `Code` attribute
    pub fn has_code(&self) -> bool {
        !self.intersects(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE)
    }
}
