use crate::jvm::class_file::{
    Attribute, ClassConstantIndex, ConstantsPool, Serialize, Utf8ConstantIndex, Version,
};
use crate::jvm::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use byteorder::WriteBytesExt;
use std::io::Result;

/// Class file laid out exactly as it gets written (see [the JVM specification][0])
///
/// Everything refers to the constant pool by index. [`super::ClassWriter`] is the only thing that
/// assembles one of these.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantsPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,

    /// [`ClassConstantIndex::NONE`] for `java/lang/Object`
    pub super_class: ClassConstantIndex,
    pub interfaces: Vec<ClassConstantIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// `0xCAFEBABE`, the first four bytes of every class file
    pub const MAGIC: u32 = 0xCAFE_BABE;
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        ClassFile::MAGIC.serialize(writer)?;
        self.version.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        self.super_class.serialize(writer)?;
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)
    }
}

/// `field_info` and `method_info` share a layout, differing only in the flags they allow
#[derive(Debug)]
pub struct MemberInfo<Flags> {
    pub access_flags: Flags,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub attributes: Vec<Attribute>,
}

pub type Field = MemberInfo<FieldAccessFlags>;
pub type Method = MemberInfo<MethodAccessFlags>;

impl<Flags: Serialize> Serialize for MemberInfo<Flags> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.access_flags.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.attributes.serialize(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_class_layout() {
        let mut constants = ConstantsPool::new();
        let this_class = constants.get_class_named("A").unwrap();
        let class = ClassFile {
            version: Version::JAVA8,
            constants,
            access_flags: ClassAccessFlags::PUBLIC,
            this_class,
            super_class: ClassConstantIndex::NONE,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        };

        let mut bytes = vec![];
        class.serialize(&mut bytes).unwrap();
        assert_eq!(
            bytes,
            vec![
                0xCA, 0xFE, 0xBA, 0xBE, // magic
                0, 0, 0, 52, // version
                0, 3, // constant count
                1, 0, 1, b'A', // #1 utf8
                7, 0, 1, // #2 class
                0, 1, // flags
                0, 2, // this
                0, 0, // super
                0, 0, 0, 0, 0, 0, 0, 0, // interfaces, fields, methods, attributes
            ]
        );
    }
}
