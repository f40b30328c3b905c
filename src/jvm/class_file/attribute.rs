use crate::jvm::class_file::{ClassConstantIndex, ConstantIndex, Serialize, Utf8ConstantIndex};
use byteorder::WriteBytesExt;

/// Named attribute, already encoded
///
/// Only the attributes the model round-trips are ever produced. Everything else found while
/// reading (signatures, annotations, stack map frames, local variable tables, ...) is skipped.
#[derive(Debug)]
pub struct Attribute {
    pub name_index: Utf8ConstantIndex,
    pub info: Vec<u8>,
}

impl Serialize for Attribute {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.name_index.serialize(writer)?;
        (self.info.len() as u32).serialize(writer)?;
        writer.write_all(&self.info)
    }
}

/// Typed contents of an attribute, encoded into an [`Attribute`] by the constant pool
pub trait AttributeLike: Serialize {
    const NAME: &'static str;
}

/// Serializes a struct as its fields in declaration order, or a newtype as its single field
macro_rules! serialize_fields {
    ($ty:ty { $($field:tt),+ }) => {
        impl Serialize for $ty {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                $(self.$field.serialize(writer)?;)+
                Ok(())
            }
        }
    };
}

/// Attribute whose layout is the listed fields
macro_rules! attribute {
    ($name:literal, $ty:ty { $($field:tt),+ }) => {
        serialize_fields!($ty { $($field),+ });

        impl AttributeLike for $ty {
            const NAME: &'static str = $name;
        }
    };
}

/// Initial value of a static field (JVMS 4.7.2)
pub struct ConstantValueAttribute(pub ConstantIndex);
attribute!("ConstantValue", ConstantValueAttribute { 0 });

/// Method body (JVMS 4.7.3)
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code_array: BytecodeArray,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}
attribute!(
    "Code",
    CodeAttribute {
        max_stack,
        max_locals,
        code_array,
        exception_table,
        attributes
    }
);

/// Entry of the exception table, covering `start_pc..end_pc`
pub struct ExceptionHandler {
    pub start_pc: BytecodeIndex,
    pub end_pc: BytecodeIndex,
    pub handler_pc: BytecodeIndex,

    /// [`ClassConstantIndex::NONE`] catches everything
    pub catch_type: ClassConstantIndex,
}
serialize_fields!(ExceptionHandler {
    start_pc,
    end_pc,
    handler_pc,
    catch_type
});

/// Encoded instructions, preceded by their 4-byte length
pub struct BytecodeArray(pub Vec<u8>);

impl Serialize for BytecodeArray {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        (self.0.len() as u32).serialize(writer)?;
        writer.write_all(&self.0)
    }
}

/// Offset into a [`BytecodeArray`]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BytecodeIndex(pub u16);
serialize_fields!(BytecodeIndex { 0 });

/// Source lines for ranges of bytecode (JVMS 4.7.12)
pub struct LineNumberTable(pub Vec<LineNumber>);
attribute!("LineNumberTable", LineNumberTable { 0 });

pub struct LineNumber {
    pub start_pc: BytecodeIndex,
    pub line_number: u16,
}
serialize_fields!(LineNumber {
    start_pc,
    line_number
});

/// JVMS 4.7.10
pub struct SourceFile(pub Utf8ConstantIndex);
attribute!("SourceFile", SourceFile { 0 });

/// Checked exceptions a method declares it may throw (JVMS 4.7.5)
pub struct Exceptions(pub Vec<ClassConstantIndex>);
attribute!("Exceptions", Exceptions { 0 });

/// Bootstrap methods referenced by `InvokeDynamic` constants (JVMS 4.7.23)
#[derive(Debug)]
pub struct BootstrapMethods(pub Vec<BootstrapMethod>);
attribute!("BootstrapMethods", BootstrapMethods { 0 });

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BootstrapMethod {
    pub bootstrap_method: ConstantIndex,
    pub bootstrap_arguments: Vec<ConstantIndex>,
}
serialize_fields!(BootstrapMethod {
    bootstrap_method,
    bootstrap_arguments
});
