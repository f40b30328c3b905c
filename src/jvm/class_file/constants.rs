use super::{serialize_to_vec, Attribute, AttributeLike, ClassBuffer, Serialize};
use crate::jvm::{ConstantValue, Error, Handle, HandleKind};
use crate::util::{Offset, OffsetVec, Width};
use byteorder::WriteBytesExt;
use std::collections::HashMap;
use std::result::Result;

/// Constant pool under construction
///
/// Every `get_*` method returns the index of an identical constant if the pool already has one,
/// and appends a new constant otherwise. Constants are identified by their encoded bytes, so
/// floats are compared bitwise (`NaN` payloads and `-0.0` stay apart) and a method reference is
/// never confused with an interface method reference.
///
/// The order in which constants are requested fully determines the layout of the pool: replaying
/// the same events produces the same bytes.
#[derive(Debug)]
pub struct ConstantsPool {
    constants: OffsetVec<Constant>,
    interned: HashMap<Vec<u8>, ConstantIndex>,
}

impl Default for ConstantsPool {
    fn default() -> ConstantsPool {
        ConstantsPool::new()
    }
}

impl ConstantsPool {
    pub fn new() -> ConstantsPool {
        ConstantsPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
            interned: HashMap::new(),
        }
    }

    /// Find or append a constant
    ///
    /// Slots go up to 65534: the count written in front of the pool is one more than the last
    /// slot, and it has to fit in a `u16`.
    fn intern(&mut self, constant: Constant) -> Result<ConstantIndex, Error> {
        let key = serialize_to_vec(&constant)?;
        if let Some(index) = self.interned.get(&key) {
            return Ok(*index);
        }

        let Offset(offset) = self.constants.offset_len();
        if offset + constant.width() > u16::MAX as usize {
            return Err(Error::ConstantPoolOverflow {
                constant,
                offset: offset as u16,
            });
        }
        let _ = self.constants.push(constant);
        let index = ConstantIndex(offset as u16);
        self.interned.insert(key, index);
        Ok(index)
    }

    /// Number of slots used so far, counting the unusable slot 0
    pub fn slot_count(&self) -> u16 {
        self.constants.offset_len().0 as u16
    }

    pub fn get_utf8(&mut self, utf8: &str) -> Result<Utf8ConstantIndex, Error> {
        self.intern(Constant::Utf8(utf8.to_string()))
            .map(Utf8ConstantIndex)
    }

    pub fn get_class(&mut self, name: Utf8ConstantIndex) -> Result<ClassConstantIndex, Error> {
        self.intern(Constant::Class(name)).map(ClassConstantIndex)
    }

    /// Class constant for an internal name (or an array descriptor)
    pub fn get_class_named(&mut self, name: &str) -> Result<ClassConstantIndex, Error> {
        let name = self.get_utf8(name)?;
        self.get_class(name)
    }

    pub fn get_integer(&mut self, integer: i32) -> Result<ConstantIndex, Error> {
        self.intern(Constant::Integer(integer))
    }

    pub fn get_long(&mut self, long: i64) -> Result<ConstantIndex, Error> {
        self.intern(Constant::Long(long))
    }

    pub fn get_float(&mut self, float: f32) -> Result<ConstantIndex, Error> {
        self.intern(Constant::Float(float))
    }

    pub fn get_double(&mut self, double: f64) -> Result<ConstantIndex, Error> {
        self.intern(Constant::Double(double))
    }

    pub fn get_string(&mut self, utf8: Utf8ConstantIndex) -> Result<StringConstantIndex, Error> {
        self.intern(Constant::String(utf8)).map(StringConstantIndex)
    }

    pub fn get_name_and_type(
        &mut self,
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    ) -> Result<NameAndTypeConstantIndex, Error> {
        self.intern(Constant::NameAndType { name, descriptor })
            .map(NameAndTypeConstantIndex)
    }

    pub fn get_name_and_type_of(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<NameAndTypeConstantIndex, Error> {
        let name = self.get_utf8(name)?;
        let descriptor = self.get_utf8(descriptor)?;
        self.get_name_and_type(name, descriptor)
    }

    pub fn get_field_ref(
        &mut self,
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    ) -> Result<FieldRefConstantIndex, Error> {
        self.intern(Constant::FieldRef(class, name_and_type))
            .map(FieldRefConstantIndex)
    }

    /// `CONSTANT_Methodref_info`, or `CONSTANT_InterfaceMethodref_info` when `is_interface`
    pub fn get_method_ref(
        &mut self,
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    ) -> Result<MethodRefConstantIndex, Error> {
        let constant = Constant::MethodRef {
            class,
            name_and_type,
            is_interface,
        };
        self.intern(constant).map(MethodRefConstantIndex)
    }

    pub fn get_method_handle(
        &mut self,
        handle_kind: HandleKind,
        member: ConstantIndex,
    ) -> Result<ConstantIndex, Error> {
        self.intern(Constant::MethodHandle {
            handle_kind,
            member,
        })
    }

    /// Method handle constant, along with the member reference it points to
    pub fn get_handle(&mut self, handle: &Handle) -> Result<ConstantIndex, Error> {
        let class = self.get_class_named(&handle.owner)?;
        let name_and_type = self.get_name_and_type_of(&handle.name, &handle.descriptor)?;
        let member: ConstantIndex = if handle.kind.is_field() {
            self.get_field_ref(class, name_and_type)?.into()
        } else {
            self.get_method_ref(class, name_and_type, handle.is_interface)?
                .into()
        };
        self.get_method_handle(handle.kind, member)
    }

    pub fn get_method_type(&mut self, descriptor: Utf8ConstantIndex) -> Result<ConstantIndex, Error> {
        self.intern(Constant::MethodType { descriptor })
    }

    pub fn get_invoke_dynamic(
        &mut self,
        bootstrap_method: u16,
        method_descriptor: NameAndTypeConstantIndex,
    ) -> Result<InvokeDynamicConstantIndex, Error> {
        self.intern(Constant::InvokeDynamic {
            bootstrap_method,
            method_descriptor,
        })
        .map(InvokeDynamicConstantIndex)
    }

    /// Any loadable constant, as used by `ldc`, `ConstantValue`, and bootstrap arguments
    pub fn get_constant_value(&mut self, value: &ConstantValue) -> Result<ConstantIndex, Error> {
        match value {
            ConstantValue::Integer(integer) => self.get_integer(*integer),
            ConstantValue::Float(float) => self.get_float(*float),
            ConstantValue::Long(long) => self.get_long(*long),
            ConstantValue::Double(double) => self.get_double(*double),
            ConstantValue::String(string) => {
                let utf8 = self.get_utf8(string)?;
                Ok(self.get_string(utf8)?.into())
            }
            ConstantValue::Class(name) => Ok(self.get_class_named(name)?.into()),
            ConstantValue::MethodType(descriptor) => {
                let utf8 = self.get_utf8(descriptor)?;
                self.get_method_type(utf8)
            }
            ConstantValue::MethodHandle(handle) => self.get_handle(handle),
        }
    }

    /// Serialize an attribute, registering its name in the pool
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: A) -> Result<Attribute, Error> {
        let name_index = self.get_utf8(A::NAME)?;
        let info = serialize_to_vec(&attribute)?;
        Ok(Attribute { name_index, info })
    }
}

impl Serialize for ConstantsPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.slot_count().serialize(writer)?;
        for (_, _, constant) in self.constants.iter() {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

/// Constant pool of a class file being read
///
/// Lookups check the kind of constant found at the index and report anything unexpected as
/// malformed input.
pub struct ConstantsTable {
    constants: OffsetVec<Constant>,
}

impl ConstantsTable {
    /// Parse the `constant_pool_count` and `constant_pool` items starting at `offset`
    ///
    /// Returns the table and the offset just past the constant pool.
    pub fn parse(buffer: &ClassBuffer<'_>, offset: usize) -> Result<(ConstantsTable, usize), Error> {
        let count = buffer.read_u16(offset)? as usize;
        let mut position = offset + 2;
        let mut constants = OffsetVec::new_starting_at(Offset(1));

        while constants.offset_len().0 < count {
            let tag = buffer.read_u8(position)?;
            position += 1;
            let constant = match tag {
                1 => {
                    let len = buffer.read_u16(position)? as usize;
                    let bytes = buffer.read_bytes(position + 2, len)?;
                    position += 2 + len;
                    Constant::Utf8(decode_modified_utf8(bytes)?)
                }
                3 => {
                    position += 4;
                    Constant::Integer(buffer.read_i32(position - 4)?)
                }
                4 => {
                    position += 4;
                    Constant::Float(buffer.read_f32(position - 4)?)
                }
                5 => {
                    position += 8;
                    Constant::Long(buffer.read_i64(position - 8)?)
                }
                6 => {
                    position += 8;
                    Constant::Double(buffer.read_f64(position - 8)?)
                }
                7 => {
                    position += 2;
                    Constant::Class(Utf8ConstantIndex(read_index(buffer, position - 2)?))
                }
                8 => {
                    position += 2;
                    Constant::String(Utf8ConstantIndex(read_index(buffer, position - 2)?))
                }
                9 => {
                    position += 4;
                    Constant::FieldRef(
                        ClassConstantIndex(read_index(buffer, position - 4)?),
                        NameAndTypeConstantIndex(read_index(buffer, position - 2)?),
                    )
                }
                10 | 11 => {
                    position += 4;
                    Constant::MethodRef {
                        class: ClassConstantIndex(read_index(buffer, position - 4)?),
                        name_and_type: NameAndTypeConstantIndex(read_index(buffer, position - 2)?),
                        is_interface: tag == 11,
                    }
                }
                12 => {
                    position += 4;
                    Constant::NameAndType {
                        name: Utf8ConstantIndex(read_index(buffer, position - 4)?),
                        descriptor: Utf8ConstantIndex(read_index(buffer, position - 2)?),
                    }
                }
                15 => {
                    let kind = buffer.read_u8(position)?;
                    let handle_kind = HandleKind::from_reference_kind(kind).ok_or_else(|| {
                        Error::MalformedInput(format!("invalid method handle kind {}", kind))
                    })?;
                    position += 3;
                    Constant::MethodHandle {
                        handle_kind,
                        member: read_index(buffer, position - 2)?,
                    }
                }
                16 => {
                    position += 2;
                    Constant::MethodType {
                        descriptor: Utf8ConstantIndex(read_index(buffer, position - 2)?),
                    }
                }
                18 => {
                    position += 4;
                    Constant::InvokeDynamic {
                        bootstrap_method: buffer.read_u16(position - 4)?,
                        method_descriptor: NameAndTypeConstantIndex(read_index(
                            buffer,
                            position - 2,
                        )?),
                    }
                }
                19 => {
                    position += 2;
                    Constant::Module(Utf8ConstantIndex(read_index(buffer, position - 2)?))
                }
                20 => {
                    position += 2;
                    Constant::Package(Utf8ConstantIndex(read_index(buffer, position - 2)?))
                }
                other => return Err(Error::UnsupportedConstant(other)),
            };
            let _ = constants.push(constant);
        }

        if constants.offset_len().0 != count {
            return Err(Error::MalformedInput(String::from(
                "wide constant straddles the end of the constant pool",
            )));
        }

        Ok((ConstantsTable { constants }, position))
    }

    pub fn get(&self, index: ConstantIndex) -> Result<&Constant, Error> {
        self.constants
            .get_offset(Offset(index.0 as usize))
            .ok()
            .ok_or_else(|| Error::MalformedInput(format!("no constant at index {}", index.0)))
    }

    fn unexpected<T>(&self, index: ConstantIndex, expected: &str) -> Result<T, Error> {
        Err(Error::MalformedInput(format!(
            "expected {} at constant index {}, found {:?}",
            expected,
            index.0,
            self.get(index)?
        )))
    }

    pub fn utf8(&self, index: ConstantIndex) -> Result<&str, Error> {
        match self.get(index)? {
            Constant::Utf8(string) => Ok(string),
            _ => self.unexpected(index, "utf8"),
        }
    }

    /// Internal name of a class constant
    pub fn class_name(&self, index: ConstantIndex) -> Result<&str, Error> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(name.0),
            _ => self.unexpected(index, "class"),
        }
    }

    /// Like [`Self::class_name`], but index 0 stands for "no class"
    pub fn optional_class_name(&self, index: ConstantIndex) -> Result<Option<&str>, Error> {
        if index.0 == 0 {
            Ok(None)
        } else {
            self.class_name(index).map(Some)
        }
    }

    pub fn name_and_type(&self, index: ConstantIndex) -> Result<(&str, &str), Error> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(name.0)?, self.utf8(descriptor.0)?))
            }
            _ => self.unexpected(index, "name and type"),
        }
    }

    /// Owner, name, descriptor, and interface flag of a field or method reference
    pub fn member_ref(&self, index: ConstantIndex) -> Result<(&str, &str, &str, bool), Error> {
        let (class, name_and_type, is_interface) = match self.get(index)? {
            Constant::FieldRef(class, name_and_type) => (*class, *name_and_type, false),
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => (*class, *name_and_type, *is_interface),
            _ => return self.unexpected(index, "member reference"),
        };
        let owner = self.class_name(class.0)?;
        let (name, descriptor) = self.name_and_type(name_and_type.0)?;
        Ok((owner, name, descriptor, is_interface))
    }

    pub fn handle(&self, index: ConstantIndex) -> Result<Handle, Error> {
        match self.get(index)? {
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                let (owner, name, descriptor, is_interface) = self.member_ref(*member)?;
                Ok(Handle {
                    kind: *handle_kind,
                    owner: owner.to_string(),
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                    is_interface,
                })
            }
            _ => self.unexpected(index, "method handle"),
        }
    }

    /// Anything `ldc` can push (or a static field be initialized with)
    pub fn constant_value(&self, index: ConstantIndex) -> Result<ConstantValue, Error> {
        Ok(match self.get(index)? {
            Constant::Integer(integer) => ConstantValue::Integer(*integer),
            Constant::Float(float) => ConstantValue::Float(*float),
            Constant::Long(long) => ConstantValue::Long(*long),
            Constant::Double(double) => ConstantValue::Double(*double),
            Constant::String(utf8) => ConstantValue::String(self.utf8(utf8.0)?.to_string()),
            Constant::Class(utf8) => ConstantValue::Class(self.utf8(utf8.0)?.to_string()),
            Constant::MethodType { descriptor } => {
                ConstantValue::MethodType(self.utf8(descriptor.0)?.to_string())
            }
            Constant::MethodHandle { .. } => ConstantValue::MethodHandle(self.handle(index)?),
            _ => return self.unexpected(index, "loadable constant"),
        })
    }

    /// Bootstrap method attribute index and name & type of an `invokedynamic` call site
    pub fn invoke_dynamic(&self, index: ConstantIndex) -> Result<(u16, &str, &str), Error> {
        match self.get(index)? {
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => {
                let (name, descriptor) = self.name_and_type(method_descriptor.0)?;
                Ok((*bootstrap_method, name, descriptor))
            }
            _ => self.unexpected(index, "invoke dynamic"),
        }
    }
}

fn read_index(buffer: &ClassBuffer<'_>, position: usize) -> Result<ConstantIndex, Error> {
    Ok(ConstantIndex(buffer.read_u16(position)?))
}

/// Entry of the constant pool (JVMS 4.4)
///
/// References to other entries are kept as indices, exactly as they appear in the class file.
/// `CONSTANT_Dynamic` has no variant: the model cannot represent it.
#[derive(Debug, Clone)]
pub enum Constant {
    Class(Utf8ConstantIndex),

    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// `Methodref`, or `InterfaceMethodref` when `is_interface` is set
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// String literal, pointing at its contents
    String(Utf8ConstantIndex),

    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),

    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Text, stored in the pool as modified UTF-8 (see [`encode_modified_utf8`])
    Utf8(String),

    MethodHandle {
        handle_kind: HandleKind,

        /// `FieldRef` for the four field kinds, `MethodRef` otherwise
        member: ConstantIndex,
    },

    MethodType { descriptor: Utf8ConstantIndex },

    /// Call site of an `invokedynamic`
    InvokeDynamic {
        /// Position in the `BootstrapMethods` attribute
        bootstrap_method: u16,
        method_descriptor: NameAndTypeConstantIndex,
    },

    /// Module (only in `module-info` classes)
    Module(Utf8ConstantIndex),

    /// Package exported or opened by a module
    Package(Utf8ConstantIndex),
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Utf8(string) => {
                let buffer = encode_modified_utf8(string);
                if buffer.len() > u16::MAX as usize {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "string constant longer than 65535 bytes",
                    ));
                }
                1u8.serialize(writer)?;
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => {
                3u8.serialize(writer)?;
                integer.serialize(writer)?;
            }
            Constant::Float(float) => {
                4u8.serialize(writer)?;
                float.serialize(writer)?;
            }
            Constant::Long(long) => {
                5u8.serialize(writer)?;
                long.serialize(writer)?;
            }
            Constant::Double(double) => {
                6u8.serialize(writer)?;
                double.serialize(writer)?;
            }
            Constant::Class(name) => {
                7u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::String(bytes) => {
                8u8.serialize(writer)?;
                bytes.serialize(writer)?;
            }
            Constant::FieldRef(class, name_and_type) => {
                9u8.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => {
                (if !is_interface { 10u8 } else { 11u8 }).serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                12u8.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                15u8.serialize(writer)?;
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => {
                16u8.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => {
                18u8.serialize(writer)?;
                bootstrap_method.serialize(writer)?;
                method_descriptor.serialize(writer)?;
            }
            Constant::Module(name) => {
                19u8.serialize(writer)?;
                name.serialize(writer)?;
            }
            Constant::Package(name) => {
                20u8.serialize(writer)?;
                name.serialize(writer)?;
            }
        };
        Ok(())
    }
}

/// `long` and `double` entries use up two slots, the second of which is never referenced
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Encode a string the way the class file format (and `DataOutput.writeUTF`) expects
///
/// This differs from UTF-8 in two ways:
///
///   - `\u{0000}` is encoded on two bytes, so that encoded strings never contain a zero byte
///   - supplementary characters are encoded as a surrogate pair, each half on three bytes
///
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = Vec::with_capacity(string.len());
    for unit in string.encode_utf16() {
        match unit {
            0x0001..=0x007F => buffer.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                buffer.push((unit >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((unit & 0x3F) as u8 | 0b1000_0000);
            }
            _ => {
                buffer.push((unit >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((unit >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((unit & 0x3F) as u8 | 0b1000_0000);
            }
        }
    }
    buffer
}

/// Decode modified UTF-8 (see [`encode_modified_utf8`])
///
/// Unpaired surrogates are legal in Java strings but cannot be represented in a Rust `String`, so
/// they are reported as malformed input.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, Error> {
    let malformed = || Error::MalformedInput(String::from("invalid modified UTF-8 string"));
    let continuation = |byte: Option<&u8>| -> Result<u16, Error> {
        match byte {
            Some(byte) if byte & 0b1100_0000 == 0b1000_0000 => Ok((byte & 0x3F) as u16),
            _ => Err(malformed()),
        }
    };

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter();
    while let Some(&byte) = iter.next() {
        let unit = if byte & 0b1000_0000 == 0 && byte != 0 {
            byte as u16
        } else if byte & 0b1110_0000 == 0b1100_0000 {
            ((byte & 0x1F) as u16) << 6 | continuation(iter.next())?
        } else if byte & 0b1111_0000 == 0b1110_0000 {
            let high = continuation(iter.next())?;
            let low = continuation(iter.next())?;
            ((byte & 0x0F) as u16) << 12 | high << 6 | low
        } else {
            return Err(malformed());
        };
        units.push(unit);
    }

    String::from_utf16(&units).map_err(|_| malformed())
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ConstantIndex(pub u16);

macro_rules! constant_indices {
    ($($(#[$attr:meta])* $name:ident,)*) => {
        $(
            $(#[$attr])*
            #[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
            pub struct $name(ConstantIndex);

            impl From<$name> for ConstantIndex {
                fn from(index: $name) -> ConstantIndex {
                    index.0
                }
            }

            impl Serialize for $name {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                    self.0.serialize(writer)
                }
            }
        )*
    };
}

constant_indices! {
    Utf8ConstantIndex,
    StringConstantIndex,
    NameAndTypeConstantIndex,
    ClassConstantIndex,
    FieldRefConstantIndex,
    MethodRefConstantIndex,
    InvokeDynamicConstantIndex,
}

impl ClassConstantIndex {
    /// Stands for "no class" (eg. the super class of `java/lang/Object`)
    pub const NONE: ClassConstantIndex = ClassConstantIndex(ConstantIndex(0));
}

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for HandleKind {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.reference_kind().serialize(writer)
    }
}
