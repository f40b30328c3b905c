/// Literal value loadable from the constant pool
///
/// This is what `ldc` pushes, what a static field can be initialized to (only the numeric and
/// string variants are legal there), and what gets passed as static arguments to bootstrap
/// methods.
///
/// Equality is the constant pool's: floats and doubles compare by their bits, so `NaN` equals
/// itself and `0.0` differs from `-0.0`.
#[derive(Clone, Debug)]
pub enum ConstantValue {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),

    /// Class literal, as an internal name (`java/lang/String`) or array descriptor (`[I`)
    Class(String),

    /// Method type, as a method descriptor
    MethodType(String),

    MethodHandle(Handle),
}

impl PartialEq for ConstantValue {
    fn eq(&self, other: &ConstantValue) -> bool {
        use ConstantValue::*;
        match (self, other) {
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Long(a), Long(b)) => a == b,
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (String(a), String(b)) | (Class(a), Class(b)) | (MethodType(a), MethodType(b)) => {
                a == b
            }
            (MethodHandle(a), MethodHandle(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ConstantValue {}

/// Type of a [`ConstantValue`]
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum LiteralType {
    Int,
    Float,
    Long,
    Double,
    String,
    Class,
    MethodType,
    MethodHandle,
}

impl ConstantValue {
    pub fn literal_type(&self) -> LiteralType {
        match self {
            ConstantValue::Integer(_) => LiteralType::Int,
            ConstantValue::Float(_) => LiteralType::Float,
            ConstantValue::Long(_) => LiteralType::Long,
            ConstantValue::Double(_) => LiteralType::Double,
            ConstantValue::String(_) => LiteralType::String,
            ConstantValue::Class(_) => LiteralType::Class,
            ConstantValue::MethodType(_) => LiteralType::MethodType,
            ConstantValue::MethodHandle(_) => LiteralType::MethodHandle,
        }
    }

    /// Longs and doubles take two stack slots (and two constant pool slots, hence `ldc2_w`)
    pub fn is_wide(&self) -> bool {
        matches!(self, ConstantValue::Long(_) | ConstantValue::Double(_))
    }
}

/// Symbolic reference to a field or method, as used by `CONSTANT_MethodHandle_info`
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Handle {
    pub kind: HandleKind,
    pub owner: String,
    pub name: String,
    pub descriptor: String,

    /// Whether `owner` is an interface (this selects `CONSTANT_InterfaceMethodref_info`)
    pub is_interface: bool,
}

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl HandleKind {
    /// The `reference_kind` byte of the handle
    pub fn reference_kind(&self) -> u8 {
        match self {
            HandleKind::GetField => 1,
            HandleKind::GetStatic => 2,
            HandleKind::PutField => 3,
            HandleKind::PutStatic => 4,
            HandleKind::InvokeVirtual => 5,
            HandleKind::InvokeStatic => 6,
            HandleKind::InvokeSpecial => 7,
            HandleKind::NewInvokeSpecial => 8,
            HandleKind::InvokeInterface => 9,
        }
    }

    pub fn from_reference_kind(kind: u8) -> Option<HandleKind> {
        Some(match kind {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            _ => return None,
        })
    }

    /// Field handles point at a `CONSTANT_Fieldref_info`, the rest at a method reference
    pub fn is_field(&self) -> bool {
        self.reference_kind() <= 4
    }
}
