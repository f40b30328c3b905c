use super::Member;
use crate::jvm::class_file::ClassVisitor;
use crate::jvm::{ConstantValue, Error, FieldAccessFlags};

/// In-memory representation of a field
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub access_flags: FieldAccessFlags,
    pub name: String,
    pub descriptor: String,

    /// Constant field value
    ///
    /// The JVM only honors this on static fields, and only for numeric and string values.
    pub value: Option<ConstantValue>,
}

impl Field {
    pub fn new(access_flags: FieldAccessFlags, name: &str, descriptor: &str) -> Field {
        Field {
            access_flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            value: None,
        }
    }

    pub fn accept<V: ClassVisitor + ?Sized>(&self, visitor: &mut V) -> Result<(), Error> {
        visitor.visit_field(
            self.access_flags,
            &self.name,
            &self.descriptor,
            self.value.as_ref(),
        )?;
        visitor.visit_field_end()
    }
}

impl Member for Field {
    fn name(&self) -> &str {
        &self.name
    }

    fn descriptor(&self) -> &str {
        &self.descriptor
    }
}
