use super::Member;
use crate::jvm::class_file::ClassVisitor;
use crate::jvm::code::Code;
use crate::jvm::{Error, MethodAccessFlags};

/// Semantic representation of a method
#[derive(Clone, Debug)]
pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name: String,
    pub descriptor: String,

    /// Which exceptions can this method throw? (internal names)
    ///
    /// Note: this does not need to include `RuntimeException`, `Error`, or subclasses
    pub exceptions: Vec<String>,

    /// Method body (empty for abstract and native methods)
    pub code: Code,
}

impl Method {
    /// Create a new method, with an empty body
    pub fn new(access_flags: MethodAccessFlags, name: &str, descriptor: &str) -> Method {
        Method {
            access_flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            exceptions: vec![],
            code: Code::new(),
        }
    }

    /// Whether encoding produces a `Code` attribute
    pub fn has_code(&self) -> bool {
        self.access_flags.has_code() || !self.code.is_empty()
    }

    pub fn accept<V: ClassVisitor + ?Sized>(&self, visitor: &mut V) -> Result<(), Error> {
        visitor.visit_method(
            self.access_flags,
            &self.name,
            &self.descriptor,
            &self.exceptions,
        )?;
        if self.has_code() {
            self.code.accept(visitor).map_err(|err| match err {
                Error::MalformedInput(msg) => Error::MalformedInput(format!(
                    "in method {}{}: {}",
                    self.name, self.descriptor, msg
                )),
                other => other,
            })?;
        }
        visitor.visit_method_end()
    }
}

impl Member for Method {
    fn name(&self) -> &str {
        &self.name
    }

    fn descriptor(&self) -> &str {
        &self.descriptor
    }
}
