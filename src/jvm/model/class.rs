use super::{Field, Member, Method};
use crate::jvm::class_file::{ClassReader, ClassVisitor, ClassWriter, LabelToken, Version};
use crate::jvm::code::{Code, Instruction, TryCatchBlock};
use crate::jvm::{
    ClassAccessFlags, ConstantValue, Error, FieldAccessFlags, Handle, MethodAccessFlags, Opcode,
};

/// Semantic representation of a class
///
/// Only the parts of the class file the model knows about survive a decode and encode: header,
/// source file, fields (with constant values), methods (with thrown exceptions, instructions, line
/// numbers, exception table, and maxs) and `invokedynamic` bootstrap methods. Signatures,
/// annotations, inner class tables, stack map frames, local variable tables, and unknown
/// attributes are dropped.
#[derive(Clone, Debug)]
pub struct ClassModel {
    pub version: Version,
    pub access_flags: ClassAccessFlags,

    /// Internal name (eg. `java/lang/String`)
    pub name: String,

    /// Absent only for `java/lang/Object` (and modules)
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub source_file: Option<String>,

    /// Methods, in declaration order
    ///
    /// Use [`Self::add_method`] to replace any method with the same name and descriptor
    pub methods: Vec<Method>,

    /// Fields, in declaration order
    pub fields: Vec<Field>,
}

fn find_member<'a, M: Member>(members: &'a [M], name: &str, descriptor: &str) -> Option<usize> {
    members
        .iter()
        .position(|member| member.name() == name && member.descriptor() == descriptor)
}

impl ClassModel {
    /// Create a new public class with no members
    pub fn new(name: &str, super_name: Option<&str>) -> ClassModel {
        ClassModel {
            version: Version::JAVA8,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            name: name.to_string(),
            super_name: super_name.map(String::from),
            interfaces: vec![],
            source_file: None,
            methods: vec![],
            fields: vec![],
        }
    }

    /// Decode a class file
    pub fn from_bytes(bytes: &[u8]) -> Result<ClassModel, Error> {
        let reader = ClassReader::new(bytes)?;
        let mut builder = ClassModelBuilder::new();
        reader.accept(&mut builder)?;
        builder.finish()
    }

    /// Encode into a class file
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut writer = ClassWriter::new();
        self.accept(&mut writer)?;
        writer.into_bytes()
    }

    /// Replay the class as events: header, source, fields, methods, end
    pub fn accept<V: ClassVisitor + ?Sized>(&self, visitor: &mut V) -> Result<(), Error> {
        visitor.visit_header(
            self.version,
            self.access_flags,
            &self.name,
            self.super_name.as_deref(),
            &self.interfaces,
        )?;
        if let Some(source_file) = &self.source_file {
            visitor.visit_source(source_file)?;
        }
        for field in &self.fields {
            field.accept(visitor)?;
        }
        for method in &self.methods {
            method.accept(visitor)?;
        }
        visitor.visit_end()
    }

    /// First method with this name and descriptor
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        find_member(&self.methods, name, descriptor).map(|idx| &self.methods[idx])
    }

    pub fn find_method_mut(&mut self, name: &str, descriptor: &str) -> Option<&mut Method> {
        find_member(&self.methods, name, descriptor).map(move |idx| &mut self.methods[idx])
    }

    /// First field with this name and descriptor
    pub fn find_field(&self, name: &str, descriptor: &str) -> Option<&Field> {
        find_member(&self.fields, name, descriptor).map(|idx| &self.fields[idx])
    }

    pub fn find_field_mut(&mut self, name: &str, descriptor: &str) -> Option<&mut Field> {
        find_member(&self.fields, name, descriptor).map(move |idx| &mut self.fields[idx])
    }

    /// Add a method at the end, or replace the method with the same name and descriptor in place
    pub fn add_method(&mut self, method: Method) -> &mut Method {
        let idx = match find_member(&self.methods, &method.name, &method.descriptor) {
            Some(idx) => {
                self.methods[idx] = method;
                idx
            }
            None => {
                self.methods.push(method);
                self.methods.len() - 1
            }
        };
        &mut self.methods[idx]
    }

    /// Add a field at the end, or replace the field with the same name and descriptor in place
    pub fn add_field(&mut self, field: Field) -> &mut Field {
        let idx = match find_member(&self.fields, &field.name, &field.descriptor) {
            Some(idx) => {
                self.fields[idx] = field;
                idx
            }
            None => {
                self.fields.push(field);
                self.fields.len() - 1
            }
        };
        &mut self.fields[idx]
    }

    pub fn remove_method(&mut self, name: &str, descriptor: &str) -> Option<Method> {
        find_member(&self.methods, name, descriptor).map(|idx| self.methods.remove(idx))
    }

    pub fn remove_field(&mut self, name: &str, descriptor: &str) -> Option<Field> {
        find_member(&self.fields, name, descriptor).map(|idx| self.fields.remove(idx))
    }
}

/// Builds a [`ClassModel`] out of [`ClassVisitor`] events
///
/// Label tokens are resolved per method, so forward references work as long as the marker
/// eventually shows up.
#[derive(Default)]
pub struct ClassModelBuilder {
    class: Option<ClassModel>,
    field: Option<Field>,
    method: Option<Method>,
    ended: bool,
}

impl ClassModelBuilder {
    pub fn new() -> ClassModelBuilder {
        ClassModelBuilder::default()
    }

    /// The class, once all of its events have been received
    pub fn finish(self) -> Result<ClassModel, Error> {
        match self.class {
            Some(class) if self.ended => Ok(class),
            _ => Err(Error::MalformedInput(String::from("incomplete class events"))),
        }
    }

    fn class(&mut self) -> Result<&mut ClassModel, Error> {
        self.class
            .as_mut()
            .ok_or_else(|| Error::MalformedInput(String::from("class event before the header")))
    }

    fn code(&mut self) -> Result<&mut Code, Error> {
        self.method
            .as_mut()
            .map(|method| &mut method.code)
            .ok_or_else(|| Error::MalformedInput(String::from("code event outside of a method")))
    }

    fn append(&mut self, insn: Instruction) -> Result<(), Error> {
        let _ = self.code()?.append(insn);
        Ok(())
    }
}

impl ClassVisitor for ClassModelBuilder {
    fn visit_header(
        &mut self,
        version: Version,
        access_flags: ClassAccessFlags,
        name: &str,
        super_name: Option<&str>,
        interfaces: &[String],
    ) -> Result<(), Error> {
        if self.class.is_some() {
            return Err(Error::MalformedInput(String::from("second class header")));
        }
        let mut class = ClassModel::new(name, super_name);
        class.version = version;
        class.access_flags = access_flags;
        class.interfaces = interfaces.to_vec();
        self.class = Some(class);
        Ok(())
    }

    fn visit_source(&mut self, source_file: &str) -> Result<(), Error> {
        self.class()?.source_file = Some(source_file.to_string());
        Ok(())
    }

    fn visit_field(
        &mut self,
        access_flags: FieldAccessFlags,
        name: &str,
        descriptor: &str,
        value: Option<&ConstantValue>,
    ) -> Result<(), Error> {
        let _ = self.class()?;
        let mut field = Field::new(access_flags, name, descriptor);
        field.value = value.cloned();
        self.field = Some(field);
        Ok(())
    }

    fn visit_field_end(&mut self) -> Result<(), Error> {
        let field = self
            .field
            .take()
            .ok_or_else(|| Error::MalformedInput(String::from("field end without a field")))?;
        self.class()?.fields.push(field);
        Ok(())
    }

    fn visit_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        exceptions: &[String],
    ) -> Result<(), Error> {
        let _ = self.class()?;
        let mut method = Method::new(access_flags, name, descriptor);
        method.exceptions = exceptions.to_vec();
        self.method = Some(method);
        Ok(())
    }

    fn visit_insn(&mut self, opcode: Opcode) -> Result<(), Error> {
        self.append(Instruction::Simple(opcode))
    }

    fn visit_int_insn(&mut self, opcode: Opcode, operand: i32) -> Result<(), Error> {
        self.append(Instruction::Int { opcode, operand })
    }

    fn visit_var_insn(&mut self, opcode: Opcode, slot: u16) -> Result<(), Error> {
        self.append(Instruction::LocalVar { opcode, slot })
    }

    fn visit_iinc_insn(&mut self, slot: u16, delta: i16) -> Result<(), Error> {
        self.append(Instruction::Increment { slot, delta })
    }

    fn visit_field_insn(
        &mut self,
        opcode: Opcode,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        self.append(Instruction::Field {
            opcode,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        })
    }

    fn visit_method_insn(
        &mut self,
        opcode: Opcode,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<(), Error> {
        self.append(Instruction::Method {
            opcode,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_interface,
        })
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap: &Handle,
        arguments: &[ConstantValue],
    ) -> Result<(), Error> {
        self.append(Instruction::InvokeDynamic {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            bootstrap: bootstrap.clone(),
            arguments: arguments.to_vec(),
        })
    }

    fn visit_type_insn(&mut self, opcode: Opcode, descriptor: &str) -> Result<(), Error> {
        self.append(Instruction::Type {
            opcode,
            descriptor: descriptor.to_string(),
        })
    }

    fn visit_ldc_insn(&mut self, value: &ConstantValue) -> Result<(), Error> {
        self.append(Instruction::Ldc(value.clone()))
    }

    fn visit_jump_insn(&mut self, opcode: Opcode, target: LabelToken) -> Result<(), Error> {
        let code = self.code()?;
        let target = code.resolve_label(target);
        let _ = code.append(Instruction::Jump { opcode, target });
        Ok(())
    }

    fn visit_lookup_switch_insn(
        &mut self,
        default: LabelToken,
        keys: &[i32],
        targets: &[LabelToken],
    ) -> Result<(), Error> {
        let code = self.code()?;
        let default = code.resolve_label(default);
        let targets = targets
            .iter()
            .map(|target| code.resolve_label(*target))
            .collect();
        let _ = code.append(Instruction::LookupSwitch {
            default,
            keys: keys.to_vec(),
            targets,
        });
        Ok(())
    }

    fn visit_table_switch_insn(
        &mut self,
        min: i32,
        max: i32,
        default: LabelToken,
        targets: &[LabelToken],
    ) -> Result<(), Error> {
        let code = self.code()?;
        let default = code.resolve_label(default);
        let targets = targets
            .iter()
            .map(|target| code.resolve_label(*target))
            .collect();
        let _ = code.append(Instruction::TableSwitch {
            min,
            max,
            default,
            targets,
        });
        Ok(())
    }

    fn visit_multi_anew_array_insn(
        &mut self,
        descriptor: &str,
        dimensions: u8,
    ) -> Result<(), Error> {
        self.append(Instruction::MultiANewArray {
            descriptor: descriptor.to_string(),
            dimensions,
        })
    }

    fn visit_label(&mut self, label: LabelToken) -> Result<(), Error> {
        let code = self.code()?;
        let label = code.resolve_label(label);
        let _ = code.append(Instruction::Label(label));
        Ok(())
    }

    fn visit_line_number(&mut self, line: u16, start: LabelToken) -> Result<(), Error> {
        let code = self.code()?;
        let start = code.resolve_label(start);
        let _ = code.append(Instruction::LineNumber { line, start });
        Ok(())
    }

    fn visit_try_catch_block(
        &mut self,
        start: LabelToken,
        end: LabelToken,
        handler: LabelToken,
        exception: Option<&str>,
    ) -> Result<(), Error> {
        let code = self.code()?;
        let block = TryCatchBlock {
            start: code.resolve_label(start),
            end: code.resolve_label(end),
            handler: code.resolve_label(handler),
            exception: exception.map(String::from),
        };
        code.add_try_catch_block(block);
        Ok(())
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) -> Result<(), Error> {
        let code = self.code()?;
        code.max_stack = max_stack;
        code.max_locals = max_locals;
        Ok(())
    }

    fn visit_method_end(&mut self) -> Result<(), Error> {
        let method = self
            .method
            .take()
            .ok_or_else(|| Error::MalformedInput(String::from("method end without a method")))?;
        self.class()?.methods.push(method);
        Ok(())
    }

    fn visit_end(&mut self) -> Result<(), Error> {
        let _ = self.class()?;
        self.ended = true;
        Ok(())
    }
}
