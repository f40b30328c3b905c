use crate::jvm::class_file::{
    serialize_to_vec, Attribute, BootstrapMethod, BootstrapMethods, BytecodeArray, BytecodeIndex,
    ClassConstantIndex, ClassFile, ClassVisitor, CodeAttribute, ConstantIndex,
    ConstantValueAttribute, ConstantsPool, ExceptionHandler, Exceptions, Field, LabelToken,
    LineNumber, LineNumberTable, Method, SourceFile, Version,
};
use crate::jvm::{
    ClassAccessFlags, ConstantValue, Error, FieldAccessFlags, Handle, MethodAccessFlags, Opcode,
};
use byteorder::{BigEndian, ByteOrder};
use std::collections::HashMap;

/// Builds class file bytes out of [`ClassVisitor`] events
///
/// The constant pool is built on the fly, in the order in which events need constants, and
/// instructions are encoded in their most compact form (`iload_1` over `iload 1`, `ldc` over
/// `ldc_w`, `wide` only when needed). Branch offsets to labels that are not yet placed are patched
/// once the method ends.
///
/// Maximum stack and locals are written as received and no `StackMapTable` is produced.
pub struct ClassWriter {
    constants: ConstantsPool,
    header: Option<Header>,
    source_file: Option<Attribute>,
    fields: Vec<Field>,
    methods: Vec<Method>,
    bootstrap_methods: Vec<BootstrapMethod>,
    bootstrap_indices: HashMap<BootstrapMethod, u16>,
    current_field: Option<Field>,
    current_method: Option<MethodWriter>,
    output: Option<Vec<u8>>,
}

struct Header {
    version: Version,
    access_flags: ClassAccessFlags,
    this_class: ClassConstantIndex,
    super_class: ClassConstantIndex,
    interfaces: Vec<ClassConstantIndex>,
}

/// State for the method currently receiving events
struct MethodWriter {
    method: Method,
    exceptions: Option<Attribute>,

    /// Whether the method gets a `Code` attribute
    has_code: bool,

    code: Vec<u8>,
    labels: HashMap<LabelToken, usize>,
    fixups: Vec<Fixup>,
    line_numbers: Vec<(u16, LabelToken)>,
    handlers: Vec<(LabelToken, LabelToken, LabelToken, ClassConstantIndex)>,
    max_stack: u16,
    max_locals: u16,
}

/// Branch offset to fill in once every label is placed
struct Fixup {
    opcode: Opcode,

    /// Offset of the branching instruction (offsets are relative to it)
    instruction: usize,

    /// Where the offset gets written
    position: usize,

    /// Four byte offset (`goto_w`, `jsr_w`, switches) rather than two
    wide: bool,

    target: LabelToken,
}

impl Default for ClassWriter {
    fn default() -> ClassWriter {
        ClassWriter::new()
    }
}

impl ClassWriter {
    pub fn new() -> ClassWriter {
        ClassWriter {
            constants: ConstantsPool::new(),
            header: None,
            source_file: None,
            fields: vec![],
            methods: vec![],
            bootstrap_methods: vec![],
            bootstrap_indices: HashMap::new(),
            current_field: None,
            current_method: None,
            output: None,
        }
    }

    /// Bytes of the class, available once `visit_end` has been received
    pub fn into_bytes(self) -> Result<Vec<u8>, Error> {
        self.output.ok_or_else(|| {
            Error::MalformedInput(String::from("class writer did not receive `visit_end`"))
        })
    }

    fn method(&mut self) -> Result<&mut MethodWriter, Error> {
        self.current_method
            .as_mut()
            .ok_or_else(|| Error::MalformedInput(String::from("code event outside of a method")))
    }

    /// Start a new instruction, returning the method and the offset of the instruction
    fn instruction(&mut self, opcode: Opcode) -> Result<(&mut MethodWriter, usize), Error> {
        let method = self.method()?;
        let offset = method.code.len();
        method.has_code = true;
        method.code.push(opcode.0);
        Ok((method, offset))
    }

    fn bootstrap_method(
        &mut self,
        bootstrap: &Handle,
        arguments: &[ConstantValue],
    ) -> Result<u16, Error> {
        let bootstrap_method = self.constants.get_handle(bootstrap)?;
        let bootstrap_arguments = arguments
            .iter()
            .map(|argument| self.constants.get_constant_value(argument))
            .collect::<Result<Vec<_>, Error>>()?;
        let method = BootstrapMethod {
            bootstrap_method,
            bootstrap_arguments,
        };

        if let Some(index) = self.bootstrap_indices.get(&method) {
            return Ok(*index);
        }
        let index = self.bootstrap_methods.len() as u16;
        self.bootstrap_methods.push(method.clone());
        self.bootstrap_indices.insert(method, index);
        Ok(index)
    }
}

impl MethodWriter {
    fn push_u16(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_be_bytes());
    }

    fn push_i32(&mut self, value: i32) {
        self.code.extend_from_slice(&value.to_be_bytes());
    }

    fn push_index<I: Into<ConstantIndex>>(&mut self, index: I) {
        self.push_u16(index.into().0)
    }

    /// Reserve space for a branch offset
    fn push_target(&mut self, opcode: Opcode, instruction: usize, target: LabelToken, wide: bool) {
        self.fixups.push(Fixup {
            opcode,
            instruction,
            position: self.code.len(),
            wide,
            target,
        });
        let width = if wide { 4 } else { 2 };
        self.code.extend(std::iter::repeat(0).take(width));
    }

    /// Switch operands start at a multiple of 4 from the start of the code
    fn push_switch_padding(&mut self) {
        while self.code.len() % 4 != 0 {
            self.code.push(0);
        }
    }

    fn label_offset(&self, label: LabelToken) -> Result<usize, Error> {
        self.labels.get(&label).copied().ok_or_else(|| {
            Error::MalformedInput(format!("label {:?} is referenced but never placed", label))
        })
    }

    fn bytecode_index(&self, label: LabelToken) -> Result<BytecodeIndex, Error> {
        Ok(BytecodeIndex(self.label_offset(label)? as u16))
    }

    /// Patch branch offsets and assemble the `Code` attribute contents
    fn finish(mut self, constants: &mut ConstantsPool) -> Result<Method, Error> {
        if self.code.len() > u16::MAX as usize {
            return Err(Error::MethodCodeOverflow(self.code.len()));
        }

        for fixup in &self.fixups {
            let target = self.label_offset(fixup.target)?;
            let offset = target as i64 - fixup.instruction as i64;
            let slot = &mut self.code[fixup.position..];
            if fixup.wide {
                BigEndian::write_i32(slot, offset as i32);
            } else if let Ok(offset) = i16::try_from(offset) {
                BigEndian::write_i16(slot, offset);
            } else {
                return Err(Error::JumpOverflow {
                    opcode: fixup.opcode,
                    offset,
                });
            }
        }

        if self.has_code {
            let mut exception_table = Vec::with_capacity(self.handlers.len());
            for (start, end, handler, catch_type) in &self.handlers {
                exception_table.push(ExceptionHandler {
                    start_pc: self.bytecode_index(*start)?,
                    end_pc: self.bytecode_index(*end)?,
                    handler_pc: self.bytecode_index(*handler)?,
                    catch_type: *catch_type,
                });
            }

            let mut attributes = vec![];
            if !self.line_numbers.is_empty() {
                let mut entries = Vec::with_capacity(self.line_numbers.len());
                for (line_number, start) in &self.line_numbers {
                    entries.push(LineNumber {
                        start_pc: self.bytecode_index(*start)?,
                        line_number: *line_number,
                    });
                }
                attributes.push(constants.get_attribute(LineNumberTable(entries))?);
            }

            let code = CodeAttribute {
                max_stack: self.max_stack,
                max_locals: self.max_locals,
                code_array: BytecodeArray(self.code),
                exception_table,
                attributes,
            };
            self.method.attributes.push(constants.get_attribute(code)?);
        }

        if let Some(exceptions) = self.exceptions {
            self.method.attributes.push(exceptions);
        }

        Ok(self.method)
    }
}

/// Number of argument slots an `invokeinterface` passes, receiver included
fn invoke_interface_count(descriptor: &str) -> Result<u8, Error> {
    let malformed = || Error::MalformedInput(format!("bad method descriptor {:?}", descriptor));
    let arguments = descriptor
        .strip_prefix('(')
        .and_then(|rest| rest.split(')').next())
        .ok_or_else(malformed)?;

    let mut count: usize = 1;
    let mut chars = arguments.chars();
    while let Some(c) = chars.next() {
        match c {
            'J' | 'D' => count += 2,
            'B' | 'C' | 'F' | 'I' | 'S' | 'Z' => count += 1,
            'L' => {
                chars.by_ref().find(|c| *c == ';').ok_or_else(malformed)?;
                count += 1;
            }
            '[' => {
                let mut element = chars.next();
                while element == Some('[') {
                    element = chars.next();
                }
                match element {
                    Some('L') => {
                        chars.by_ref().find(|c| *c == ';').ok_or_else(malformed)?;
                    }
                    Some('B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z') => (),
                    _ => return Err(malformed()),
                }
                count += 1;
            }
            _ => return Err(malformed()),
        }
    }

    u8::try_from(count).map_err(|_| malformed())
}

impl ClassVisitor for ClassWriter {
    fn visit_header(
        &mut self,
        version: Version,
        access_flags: ClassAccessFlags,
        name: &str,
        super_name: Option<&str>,
        interfaces: &[String],
    ) -> Result<(), Error> {
        let this_class = self.constants.get_class_named(name)?;
        let super_class = match super_name {
            Some(super_name) => self.constants.get_class_named(super_name)?,
            None => ClassConstantIndex::NONE,
        };
        let interfaces = interfaces
            .iter()
            .map(|interface| self.constants.get_class_named(interface))
            .collect::<Result<Vec<_>, Error>>()?;

        self.header = Some(Header {
            version,
            access_flags,
            this_class,
            super_class,
            interfaces,
        });
        Ok(())
    }

    fn visit_source(&mut self, source_file: &str) -> Result<(), Error> {
        let source_file = self.constants.get_utf8(source_file)?;
        self.source_file = Some(self.constants.get_attribute(SourceFile(source_file))?);
        Ok(())
    }

    fn visit_field(
        &mut self,
        access_flags: FieldAccessFlags,
        name: &str,
        descriptor: &str,
        value: Option<&ConstantValue>,
    ) -> Result<(), Error> {
        let name_index = self.constants.get_utf8(name)?;
        let descriptor_index = self.constants.get_utf8(descriptor)?;
        let mut attributes = vec![];
        if let Some(value) = value {
            let value = self.constants.get_constant_value(value)?;
            attributes.push(self.constants.get_attribute(ConstantValueAttribute(value))?);
        }

        self.current_field = Some(Field {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
        Ok(())
    }

    fn visit_field_end(&mut self) -> Result<(), Error> {
        let field = self.current_field.take().ok_or_else(|| {
            Error::MalformedInput(String::from("field end without a field"))
        })?;
        self.fields.push(field);
        Ok(())
    }

    fn visit_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        exceptions: &[String],
    ) -> Result<(), Error> {
        let name_index = self.constants.get_utf8(name)?;
        let descriptor_index = self.constants.get_utf8(descriptor)?;
        let exceptions = if exceptions.is_empty() {
            None
        } else {
            let classes = exceptions
                .iter()
                .map(|exception| self.constants.get_class_named(exception))
                .collect::<Result<Vec<_>, Error>>()?;
            Some(self.constants.get_attribute(Exceptions(classes))?)
        };

        self.current_method = Some(MethodWriter {
            method: Method {
                access_flags,
                name_index,
                descriptor_index,
                attributes: vec![],
            },
            exceptions,
            has_code: access_flags.has_code(),
            code: vec![],
            labels: HashMap::new(),
            fixups: vec![],
            line_numbers: vec![],
            handlers: vec![],
            max_stack: 0,
            max_locals: 0,
        });
        Ok(())
    }

    fn visit_insn(&mut self, opcode: Opcode) -> Result<(), Error> {
        let simple = matches!(
            opcode.0,
            0..=15 | 46..=53 | 79..=131 | 133..=152 | 172..=177 | 190 | 191 | 194 | 195
        );
        if !simple {
            return Err(Error::MalformedInput(format!(
                "{:?} is not an instruction without operands",
                opcode
            )));
        }
        let _ = self.instruction(opcode)?;
        Ok(())
    }

    fn visit_int_insn(&mut self, opcode: Opcode, operand: i32) -> Result<(), Error> {
        let out_of_range = || {
            Error::MalformedInput(format!("operand {} out of range for {:?}", operand, opcode))
        };
        match opcode {
            Opcode::BIPUSH => {
                let operand = i8::try_from(operand).map_err(|_| out_of_range())?;
                self.instruction(opcode)?.0.code.push(operand as u8);
            }
            Opcode::SIPUSH => {
                let operand = i16::try_from(operand).map_err(|_| out_of_range())?;
                self.instruction(opcode)?.0.push_u16(operand as u16);
            }
            Opcode::NEWARRAY => {
                let operand = u8::try_from(operand).map_err(|_| out_of_range())?;
                self.instruction(opcode)?.0.code.push(operand);
            }
            _ => return Err(out_of_range()),
        }
        Ok(())
    }

    fn visit_var_insn(&mut self, opcode: Opcode, slot: u16) -> Result<(), Error> {
        let short_base = match opcode {
            Opcode::ILOAD | Opcode::LLOAD | Opcode::FLOAD | Opcode::DLOAD | Opcode::ALOAD => {
                Some(Opcode::ILOAD_0.0 + 4 * (opcode.0 - Opcode::ILOAD.0))
            }
            Opcode::ISTORE | Opcode::LSTORE | Opcode::FSTORE | Opcode::DSTORE | Opcode::ASTORE => {
                Some(Opcode::ISTORE_0.0 + 4 * (opcode.0 - Opcode::ISTORE.0))
            }
            Opcode::RET => None,
            _ => {
                return Err(Error::MalformedInput(format!(
                    "{:?} is not a local variable instruction",
                    opcode
                )))
            }
        };

        match (short_base, u8::try_from(slot)) {
            (Some(base), _) if slot < 4 => {
                let _ = self.instruction(Opcode(base + slot as u8))?;
            }
            (_, Ok(slot)) => self.instruction(opcode)?.0.code.push(slot),
            (_, Err(_)) => {
                let (method, _) = self.instruction(Opcode::WIDE)?;
                method.code.push(opcode.0);
                method.push_u16(slot);
            }
        }
        Ok(())
    }

    fn visit_iinc_insn(&mut self, slot: u16, delta: i16) -> Result<(), Error> {
        match (u8::try_from(slot), i8::try_from(delta)) {
            (Ok(slot), Ok(delta)) => {
                let (method, _) = self.instruction(Opcode::IINC)?;
                method.code.push(slot);
                method.code.push(delta as u8);
            }
            _ => {
                let (method, _) = self.instruction(Opcode::WIDE)?;
                method.code.push(Opcode::IINC.0);
                method.push_u16(slot);
                method.push_u16(delta as u16);
            }
        }
        Ok(())
    }

    fn visit_field_insn(
        &mut self,
        opcode: Opcode,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        let class = self.constants.get_class_named(owner)?;
        let name_and_type = self.constants.get_name_and_type_of(name, descriptor)?;
        let field = self.constants.get_field_ref(class, name_and_type)?;
        self.instruction(opcode)?.0.push_index(field);
        Ok(())
    }

    fn visit_method_insn(
        &mut self,
        opcode: Opcode,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<(), Error> {
        let class = self.constants.get_class_named(owner)?;
        let name_and_type = self.constants.get_name_and_type_of(name, descriptor)?;
        let method_ref = self
            .constants
            .get_method_ref(class, name_and_type, is_interface)?;
        let (method, _) = self.instruction(opcode)?;
        method.push_index(method_ref);
        if opcode == Opcode::INVOKEINTERFACE {
            method.code.push(invoke_interface_count(descriptor)?);
            method.code.push(0);
        }
        Ok(())
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap: &Handle,
        arguments: &[ConstantValue],
    ) -> Result<(), Error> {
        let bootstrap_method = self.bootstrap_method(bootstrap, arguments)?;
        let name_and_type = self.constants.get_name_and_type_of(name, descriptor)?;
        let call_site = self
            .constants
            .get_invoke_dynamic(bootstrap_method, name_and_type)?;
        let (method, _) = self.instruction(Opcode::INVOKEDYNAMIC)?;
        method.push_index(call_site);
        method.push_u16(0);
        Ok(())
    }

    fn visit_type_insn(&mut self, opcode: Opcode, descriptor: &str) -> Result<(), Error> {
        let class = self.constants.get_class_named(descriptor)?;
        self.instruction(opcode)?.0.push_index(class);
        Ok(())
    }

    fn visit_ldc_insn(&mut self, value: &ConstantValue) -> Result<(), Error> {
        let index = self.constants.get_constant_value(value)?;
        if value.is_wide() {
            self.instruction(Opcode::LDC2_W)?.0.push_index(index);
        } else if let Ok(short_index) = u8::try_from(index.0) {
            self.instruction(Opcode::LDC)?.0.code.push(short_index);
        } else {
            self.instruction(Opcode::LDC_W)?.0.push_index(index);
        }
        Ok(())
    }

    fn visit_jump_insn(&mut self, opcode: Opcode, target: LabelToken) -> Result<(), Error> {
        let is_jump = matches!(opcode.0, 153..=168 | 198..=201);
        if !is_jump {
            return Err(Error::MalformedInput(format!("{:?} is not a jump", opcode)));
        }
        let (method, offset) = self.instruction(opcode)?;
        method.push_target(opcode, offset, target, opcode.is_wide_jump());
        Ok(())
    }

    fn visit_lookup_switch_insn(
        &mut self,
        default: LabelToken,
        keys: &[i32],
        targets: &[LabelToken],
    ) -> Result<(), Error> {
        if keys.len() != targets.len() {
            return Err(Error::MalformedInput(format!(
                "lookupswitch with {} keys but {} targets",
                keys.len(),
                targets.len()
            )));
        }
        let opcode = Opcode::LOOKUPSWITCH;
        let (method, offset) = self.instruction(opcode)?;
        method.push_switch_padding();
        method.push_target(opcode, offset, default, true);
        method.push_i32(keys.len() as i32);
        for (key, target) in keys.iter().zip(targets) {
            method.push_i32(*key);
            method.push_target(opcode, offset, *target, true);
        }
        Ok(())
    }

    fn visit_table_switch_insn(
        &mut self,
        min: i32,
        max: i32,
        default: LabelToken,
        targets: &[LabelToken],
    ) -> Result<(), Error> {
        if max < min || (max as i64 - min as i64 + 1) != targets.len() as i64 {
            return Err(Error::MalformedInput(format!(
                "tableswitch over [{}, {}] with {} targets",
                min,
                max,
                targets.len()
            )));
        }
        let opcode = Opcode::TABLESWITCH;
        let (method, offset) = self.instruction(opcode)?;
        method.push_switch_padding();
        method.push_target(opcode, offset, default, true);
        method.push_i32(min);
        method.push_i32(max);
        for target in targets {
            method.push_target(opcode, offset, *target, true);
        }
        Ok(())
    }

    fn visit_multi_anew_array_insn(
        &mut self,
        descriptor: &str,
        dimensions: u8,
    ) -> Result<(), Error> {
        let class = self.constants.get_class_named(descriptor)?;
        let (method, _) = self.instruction(Opcode::MULTIANEWARRAY)?;
        method.push_index(class);
        method.code.push(dimensions);
        Ok(())
    }

    fn visit_label(&mut self, label: LabelToken) -> Result<(), Error> {
        let method = self.method()?;
        let offset = method.code.len();
        if method.labels.insert(label, offset).is_some() {
            return Err(Error::MalformedInput(format!(
                "label {:?} placed more than once",
                label
            )));
        }
        Ok(())
    }

    fn visit_line_number(&mut self, line: u16, start: LabelToken) -> Result<(), Error> {
        self.method()?.line_numbers.push((line, start));
        Ok(())
    }

    fn visit_try_catch_block(
        &mut self,
        start: LabelToken,
        end: LabelToken,
        handler: LabelToken,
        exception: Option<&str>,
    ) -> Result<(), Error> {
        let catch_type = match exception {
            Some(exception) => self.constants.get_class_named(exception)?,
            None => ClassConstantIndex::NONE,
        };
        let method = self.method()?;
        method.has_code = true;
        method.handlers.push((start, end, handler, catch_type));
        Ok(())
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) -> Result<(), Error> {
        let method = self.method()?;
        method.has_code = true;
        method.max_stack = max_stack;
        method.max_locals = max_locals;
        Ok(())
    }

    fn visit_method_end(&mut self) -> Result<(), Error> {
        let method = self.current_method.take().ok_or_else(|| {
            Error::MalformedInput(String::from("method end without a method"))
        })?;
        let method = method.finish(&mut self.constants)?;
        self.methods.push(method);
        Ok(())
    }

    fn visit_end(&mut self) -> Result<(), Error> {
        let header = self.header.take().ok_or_else(|| {
            Error::MalformedInput(String::from("class ended without a header"))
        })?;

        let mut attributes = vec![];
        if let Some(source_file) = self.source_file.take() {
            attributes.push(source_file);
        }
        if !self.bootstrap_methods.is_empty() {
            let bootstrap_methods = BootstrapMethods(std::mem::take(&mut self.bootstrap_methods));
            attributes.push(self.constants.get_attribute(bootstrap_methods)?);
        }

        let class_file = ClassFile {
            version: header.version,
            constants: std::mem::take(&mut self.constants),
            access_flags: header.access_flags,
            this_class: header.this_class,
            super_class: header.super_class,
            interfaces: header.interfaces,
            fields: std::mem::take(&mut self.fields),
            methods: std::mem::take(&mut self.methods),
            attributes,
        };

        self.output = Some(serialize_to_vec(&class_file)?);
        Ok(())
    }
}
