use crate::jvm::class_file::{
    AttributeLike, BootstrapMethods, ClassBuffer, ClassFile, ClassVisitor, CodeAttribute,
    ConstantIndex, ConstantValueAttribute, ConstantsTable, Exceptions, LabelToken,
    LineNumberTable, SourceFile, Version,
};
use crate::jvm::{
    ClassAccessFlags, ConstantValue, Error, FieldAccessFlags, MethodAccessFlags, Opcode,
};
use std::collections::{BTreeSet, HashMap};

/// Parses class file bytes and replays them as [`ClassVisitor`] events
///
/// Construction only validates the magic number and version and parses the constant pool, so
/// quick queries like [`ClassReader::name`] are cheap. Everything else is parsed while events are
/// being produced by [`ClassReader::accept`].
///
/// Stack map frames, debug tables other than line numbers, annotations, signatures, and unknown
/// attributes are skipped.
pub struct ClassReader<'a> {
    buffer: ClassBuffer<'a>,
    constants: ConstantsTable,

    /// Offset of the `access_flags` item, right after the constant pool
    header_start: usize,
}

/// Attribute found in a class, field, method, or code attribute table
struct AttributeSlice<'c> {
    name: &'c str,
    start: usize,
    len: usize,
}

/// Instruction decoded from the bytecode array, with branch targets still as bytecode offsets
enum RawInsn<'c> {
    Simple(Opcode),
    Int(Opcode, i32),
    Var(Opcode, u16),
    Increment(u16, i16),
    Field(Opcode, &'c str, &'c str, &'c str),
    Method(Opcode, &'c str, &'c str, &'c str, bool),
    InvokeDynamic(u16, &'c str, &'c str),
    Type(Opcode, &'c str),
    Ldc(ConstantIndex),
    Jump(Opcode, u32),
    LookupSwitch {
        default: u32,
        keys: Vec<i32>,
        targets: Vec<u32>,
    },
    TableSwitch {
        min: i32,
        max: i32,
        default: u32,
        targets: Vec<u32>,
    },
    MultiANewArray(&'c str, u8),
}

impl<'a> ClassReader<'a> {
    pub fn new(data: &'a [u8]) -> Result<ClassReader<'a>, Error> {
        let buffer = ClassBuffer::new(data);

        if buffer.read_u32(0)? != ClassFile::MAGIC {
            return Err(Error::MalformedInput(String::from("bad magic number")));
        }
        let _ = Version::parse(&buffer, 4)?;

        let (constants, header_start) = ConstantsTable::parse(&buffer, 8)?;
        log::trace!(
            "parsed constant pool of {} bytes",
            header_start.saturating_sub(8)
        );

        Ok(ClassReader {
            buffer,
            constants,
            header_start,
        })
    }

    pub fn version(&self) -> Result<Version, Error> {
        Version::parse(&self.buffer, 4)
    }

    pub fn access_flags(&self) -> Result<ClassAccessFlags, Error> {
        Ok(ClassAccessFlags::from_bits_truncate(
            self.buffer.read_u16(self.header_start)?,
        ))
    }

    /// Internal name of the class
    pub fn name(&self) -> Result<&str, Error> {
        let index = self.buffer.read_u16(self.header_start + 2)?;
        self.constants.class_name(ConstantIndex(index))
    }

    /// Internal name of the super class (only `java/lang/Object` and modules have none)
    pub fn super_name(&self) -> Result<Option<&str>, Error> {
        let index = self.buffer.read_u16(self.header_start + 4)?;
        self.constants.optional_class_name(ConstantIndex(index))
    }

    pub fn interfaces(&self) -> Result<Vec<String>, Error> {
        let count = self.buffer.read_u16(self.header_start + 6)? as usize;
        let mut interfaces = Vec::with_capacity(count);
        for i in 0..count {
            let index = self.buffer.read_u16(self.header_start + 8 + 2 * i)?;
            interfaces.push(self.constants.class_name(ConstantIndex(index))?.to_string());
        }
        Ok(interfaces)
    }

    /// Replay the whole class into a visitor
    pub fn accept<V: ClassVisitor + ?Sized>(&self, visitor: &mut V) -> Result<(), Error> {
        let interfaces = self.interfaces()?;
        let name = self.name()?;
        visitor.visit_header(
            self.version()?,
            self.access_flags()?,
            name,
            self.super_name()?,
            &interfaces,
        )?;

        // Class attributes come last in the file, but are needed upfront
        let fields_start = self.header_start + 8 + 2 * interfaces.len();
        let methods_start = self.skip_members(fields_start)?;
        let attributes_start = self.skip_members(methods_start)?;
        let (attributes, _) = self.attributes(attributes_start)?;

        let mut bootstrap_methods = vec![];
        for attribute in &attributes {
            if attribute.name == SourceFile::NAME {
                let index = self.buffer.read_u16(attribute.start)?;
                visitor.visit_source(self.constants.utf8(ConstantIndex(index))?)?;
            } else if attribute.name == BootstrapMethods::NAME {
                bootstrap_methods = self.bootstrap_methods(attribute.start)?;
            }
        }

        self.read_fields(fields_start, visitor)?;
        self.read_methods(methods_start, &bootstrap_methods, visitor)?;

        log::trace!("read class {}", name);
        visitor.visit_end()
    }

    /// Skip over a `fields` or `methods` table, returning the offset just past it
    fn skip_members(&self, offset: usize) -> Result<usize, Error> {
        let count = self.buffer.read_u16(offset)?;
        let mut position = offset + 2;
        for _ in 0..count {
            position = self.attributes(position + 6)?.1;
        }
        Ok(position)
    }

    /// Read an attribute table, returning the attributes and the offset just past the table
    fn attributes(&self, offset: usize) -> Result<(Vec<AttributeSlice<'_>>, usize), Error> {
        let count = self.buffer.read_u16(offset)?;
        let mut position = offset + 2;
        let mut attributes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = self
                .constants
                .utf8(ConstantIndex(self.buffer.read_u16(position)?))?;
            let len = self.buffer.read_u32(position + 2)? as usize;
            let start = position + 6;

            // Makes sure the whole attribute is really there
            let _ = self.buffer.read_bytes(start, len)?;
            attributes.push(AttributeSlice { name, start, len });
            position = start + len;
        }
        Ok((attributes, position))
    }

    fn bootstrap_methods(
        &self,
        offset: usize,
    ) -> Result<Vec<(ConstantIndex, Vec<ConstantIndex>)>, Error> {
        let count = self.buffer.read_u16(offset)?;
        let mut position = offset + 2;
        let mut methods = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let method = ConstantIndex(self.buffer.read_u16(position)?);
            let argument_count = self.buffer.read_u16(position + 2)? as usize;
            let mut arguments = Vec::with_capacity(argument_count);
            for i in 0..argument_count {
                arguments.push(ConstantIndex(self.buffer.read_u16(position + 4 + 2 * i)?));
            }
            position += 4 + 2 * argument_count;
            methods.push((method, arguments));
        }
        Ok(methods)
    }

    fn read_fields<V: ClassVisitor + ?Sized>(
        &self,
        offset: usize,
        visitor: &mut V,
    ) -> Result<(), Error> {
        let count = self.buffer.read_u16(offset)?;
        let mut position = offset + 2;
        for _ in 0..count {
            let access_flags = FieldAccessFlags::from_bits_truncate(self.buffer.read_u16(position)?);
            let name = self
                .constants
                .utf8(ConstantIndex(self.buffer.read_u16(position + 2)?))?;
            let descriptor = self
                .constants
                .utf8(ConstantIndex(self.buffer.read_u16(position + 4)?))?;
            let (attributes, end) = self.attributes(position + 6)?;

            let mut value: Option<ConstantValue> = None;
            for attribute in &attributes {
                if attribute.name == ConstantValueAttribute::NAME && value.is_none() {
                    let index = ConstantIndex(self.buffer.read_u16(attribute.start)?);
                    value = Some(self.constants.constant_value(index)?);
                }
            }

            visitor.visit_field(access_flags, name, descriptor, value.as_ref())?;
            visitor.visit_field_end()?;
            position = end;
        }
        Ok(())
    }

    fn read_methods<V: ClassVisitor + ?Sized>(
        &self,
        offset: usize,
        bootstrap_methods: &[(ConstantIndex, Vec<ConstantIndex>)],
        visitor: &mut V,
    ) -> Result<(), Error> {
        let count = self.buffer.read_u16(offset)?;
        let mut position = offset + 2;
        for _ in 0..count {
            let access_flags =
                MethodAccessFlags::from_bits_truncate(self.buffer.read_u16(position)?);
            let name = self
                .constants
                .utf8(ConstantIndex(self.buffer.read_u16(position + 2)?))?;
            let descriptor = self
                .constants
                .utf8(ConstantIndex(self.buffer.read_u16(position + 4)?))?;
            let (attributes, end) = self.attributes(position + 6)?;

            let mut code = None;
            let mut exceptions = vec![];
            for attribute in &attributes {
                if attribute.name == CodeAttribute::NAME && code.is_none() {
                    code = Some(attribute);
                } else if attribute.name == Exceptions::NAME {
                    let exception_count = self.buffer.read_u16(attribute.start)? as usize;
                    for i in 0..exception_count {
                        let index = self.buffer.read_u16(attribute.start + 2 + 2 * i)?;
                        exceptions.push(self.constants.class_name(ConstantIndex(index))?.to_string());
                    }
                }
            }

            visitor.visit_method(access_flags, name, descriptor, &exceptions)?;
            if let Some(code) = code {
                self.read_code(code, bootstrap_methods, visitor).map_err(|err| match err {
                    Error::MalformedInput(msg) => {
                        Error::MalformedInput(format!("in method {}{}: {}", name, descriptor, msg))
                    }
                    other => other,
                })?;
            }
            visitor.visit_method_end()?;
            position = end;
        }
        Ok(())
    }

    fn read_code<V: ClassVisitor + ?Sized>(
        &self,
        attribute: &AttributeSlice<'_>,
        bootstrap_methods: &[(ConstantIndex, Vec<ConstantIndex>)],
        visitor: &mut V,
    ) -> Result<(), Error> {
        let offset = attribute.start;
        let max_stack = self.buffer.read_u16(offset)?;
        let max_locals = self.buffer.read_u16(offset + 2)?;
        let code_length = self.buffer.read_u32(offset + 4)? as usize;
        let code_start = offset + 8;
        let code_end = code_start + code_length;
        if code_length > u16::MAX as usize || code_end > attribute.start + attribute.len {
            return Err(Error::MalformedInput(format!(
                "invalid code length {}",
                code_length
            )));
        }

        // Every offset something refers to gets a label
        let mut labels: BTreeSet<u32> = BTreeSet::new();

        let mut instructions: Vec<(u32, RawInsn<'_>)> = vec![];
        let mut pc = 0;
        while pc < code_length {
            let (insn, next_pc) = self.read_instruction(code_start, pc, code_length, &mut labels)?;
            instructions.push((pc as u32, insn));
            pc = next_pc;
        }
        if pc != code_length {
            return Err(Error::MalformedInput(String::from(
                "last instruction runs past the end of the code",
            )));
        }

        let handler_count = self.buffer.read_u16(code_end)? as usize;
        let mut handlers = Vec::with_capacity(handler_count);
        for i in 0..handler_count {
            let entry = code_end + 2 + 8 * i;
            let start = self.code_offset(self.buffer.read_u16(entry)? as i64, code_length)?;
            let end = self.code_offset(self.buffer.read_u16(entry + 2)? as i64, code_length)?;
            let handler = self.code_offset(self.buffer.read_u16(entry + 4)? as i64, code_length)?;
            let catch_type = ConstantIndex(self.buffer.read_u16(entry + 6)?);
            labels.extend([start, end, handler]);
            handlers.push((start, end, handler, catch_type));
        }

        // Line numbers, possibly spread over several tables
        let mut line_numbers: HashMap<u32, Vec<u16>> = HashMap::new();
        let (code_attributes, _) = self.attributes(code_end + 2 + 8 * handler_count)?;
        for code_attribute in &code_attributes {
            if code_attribute.name != LineNumberTable::NAME {
                continue;
            }
            let entry_count = self.buffer.read_u16(code_attribute.start)? as usize;
            for i in 0..entry_count {
                let entry = code_attribute.start + 2 + 4 * i;
                let start_pc =
                    self.code_offset(self.buffer.read_u16(entry)? as i64, code_length)?;
                let line = self.buffer.read_u16(entry + 2)?;
                let _ = labels.insert(start_pc);
                line_numbers.entry(start_pc).or_default().push(line);
            }
        }

        // Labels in the middle of an instruction could never be placed
        let starts: BTreeSet<u32> = instructions.iter().map(|(pc, _)| *pc).collect();
        if let Some(label) = labels
            .iter()
            .find(|label| !starts.contains(label) && **label as usize != code_length)
        {
            return Err(Error::MalformedInput(format!(
                "offset {} is not the start of an instruction",
                label
            )));
        }

        let place_label = |visitor: &mut V, pc: u32| -> Result<(), Error> {
            if labels.contains(&pc) {
                visitor.visit_label(LabelToken(pc))?;
                if let Some(lines) = line_numbers.get(&pc) {
                    for line in lines {
                        visitor.visit_line_number(*line, LabelToken(pc))?;
                    }
                }
            }
            Ok(())
        };

        for (pc, insn) in instructions {
            place_label(visitor, pc)?;
            self.emit_instruction(insn, bootstrap_methods, visitor)?;
        }
        place_label(visitor, code_length as u32)?;

        for (start, end, handler, catch_type) in handlers {
            let exception = self.constants.optional_class_name(catch_type)?;
            visitor.visit_try_catch_block(
                LabelToken(start),
                LabelToken(end),
                LabelToken(handler),
                exception,
            )?;
        }

        visitor.visit_maxs(max_stack, max_locals)
    }

    /// Check that a bytecode offset lands inside the code (or right at its end)
    fn code_offset(&self, offset: i64, code_length: usize) -> Result<u32, Error> {
        if (0..=code_length as i64).contains(&offset) {
            Ok(offset as u32)
        } else {
            Err(Error::MalformedInput(format!(
                "bytecode offset {} out of range",
                offset
            )))
        }
    }

    /// Decode the instruction at `pc`, returning it and the offset of the next instruction
    fn read_instruction(
        &self,
        code_start: usize,
        pc: usize,
        code_length: usize,
        labels: &mut BTreeSet<u32>,
    ) -> Result<(RawInsn<'_>, usize), Error> {
        let buffer = &self.buffer;
        let at = code_start + pc;
        let opcode = buffer.read_u8(at)?;

        let mut target = |relative: i64| -> Result<u32, Error> {
            let target = self.code_offset(pc as i64 + relative, code_length)?;
            let _ = labels.insert(target);
            Ok(target)
        };

        let decoded = match opcode {
            0..=15 | 46..=53 | 79..=131 | 133..=152 | 172..=177 | 190 | 191 | 194 | 195 => {
                (RawInsn::Simple(Opcode(opcode)), pc + 1)
            }
            16 => (
                RawInsn::Int(Opcode::BIPUSH, buffer.read_i8(at + 1)? as i32),
                pc + 2,
            ),
            17 => (
                RawInsn::Int(Opcode::SIPUSH, buffer.read_i16(at + 1)? as i32),
                pc + 3,
            ),
            18 => (
                RawInsn::Ldc(ConstantIndex(buffer.read_u8(at + 1)? as u16)),
                pc + 2,
            ),
            19 | 20 => (RawInsn::Ldc(ConstantIndex(buffer.read_u16(at + 1)?)), pc + 3),
            21..=25 | 54..=58 | 169 => (
                RawInsn::Var(Opcode(opcode), buffer.read_u8(at + 1)? as u16),
                pc + 2,
            ),
            26..=45 => {
                let base = Opcode::ILOAD.0 + (opcode - Opcode::ILOAD_0.0) / 4;
                let slot = (opcode - Opcode::ILOAD_0.0) % 4;
                (RawInsn::Var(Opcode(base), slot as u16), pc + 1)
            }
            59..=78 => {
                let base = Opcode::ISTORE.0 + (opcode - Opcode::ISTORE_0.0) / 4;
                let slot = (opcode - Opcode::ISTORE_0.0) % 4;
                (RawInsn::Var(Opcode(base), slot as u16), pc + 1)
            }
            132 => (
                RawInsn::Increment(
                    buffer.read_u8(at + 1)? as u16,
                    buffer.read_i8(at + 2)? as i16,
                ),
                pc + 3,
            ),
            153..=168 | 198 | 199 => {
                let relative = buffer.read_i16(at + 1)? as i64;
                (RawInsn::Jump(Opcode(opcode), target(relative)?), pc + 3)
            }
            200 | 201 => {
                let relative = buffer.read_i32(at + 1)? as i64;
                (RawInsn::Jump(Opcode(opcode), target(relative)?), pc + 5)
            }
            170 => {
                // Operands are aligned on 4 bytes relative to the start of the code
                let operands = pc + 1 + (3 - pc % 4);
                let default = target(buffer.read_i32(code_start + operands)? as i64)?;
                let min = buffer.read_i32(code_start + operands + 4)?;
                let max = buffer.read_i32(code_start + operands + 8)?;
                if max < min {
                    return Err(Error::MalformedInput(format!(
                        "tableswitch with low {} above high {}",
                        min, max
                    )));
                }
                let count = (max as i64 - min as i64 + 1) as usize;
                let mut targets = Vec::with_capacity(count.min(code_length));
                for i in 0..count {
                    let relative = buffer.read_i32(code_start + operands + 12 + 4 * i)?;
                    targets.push(target(relative as i64)?);
                }
                let insn = RawInsn::TableSwitch {
                    min,
                    max,
                    default,
                    targets,
                };
                (insn, operands + 12 + 4 * count)
            }
            171 => {
                let operands = pc + 1 + (3 - pc % 4);
                let default = target(buffer.read_i32(code_start + operands)? as i64)?;
                let pair_count = buffer.read_i32(code_start + operands + 4)?;
                if pair_count < 0 {
                    return Err(Error::MalformedInput(String::from(
                        "lookupswitch with negative pair count",
                    )));
                }
                let pair_count = pair_count as usize;
                let mut keys = Vec::with_capacity(pair_count.min(code_length));
                let mut targets = Vec::with_capacity(pair_count.min(code_length));
                for i in 0..pair_count {
                    let pair = code_start + operands + 8 + 8 * i;
                    keys.push(buffer.read_i32(pair)?);
                    targets.push(target(buffer.read_i32(pair + 4)? as i64)?);
                }
                let insn = RawInsn::LookupSwitch {
                    default,
                    keys,
                    targets,
                };
                (insn, operands + 8 + 8 * pair_count)
            }
            178..=181 => {
                let index = ConstantIndex(buffer.read_u16(at + 1)?);
                let (owner, name, descriptor, _) = self.constants.member_ref(index)?;
                (RawInsn::Field(Opcode(opcode), owner, name, descriptor), pc + 3)
            }
            182..=185 => {
                let index = ConstantIndex(buffer.read_u16(at + 1)?);
                let (owner, name, descriptor, is_interface) = self.constants.member_ref(index)?;
                let len = if opcode == Opcode::INVOKEINTERFACE.0 { 5 } else { 3 };
                let insn = RawInsn::Method(Opcode(opcode), owner, name, descriptor, is_interface);
                (insn, pc + len)
            }
            186 => {
                let index = ConstantIndex(buffer.read_u16(at + 1)?);
                let (bootstrap, name, descriptor) = self.constants.invoke_dynamic(index)?;
                (RawInsn::InvokeDynamic(bootstrap, name, descriptor), pc + 5)
            }
            187 | 189 | 192 | 193 => {
                let index = ConstantIndex(buffer.read_u16(at + 1)?);
                let descriptor = self.constants.class_name(index)?;
                (RawInsn::Type(Opcode(opcode), descriptor), pc + 3)
            }
            188 => (
                RawInsn::Int(Opcode::NEWARRAY, buffer.read_u8(at + 1)? as i32),
                pc + 2,
            ),
            196 => {
                let modified = buffer.read_u8(at + 1)?;
                let slot = buffer.read_u16(at + 2)?;
                match modified {
                    132 => (RawInsn::Increment(slot, buffer.read_i16(at + 4)?), pc + 6),
                    21..=25 | 54..=58 | 169 => (RawInsn::Var(Opcode(modified), slot), pc + 4),
                    other => {
                        return Err(Error::MalformedInput(format!(
                            "wide cannot modify {:?}",
                            Opcode(other)
                        )))
                    }
                }
            }
            197 => {
                let index = ConstantIndex(buffer.read_u16(at + 1)?);
                let descriptor = self.constants.class_name(index)?;
                let dimensions = buffer.read_u8(at + 3)?;
                (RawInsn::MultiANewArray(descriptor, dimensions), pc + 4)
            }
            other => {
                return Err(Error::MalformedInput(format!(
                    "invalid opcode {} at offset {}",
                    other, pc
                )))
            }
        };
        Ok(decoded)
    }

    fn emit_instruction<V: ClassVisitor + ?Sized>(
        &self,
        insn: RawInsn<'_>,
        bootstrap_methods: &[(ConstantIndex, Vec<ConstantIndex>)],
        visitor: &mut V,
    ) -> Result<(), Error> {
        match insn {
            RawInsn::Simple(opcode) => visitor.visit_insn(opcode),
            RawInsn::Int(opcode, operand) => visitor.visit_int_insn(opcode, operand),
            RawInsn::Var(opcode, slot) => visitor.visit_var_insn(opcode, slot),
            RawInsn::Increment(slot, delta) => visitor.visit_iinc_insn(slot, delta),
            RawInsn::Field(opcode, owner, name, descriptor) => {
                visitor.visit_field_insn(opcode, owner, name, descriptor)
            }
            RawInsn::Method(opcode, owner, name, descriptor, is_interface) => {
                visitor.visit_method_insn(opcode, owner, name, descriptor, is_interface)
            }
            RawInsn::InvokeDynamic(bootstrap, name, descriptor) => {
                let (method, arguments) =
                    bootstrap_methods.get(bootstrap as usize).ok_or_else(|| {
                        Error::MalformedInput(format!("missing bootstrap method {}", bootstrap))
                    })?;
                let handle = self.constants.handle(*method)?;
                let arguments = arguments
                    .iter()
                    .map(|argument| self.constants.constant_value(*argument))
                    .collect::<Result<Vec<_>, Error>>()?;
                visitor.visit_invoke_dynamic_insn(name, descriptor, &handle, &arguments)
            }
            RawInsn::Type(opcode, descriptor) => visitor.visit_type_insn(opcode, descriptor),
            RawInsn::Ldc(index) => visitor.visit_ldc_insn(&self.constants.constant_value(index)?),
            RawInsn::Jump(opcode, target) => visitor.visit_jump_insn(opcode, LabelToken(target)),
            RawInsn::LookupSwitch {
                default,
                keys,
                targets,
            } => {
                let targets: Vec<LabelToken> = targets.into_iter().map(LabelToken).collect();
                visitor.visit_lookup_switch_insn(LabelToken(default), &keys, &targets)
            }
            RawInsn::TableSwitch {
                min,
                max,
                default,
                targets,
            } => {
                let targets: Vec<LabelToken> = targets.into_iter().map(LabelToken).collect();
                visitor.visit_table_switch_insn(min, max, LabelToken(default), &targets)
            }
            RawInsn::MultiANewArray(descriptor, dimensions) => {
                visitor.visit_multi_anew_array_insn(descriptor, dimensions)
            }
        }
    }
}
