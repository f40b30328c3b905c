use crate::jvm::class_file::Version;
use crate::jvm::{
    ClassAccessFlags, ConstantValue, Error, FieldAccessFlags, Handle, MethodAccessFlags, Opcode,
};
use std::fmt;

/// Opaque label handle exchanged through [`ClassVisitor`] events
///
/// Whoever produces events picks the tokens (the reader uses bytecode offsets, the model uses the
/// label's display id), and whoever consumes them only compares tokens for equality. A token is
/// only meaningful within the method it shows up in.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct LabelToken(pub u32);

impl fmt::Debug for LabelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Flat event protocol for the contents of a class
///
/// Events for one class always arrive in this order:
///
///   1. `visit_header`
///   2. at most one `visit_source`
///   3. for every field, `visit_field` then `visit_field_end`
///   4. for every method, `visit_method`, then (if the method has code) instruction, label, line
///      number, and try-catch events, then `visit_maxs`, and finally `visit_method_end`
///   5. `visit_end`
///
/// Instruction events use the normalized opcodes described on [`Opcode`]. A label token may be
/// referenced (by a jump, switch, line number or try-catch event) before the `visit_label` event
/// that places it.
pub trait ClassVisitor {
    fn visit_header(
        &mut self,
        version: Version,
        access_flags: ClassAccessFlags,
        name: &str,
        super_name: Option<&str>,
        interfaces: &[String],
    ) -> Result<(), Error>;

    fn visit_source(&mut self, source_file: &str) -> Result<(), Error>;

    fn visit_field(
        &mut self,
        access_flags: FieldAccessFlags,
        name: &str,
        descriptor: &str,
        value: Option<&ConstantValue>,
    ) -> Result<(), Error>;

    fn visit_field_end(&mut self) -> Result<(), Error>;

    fn visit_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        exceptions: &[String],
    ) -> Result<(), Error>;

    /// Instruction without operands
    fn visit_insn(&mut self, opcode: Opcode) -> Result<(), Error>;

    /// `bipush`, `sipush`, or `newarray`
    fn visit_int_insn(&mut self, opcode: Opcode, operand: i32) -> Result<(), Error>;

    /// Local variable load or store, or `ret`
    fn visit_var_insn(&mut self, opcode: Opcode, slot: u16) -> Result<(), Error>;

    fn visit_iinc_insn(&mut self, slot: u16, delta: i16) -> Result<(), Error>;

    fn visit_field_insn(
        &mut self,
        opcode: Opcode,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error>;

    fn visit_method_insn(
        &mut self,
        opcode: Opcode,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<(), Error>;

    fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap: &Handle,
        arguments: &[ConstantValue],
    ) -> Result<(), Error>;

    /// `new`, `anewarray`, `checkcast`, or `instanceof`
    fn visit_type_insn(&mut self, opcode: Opcode, descriptor: &str) -> Result<(), Error>;

    /// `ldc`, `ldc_w`, or `ldc2_w`
    fn visit_ldc_insn(&mut self, value: &ConstantValue) -> Result<(), Error>;

    fn visit_jump_insn(&mut self, opcode: Opcode, target: LabelToken) -> Result<(), Error>;

    /// `keys` and `targets` have the same length and are in file order
    fn visit_lookup_switch_insn(
        &mut self,
        default: LabelToken,
        keys: &[i32],
        targets: &[LabelToken],
    ) -> Result<(), Error>;

    /// `targets[i]` is the target for key `min + i`
    fn visit_table_switch_insn(
        &mut self,
        min: i32,
        max: i32,
        default: LabelToken,
        targets: &[LabelToken],
    ) -> Result<(), Error>;

    fn visit_multi_anew_array_insn(&mut self, descriptor: &str, dimensions: u8)
        -> Result<(), Error>;

    /// Place a label at the current position
    fn visit_label(&mut self, label: LabelToken) -> Result<(), Error>;

    fn visit_line_number(&mut self, line: u16, start: LabelToken) -> Result<(), Error>;

    /// A `None` exception type catches everything (as `finally` blocks do)
    fn visit_try_catch_block(
        &mut self,
        start: LabelToken,
        end: LabelToken,
        handler: LabelToken,
        exception: Option<&str>,
    ) -> Result<(), Error>;

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) -> Result<(), Error>;

    fn visit_method_end(&mut self) -> Result<(), Error>;

    fn visit_end(&mut self) -> Result<(), Error>;
}
