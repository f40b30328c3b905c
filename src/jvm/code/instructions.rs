//! Instructions of a method body
//!
//! The representation follows the shapes of the codec events rather than the raw bytecode:
//!
//!   - short forms (`iload_0`, `astore_3`, ...) and `wide` are folded into the general form, so a
//!     local variable access is always a [`Instruction::LocalVar`] carrying its slot
//!
//!   - `ldc`, `ldc_w`, and `ldc2_w` are all [`Instruction::Ldc`]
//!
//!   - labels and line numbers are pseudo-instructions sitting in the list at the position they
//!     mark, so moving a marker retargets every branch to it
//!

use super::Label;
use crate::jvm::class_file::ClassVisitor;
use crate::jvm::{ConstantValue, Error, Handle, Opcode};

#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    /// Instruction without operands (`nop`, arithmetic, array accesses, returns, `athrow`, ...)
    Simple(Opcode),

    /// `bipush`, `sipush`, or `newarray` (whose operand is the array type code)
    Int { opcode: Opcode, operand: i32 },

    /// Load from or store to a local variable (or `ret`)
    LocalVar { opcode: Opcode, slot: u16 },

    /// `iinc` (covers `wide iinc`)
    Increment { slot: u16, delta: i16 },

    /// `getstatic`, `putstatic`, `getfield`, or `putfield`
    Field {
        opcode: Opcode,
        owner: String,
        name: String,
        descriptor: String,
    },

    /// `invokevirtual`, `invokespecial`, `invokestatic`, or `invokeinterface`
    Method {
        opcode: Opcode,
        owner: String,
        name: String,
        descriptor: String,

        /// Whether `owner` is an interface
        is_interface: bool,
    },

    InvokeDynamic {
        name: String,
        descriptor: String,
        bootstrap: Handle,
        arguments: Vec<ConstantValue>,
    },

    /// `new`, `anewarray`, `checkcast`, or `instanceof`
    ///
    /// The operand is an internal name, or a descriptor for array types.
    Type { opcode: Opcode, descriptor: String },

    Ldc(ConstantValue),

    /// Conditional or unconditional branch (`if*`, `goto`, `goto_w`, `jsr`, `jsr_w`)
    Jump { opcode: Opcode, target: Label },

    /// `keys[i]` jumps to `targets[i]`
    ///
    /// The order of keys is kept exactly as decoded (even if it isn't sorted).
    LookupSwitch {
        default: Label,
        keys: Vec<i32>,
        targets: Vec<Label>,
    },

    /// Key `k` in `[min, max]` jumps to `targets[k - min]`
    TableSwitch {
        min: i32,
        max: i32,
        default: Label,
        targets: Vec<Label>,
    },

    MultiANewArray { descriptor: String, dimensions: u8 },

    /// Marks the position of a label
    Label(Label),

    /// Source line of the instructions starting at `start`
    LineNumber { line: u16, start: Label },
}

impl Instruction {
    /// Opcode of the instruction (`None` for labels and line numbers)
    ///
    /// For `Ldc`, this is `ldc2_w` or `ldc`: whether `ldc` gets widened to `ldc_w` depends on
    /// where the constant ends up in the pool.
    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            Instruction::Simple(opcode)
            | Instruction::Int { opcode, .. }
            | Instruction::LocalVar { opcode, .. }
            | Instruction::Field { opcode, .. }
            | Instruction::Method { opcode, .. }
            | Instruction::Type { opcode, .. }
            | Instruction::Jump { opcode, .. } => Some(*opcode),
            Instruction::Increment { .. } => Some(Opcode::IINC),
            Instruction::InvokeDynamic { .. } => Some(Opcode::INVOKEDYNAMIC),
            Instruction::Ldc(value) if value.is_wide() => Some(Opcode::LDC2_W),
            Instruction::Ldc(_) => Some(Opcode::LDC),
            Instruction::LookupSwitch { .. } => Some(Opcode::LOOKUPSWITCH),
            Instruction::TableSwitch { .. } => Some(Opcode::TABLESWITCH),
            Instruction::MultiANewArray { .. } => Some(Opcode::MULTIANEWARRAY),
            Instruction::Label(_) | Instruction::LineNumber { .. } => None,
        }
    }

    /// Labels and line numbers don't turn into bytecode
    pub fn is_pseudo(&self) -> bool {
        self.opcode().is_none()
    }

    /// Labels this instruction refers to (for a [`Instruction::Label`], the label it places)
    pub fn labels(&self) -> Vec<Label> {
        match self {
            Instruction::Jump { target, .. } => vec![*target],
            Instruction::LookupSwitch {
                default, targets, ..
            }
            | Instruction::TableSwitch {
                default, targets, ..
            } => {
                let mut labels = Vec::with_capacity(targets.len() + 1);
                labels.push(*default);
                labels.extend(targets.iter().copied());
                labels
            }
            Instruction::Label(label) => vec![*label],
            Instruction::LineNumber { start, .. } => vec![*start],
            _ => vec![],
        }
    }

    /// Replay the instruction as one event
    pub fn accept<V: ClassVisitor + ?Sized>(&self, visitor: &mut V) -> Result<(), Error> {
        match self {
            Instruction::Simple(opcode) => visitor.visit_insn(*opcode),
            Instruction::Int { opcode, operand } => visitor.visit_int_insn(*opcode, *operand),
            Instruction::LocalVar { opcode, slot } => visitor.visit_var_insn(*opcode, *slot),
            Instruction::Increment { slot, delta } => visitor.visit_iinc_insn(*slot, *delta),
            Instruction::Field {
                opcode,
                owner,
                name,
                descriptor,
            } => visitor.visit_field_insn(*opcode, owner, name, descriptor),
            Instruction::Method {
                opcode,
                owner,
                name,
                descriptor,
                is_interface,
            } => visitor.visit_method_insn(*opcode, owner, name, descriptor, *is_interface),
            Instruction::InvokeDynamic {
                name,
                descriptor,
                bootstrap,
                arguments,
            } => visitor.visit_invoke_dynamic_insn(name, descriptor, bootstrap, arguments),
            Instruction::Type { opcode, descriptor } => visitor.visit_type_insn(*opcode, descriptor),
            Instruction::Ldc(value) => visitor.visit_ldc_insn(value),
            Instruction::Jump { opcode, target } => visitor.visit_jump_insn(*opcode, target.token()),
            Instruction::LookupSwitch {
                default,
                keys,
                targets,
            } => {
                let targets: Vec<_> = targets.iter().map(Label::token).collect();
                visitor.visit_lookup_switch_insn(default.token(), keys, &targets)
            }
            Instruction::TableSwitch {
                min,
                max,
                default,
                targets,
            } => {
                let targets: Vec<_> = targets.iter().map(Label::token).collect();
                visitor.visit_table_switch_insn(*min, *max, default.token(), &targets)
            }
            Instruction::MultiANewArray {
                descriptor,
                dimensions,
            } => visitor.visit_multi_anew_array_insn(descriptor, *dimensions),
            Instruction::Label(label) => visitor.visit_label(label.token()),
            Instruction::LineNumber { line, start } => {
                visitor.visit_line_number(*line, start.token())
            }
        }
    }
}
