use crate::jvm::class_file::LabelToken;
use std::fmt;

/// Opaque label
///
/// Labels belong to the [`Code`](super::Code) that created them and are placed in its instruction
/// list with an [`Instruction::Label`](super::Instruction::Label) marker. The id is handed out
/// when the label is created (either while decoding or with
/// [`Code::new_label`](super::Code::new_label)) and never changes afterwards.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Label(pub(crate) u32);

impl Label {
    /// Display id of the label, unique within its code
    pub fn id(&self) -> u32 {
        self.0
    }

    /// Token standing for this label in codec events
    pub(crate) fn token(&self) -> LabelToken {
        LabelToken(self.0)
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("L{}", self.0))
    }
}
