use super::Label;

/// Entry in the exception table of a method
///
/// Exceptions thrown by instructions between the `start` (inclusive) and `end` (exclusive) labels
/// are caught if they are instances of `exception`, and control then moves to `handler`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TryCatchBlock {
    pub start: Label,
    pub end: Label,
    pub handler: Label,

    /// Internal name of the caught class, or `None` to catch everything
    pub exception: Option<String>,
}

impl TryCatchBlock {
    pub fn labels(&self) -> [Label; 3] {
        [self.start, self.end, self.handler]
    }
}
