use super::{Instruction, Label, TryCatchBlock};
use crate::jvm::class_file::{ClassVisitor, LabelToken};
use crate::jvm::Error;
use once_cell::sync::OnceCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Source of the ids that stamp every `InsnId` with the code it belongs to
static NEXT_CODE_ID: AtomicU32 = AtomicU32::new(0);

/// Handle to an instruction node in a [`Code`]
///
/// Handles stay valid across any insertion or removal of other nodes. Once the node itself is
/// removed, the handle is rejected with [`Error::UnlinkedInstruction`] (even if the slot gets
/// reused), and so is a handle used with a different `Code` than the one that issued it.
#[derive(Copy, Clone, Hash, Eq, PartialEq)]
pub struct InsnId {
    code: u32,
    slot: u32,
    generation: u32,
}

impl fmt::Debug for InsnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "insn{}.{}@code{}", self.slot, self.generation, self.code)
    }
}

#[derive(Clone)]
struct Node {
    insn: Instruction,
    prev: Option<u32>,
    next: Option<u32>,
}

#[derive(Clone)]
struct Slot {
    /// Bumped every time the node in this slot is removed
    generation: u32,
    node: Option<Node>,
}

/// Position of every linked node, built in one pass over the list
struct IndexCache {
    order: Vec<InsnId>,

    /// Indexed by slot
    positions: Vec<Option<usize>>,
}

/// Body of a method: a doubly linked list of instructions plus the exception table
///
/// Nodes live in an arena owned by the code and are addressed with [`InsnId`] handles, so
/// appending, prepending, splicing, and removing are all constant time. Positional access
/// ([`Code::get`] and [`Code::index_of`]) goes through an index that is rebuilt lazily after the
/// list changes.
///
/// Labels are created by the code, either for a token coming from the decoder
/// ([`Code::resolve_label`]) or fresh ([`Code::new_label`]), and get consecutive ids.
pub struct Code {
    id: u32,
    slots: Vec<Slot>,
    free: Vec<u32>,
    first: Option<u32>,
    last: Option<u32>,
    size: usize,

    /// Labels resolved from decoder tokens
    labels: HashMap<LabelToken, Label>,
    label_count: u32,

    try_catch_blocks: Vec<TryCatchBlock>,

    /// Stored as decoded, never recomputed
    pub max_stack: u16,
    pub max_locals: u16,

    index_cache: OnceCell<IndexCache>,
}

impl Default for Code {
    fn default() -> Code {
        Code::new()
    }
}

impl Code {
    pub fn new() -> Code {
        Code {
            id: NEXT_CODE_ID.fetch_add(1, Ordering::Relaxed),
            slots: vec![],
            free: vec![],
            first: None,
            last: None,
            size: 0,
            labels: HashMap::new(),
            label_count: 0,
            try_catch_blocks: vec![],
            max_stack: 0,
            max_locals: 0,
            index_cache: OnceCell::new(),
        }
    }

    /// Number of instructions (pseudo-instructions included)
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn first(&self) -> Option<InsnId> {
        self.first.map(|slot| self.handle(slot))
    }

    pub fn last(&self) -> Option<InsnId> {
        self.last.map(|slot| self.handle(slot))
    }

    fn handle(&self, slot: u32) -> InsnId {
        InsnId {
            code: self.id,
            slot,
            generation: self.slots[slot as usize].generation,
        }
    }

    fn node(&self, slot: u32) -> Option<&Node> {
        self.slots.get(slot as usize)?.node.as_ref()
    }

    fn node_mut(&mut self, slot: u32) -> Option<&mut Node> {
        self.slots.get_mut(slot as usize)?.node.as_mut()
    }

    /// Slot of a node currently linked into this code
    fn linked_slot(&self, id: InsnId) -> Result<u32, Error> {
        match self.slots.get(id.slot as usize) {
            Some(slot)
                if id.code == self.id && slot.generation == id.generation && slot.node.is_some() =>
            {
                Ok(id.slot)
            }
            _ => Err(Error::UnlinkedInstruction(id)),
        }
    }

    fn allocate(&mut self, node: Node) -> u32 {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize].node = Some(node);
                slot
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                (self.slots.len() - 1) as u32
            }
        }
    }

    fn set_next(&mut self, slot: Option<u32>, next: Option<u32>) {
        match slot.and_then(|slot| self.node_mut(slot)) {
            Some(node) => node.next = next,
            None => self.first = next,
        }
    }

    fn set_prev(&mut self, slot: Option<u32>, prev: Option<u32>) {
        match slot.and_then(|slot| self.node_mut(slot)) {
            Some(node) => node.prev = prev,
            None => self.last = prev,
        }
    }

    /// Link a new node between `prev` and `next` (which must be adjacent)
    fn link(&mut self, insn: Instruction, prev: Option<u32>, next: Option<u32>) -> InsnId {
        let slot = self.allocate(Node { insn, prev, next });
        self.set_next(prev, Some(slot));
        self.set_prev(next, Some(slot));
        self.size += 1;
        let _ = self.index_cache.take();
        self.handle(slot)
    }

    /// Add an instruction at the end
    pub fn append(&mut self, insn: Instruction) -> InsnId {
        self.link(insn, self.last, None)
    }

    /// Add an instruction at the start
    pub fn prepend(&mut self, insn: Instruction) -> InsnId {
        self.link(insn, None, self.first)
    }

    /// Add an instruction right before `anchor`
    pub fn insert_before(&mut self, anchor: InsnId, insn: Instruction) -> Result<InsnId, Error> {
        let anchor = self.linked_slot(anchor)?;
        let prev = self.node(anchor).and_then(|node| node.prev);
        Ok(self.link(insn, prev, Some(anchor)))
    }

    /// Add an instruction right after `anchor`
    pub fn insert_after(&mut self, anchor: InsnId, insn: Instruction) -> Result<InsnId, Error> {
        let anchor = self.linked_slot(anchor)?;
        let next = self.node(anchor).and_then(|node| node.next);
        Ok(self.link(insn, Some(anchor), next))
    }

    /// Unlink an instruction, returning it
    ///
    /// The handle (and any copy of it) is invalid afterwards.
    pub fn remove(&mut self, id: InsnId) -> Result<Instruction, Error> {
        let slot = self.linked_slot(id)?;
        let entry = &mut self.slots[slot as usize];
        let node = entry.node.take().ok_or(Error::UnlinkedInstruction(id))?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(slot);

        self.set_next(node.prev, node.next);
        self.set_prev(node.next, node.prev);
        self.size -= 1;
        let _ = self.index_cache.take();
        Ok(node.insn)
    }

    pub fn instruction(&self, id: InsnId) -> Result<&Instruction, Error> {
        let slot = self.linked_slot(id)?;
        self.node(slot)
            .map(|node| &node.insn)
            .ok_or(Error::UnlinkedInstruction(id))
    }

    /// Mutable access to an instruction (its position in the list doesn't change)
    pub fn instruction_mut(&mut self, id: InsnId) -> Result<&mut Instruction, Error> {
        let slot = self.linked_slot(id)?;
        self.node_mut(slot)
            .map(|node| &mut node.insn)
            .ok_or(Error::UnlinkedInstruction(id))
    }

    /// Instruction following `id`, if any
    pub fn next(&self, id: InsnId) -> Result<Option<InsnId>, Error> {
        let slot = self.linked_slot(id)?;
        Ok(self
            .node(slot)
            .and_then(|node| node.next)
            .map(|next| self.handle(next)))
    }

    /// Instruction preceding `id`, if any
    pub fn prev(&self, id: InsnId) -> Result<Option<InsnId>, Error> {
        let slot = self.linked_slot(id)?;
        Ok(self
            .node(slot)
            .and_then(|node| node.prev)
            .map(|prev| self.handle(prev)))
    }

    fn index_cache(&self) -> &IndexCache {
        self.index_cache.get_or_init(|| {
            log::trace!("rebuilding instruction index of {} nodes", self.size);
            let mut order = Vec::with_capacity(self.size);
            let mut positions = vec![None; self.slots.len()];
            for (id, _) in self.iter() {
                positions[id.slot as usize] = Some(order.len());
                order.push(id);
            }
            IndexCache { order, positions }
        })
    }

    /// 0-based position of an instruction
    pub fn index_of(&self, id: InsnId) -> Result<usize, Error> {
        let slot = self.linked_slot(id)?;
        self.index_cache().positions[slot as usize].ok_or(Error::UnlinkedInstruction(id))
    }

    /// Instruction at a 0-based position
    pub fn get(&self, index: usize) -> Result<InsnId, Error> {
        self.index_cache()
            .order
            .get(index)
            .copied()
            .ok_or(Error::IndexOutOfRange {
                index,
                size: self.size,
            })
    }

    /// Whether `id` is linked into this code (walks the list)
    pub fn contains(&self, id: InsnId) -> bool {
        self.iter().any(|(linked, _)| linked == id)
    }

    /// Instructions in order, with their handles
    pub fn iter(&self) -> CodeIter<'_> {
        CodeIter {
            code: self,
            next: self.first,
            remaining: self.size,
        }
    }

    /// Label for a decoder token, created on first sight
    ///
    /// Tokens may be resolved before their marker is added (forward branches).
    pub fn resolve_label(&mut self, token: LabelToken) -> Label {
        if let Some(label) = self.labels.get(&token) {
            return *label;
        }
        let label = self.new_label();
        self.labels.insert(token, label);
        label
    }

    /// Fresh label, not placed anywhere yet
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.label_count);
        self.label_count += 1;
        label
    }

    /// Marker instruction placing `label`, if there is one
    pub fn marker_of(&self, label: Label) -> Option<InsnId> {
        self.iter()
            .find(|(_, insn)| matches!(insn, Instruction::Label(placed) if *placed == label))
            .map(|(id, _)| id)
    }

    pub fn try_catch_blocks(&self) -> &[TryCatchBlock] {
        &self.try_catch_blocks
    }

    pub fn try_catch_blocks_mut(&mut self) -> &mut Vec<TryCatchBlock> {
        &mut self.try_catch_blocks
    }

    pub fn add_try_catch_block(&mut self, block: TryCatchBlock) {
        self.try_catch_blocks.push(block);
    }

    /// Check every label referenced by an instruction or the exception table has a marker
    pub fn check_labels(&self) -> Result<(), Error> {
        let placed: HashSet<Label> = self
            .iter()
            .filter_map(|(_, insn)| match insn {
                Instruction::Label(label) => Some(*label),
                _ => None,
            })
            .collect();

        let referenced = self
            .iter()
            .flat_map(|(_, insn)| insn.labels())
            .chain(self.try_catch_blocks.iter().flat_map(|block| block.labels()));
        for label in referenced {
            if !placed.contains(&label) {
                return Err(Error::MalformedInput(format!(
                    "label {:?} is referenced but never placed",
                    label
                )));
            }
        }
        Ok(())
    }

    /// Replay the code: every instruction in order, then the exception table, then the maxs
    pub fn accept<V: ClassVisitor + ?Sized>(&self, visitor: &mut V) -> Result<(), Error> {
        self.check_labels()?;
        for (_, insn) in self.iter() {
            insn.accept(visitor)?;
        }
        for block in &self.try_catch_blocks {
            visitor.visit_try_catch_block(
                block.start.token(),
                block.end.token(),
                block.handler.token(),
                block.exception.as_deref(),
            )?;
        }
        visitor.visit_maxs(self.max_stack, self.max_locals)
    }
}

/// Copies get their own identity: handles issued by the original are rejected by the copy
impl Clone for Code {
    fn clone(&self) -> Code {
        Code {
            id: NEXT_CODE_ID.fetch_add(1, Ordering::Relaxed),
            slots: self.slots.clone(),
            free: self.free.clone(),
            first: self.first,
            last: self.last,
            size: self.size,
            labels: self.labels.clone(),
            label_count: self.label_count,
            try_catch_blocks: self.try_catch_blocks.clone(),
            max_stack: self.max_stack,
            max_locals: self.max_locals,
            index_cache: OnceCell::new(),
        }
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Code")
            .field("max_stack", &self.max_stack)
            .field("max_locals", &self.max_locals)
            .field(
                "instructions",
                &self.iter().map(|(_, insn)| insn).collect::<Vec<_>>(),
            )
            .field("try_catch_blocks", &self.try_catch_blocks)
            .finish()
    }
}

/// Iterator over the instructions of a [`Code`], in list order
pub struct CodeIter<'a> {
    code: &'a Code,
    next: Option<u32>,
    remaining: usize,
}

impl<'a> Iterator for CodeIter<'a> {
    type Item = (InsnId, &'a Instruction);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.next?;
        let node = self.code.node(slot)?;
        self.next = node.next;
        self.remaining = self.remaining.saturating_sub(1);
        Some((self.code.handle(slot), &node.insn))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a> IntoIterator for &'a Code {
    type Item = (InsnId, &'a Instruction);
    type IntoIter = CodeIter<'a>;

    fn into_iter(self) -> CodeIter<'a> {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::Opcode;

    fn simple(opcode: Opcode) -> Instruction {
        Instruction::Simple(opcode)
    }

    /// Walk both directions and check they agree with `len`
    fn assert_well_linked(code: &Code) {
        let forward: Vec<InsnId> = code.iter().map(|(id, _)| id).collect();
        let mut backward = vec![];
        let mut cursor = code.last();
        while let Some(id) = cursor {
            backward.push(id);
            cursor = code.prev(id).unwrap();
        }
        backward.reverse();

        assert_eq!(forward.len(), code.len());
        assert_eq!(forward, backward);
        assert_eq!(code.first().is_none(), code.is_empty());
        assert_eq!(code.last().is_none(), code.is_empty());
    }

    fn opcodes(code: &Code) -> Vec<Option<Opcode>> {
        code.iter().map(|(_, insn)| insn.opcode()).collect()
    }

    #[test]
    fn append_and_prepend() {
        let mut code = Code::new();
        let b = code.append(simple(Opcode::ICONST_1));
        let c = code.append(simple(Opcode::IRETURN));
        let a = code.prepend(simple(Opcode::NOP));

        assert_well_linked(&code);
        assert_eq!(code.first(), Some(a));
        assert_eq!(code.last(), Some(c));
        assert_eq!(code.next(a).unwrap(), Some(b));
        assert_eq!(code.prev(a).unwrap(), None);
        assert_eq!(code.index_of(c).unwrap(), 2);
    }

    #[test]
    fn remove_middle_head_and_tail() {
        let mut code = Code::new();
        let ids: Vec<InsnId> = [Opcode::NOP, Opcode::ICONST_0, Opcode::POP, Opcode::RETURN]
            .iter()
            .map(|opcode| code.append(simple(*opcode)))
            .collect();

        assert_eq!(code.remove(ids[1]).unwrap(), simple(Opcode::ICONST_0));
        assert_well_linked(&code);
        assert_eq!(code.next(ids[0]).unwrap(), Some(ids[2]));

        code.remove(ids[0]).unwrap();
        code.remove(ids[3]).unwrap();
        assert_well_linked(&code);
        assert_eq!(code.first(), Some(ids[2]));
        assert_eq!(code.last(), Some(ids[2]));

        code.remove(ids[2]).unwrap();
        assert_well_linked(&code);
        assert!(code.is_empty());
    }

    #[test]
    fn removed_handles_are_rejected() {
        let mut code = Code::new();
        let removed = code.append(simple(Opcode::NOP));
        code.remove(removed).unwrap();

        // The slot gets reused, but the old handle must not alias the new node
        let reused = code.append(simple(Opcode::RETURN));
        assert_ne!(removed, reused);

        assert!(matches!(code.remove(removed), Err(Error::UnlinkedInstruction(_))));
        assert!(matches!(code.index_of(removed), Err(Error::UnlinkedInstruction(_))));
        assert!(matches!(
            code.insert_after(removed, simple(Opcode::NOP)),
            Err(Error::UnlinkedInstruction(_))
        ));
        assert!(!code.contains(removed));
        assert!(code.contains(reused));
        assert_eq!(code.len(), 1);
    }

    #[test]
    fn handles_from_another_code_are_rejected() {
        let mut code = Code::new();
        let mut other = Code::new();
        let _ = code.append(simple(Opcode::NOP));
        let foreign = other.append(simple(Opcode::NOP));

        assert!(!code.contains(foreign));
        assert!(matches!(code.remove(foreign), Err(Error::UnlinkedInstruction(_))));
        assert_eq!(code.len(), 1);
    }

    #[test]
    fn splice_before_and_after() {
        let mut code = Code::new();
        let first = code.append(simple(Opcode::ICONST_0));
        let last = code.append(simple(Opcode::IRETURN));
        code.insert_after(first, simple(Opcode::ICONST_1)).unwrap();
        code.insert_before(first, simple(Opcode::NOP)).unwrap();
        code.insert_after(last, simple(Opcode::NOP)).unwrap();

        assert_well_linked(&code);
        assert_eq!(
            opcodes(&code),
            vec![
                Some(Opcode::NOP),
                Some(Opcode::ICONST_0),
                Some(Opcode::ICONST_1),
                Some(Opcode::IRETURN),
                Some(Opcode::NOP),
            ]
        );
    }

    #[test]
    fn positional_access_tracks_mutations() {
        let mut code = Code::new();
        let a = code.append(simple(Opcode::NOP));
        let b = code.append(simple(Opcode::POP));
        assert_eq!(code.get(1).unwrap(), b);

        let c = code.prepend(simple(Opcode::DUP));
        assert_eq!(code.get(0).unwrap(), c);
        assert_eq!(code.index_of(a).unwrap(), 1);
        assert_eq!(code.index_of(b).unwrap(), 2);

        code.remove(a).unwrap();
        assert_eq!(code.index_of(b).unwrap(), 1);
        for i in 0..code.len() {
            assert_eq!(code.index_of(code.get(i).unwrap()).unwrap(), i);
        }
        assert!(matches!(
            code.get(2),
            Err(Error::IndexOutOfRange { index: 2, size: 2 })
        ));
    }

    #[test]
    fn labels_resolve_once_per_token() {
        let mut code = Code::new();
        let forward = code.resolve_label(LabelToken(12));
        let other = code.resolve_label(LabelToken(4));
        assert_eq!(code.resolve_label(LabelToken(12)), forward);
        assert_ne!(forward, other);
        assert_eq!((forward.id(), other.id()), (0, 1));
        assert_eq!(code.new_label().id(), 2);
    }

    #[test]
    fn moving_a_marker_keeps_the_label() {
        let mut code = Code::new();
        let label = code.new_label();
        let jump = code.append(Instruction::Jump {
            opcode: Opcode::GOTO,
            target: label,
        });
        let marker = code.append(Instruction::Label(label));
        let _ = code.append(simple(Opcode::RETURN));

        let moved = code.remove(marker).unwrap();
        let marker = code.insert_before(jump, moved).unwrap();

        assert_eq!(code.marker_of(label), Some(marker));
        assert_eq!(
            code.instruction(jump).unwrap(),
            &Instruction::Jump {
                opcode: Opcode::GOTO,
                target: label
            }
        );
        assert!(code.check_labels().is_ok());
    }

    #[test]
    fn unplaced_labels_fail_the_check() {
        let mut code = Code::new();
        let handler = code.new_label();
        let start = code.new_label();
        let _ = code.append(Instruction::Label(start));
        let _ = code.append(simple(Opcode::RETURN));
        code.add_try_catch_block(TryCatchBlock {
            start,
            end: start,
            handler,
            exception: None,
        });

        assert!(matches!(code.check_labels(), Err(Error::MalformedInput(_))));
    }

    #[test]
    fn clones_are_independent() {
        let mut code = Code::new();
        let id = code.append(simple(Opcode::NOP));
        let mut copy = code.clone();

        assert!(copy.remove(id).is_err());
        let first = copy.first().unwrap();
        copy.remove(first).unwrap();
        assert_eq!((code.len(), copy.len()), (1, 0));
    }
}
