use std::fmt;

/// Number of slots an element takes up in an [`OffsetVec`]
pub trait Width {
    fn width(&self) -> usize;
}

/// Slot position in an [`OffsetVec`]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Offset(pub usize);

/// Append-only vector addressed by slot rather than by position
///
/// Each element occupies as many slots as its [`Width`], so the slot of an element is the sum of
/// the widths before it (plus the starting slot). Constant pools work this way: slots start at 1,
/// and `long`/`double` entries take two.
#[derive(Clone)]
pub struct OffsetVec<T> {
    elements: Vec<T>,

    /// Slot of each element, increasing
    starts: Vec<Offset>,

    /// Slot the next pushed element gets
    next: Offset,
}

/// Outcome of looking up a slot
pub enum OffsetResult<'a, T> {
    /// Element starting at that slot, with its position
    Ok(usize, &'a T),

    /// Slot is the second half of the element at this position
    InvalidOffset(usize),

    /// Slot is past the last element (or before the first)
    TooLarge,
}

impl<'a, T> OffsetResult<'a, T> {
    pub fn ok(&self) -> Option<&'a T> {
        match self {
            OffsetResult::Ok(_, found) => Some(*found),
            _ => None,
        }
    }
}

impl<T: Width> OffsetVec<T> {
    pub fn new() -> OffsetVec<T> {
        OffsetVec::new_starting_at(Offset(0))
    }

    pub fn new_starting_at(first: Offset) -> OffsetVec<T> {
        OffsetVec {
            elements: vec![],
            starts: vec![],
            next: first,
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Slot the next pushed element would get
    pub fn offset_len(&self) -> Offset {
        self.next
    }

    /// Append an element, returning its slot
    pub fn push(&mut self, element: T) -> Offset {
        let start = self.next;
        self.next = Offset(start.0 + element.width());
        self.starts.push(start);
        self.elements.push(element);
        start
    }

    pub fn get_offset(&self, offset: Offset) -> OffsetResult<'_, T> {
        match self.starts.binary_search(&offset) {
            Ok(idx) => OffsetResult::Ok(idx, &self.elements[idx]),
            Err(0) => OffsetResult::TooLarge,
            Err(_) if offset >= self.next => OffsetResult::TooLarge,
            Err(after) => OffsetResult::InvalidOffset(after - 1),
        }
    }

    /// Elements in order, with their slot and position
    pub fn iter(&self) -> impl Iterator<Item = (Offset, usize, &T)> + '_ {
        self.starts
            .iter()
            .zip(&self.elements)
            .enumerate()
            .map(|(idx, (start, element))| (*start, idx, element))
    }
}

impl<T: Width> Default for OffsetVec<T> {
    fn default() -> Self {
        OffsetVec::new()
    }
}

impl<T: Width> Extend<T> for OffsetVec<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, elements: I) {
        for element in elements {
            self.push(element);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for OffsetVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.starts.iter().map(|start| start.0).zip(&self.elements))
            .finish()
    }
}
