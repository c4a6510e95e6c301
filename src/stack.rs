use alloc::vec::Vec;

/// A last-in, first-out stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stack<T> {
    elements: Vec<T>,
}

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Stack<T> {
    #[inline]
    pub const fn new() -> Self {
        Self {
            elements: Vec::new(),
        }
    }

    #[inline]
    pub fn push(&mut self, element: T) {
        self.elements.push(element);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.elements.pop()
    }

    #[inline]
    pub fn top(&self) -> Option<&T> {
        self.elements.last()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Elements from the bottom of the stack to the top.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.elements
    }
}

impl<T> FromIterator<T> for Stack<T> {
    /// The last element of the iterator ends up on top.
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            elements: iter.into_iter().collect(),
        }
    }
}
