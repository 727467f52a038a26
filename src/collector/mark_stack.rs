use crate::util::log;
use crate::util::ObjectReference;

/// A bounded stack of grey objects.  A full stack is not an error: callers fall back to the
/// overflow list or to restarting the bitmap iteration.
pub struct MarkStack {
    stack: Vec<ObjectReference>,
    capacity: usize,
    max_capacity: usize,
    /// Set when an expansion was needed but not possible, so the warning is printed once per
    /// cycle.
    hit_limit: bool,
}

impl MarkStack {
    pub fn new(capacity: usize, max_capacity: usize) -> Self {
        debug_assert!(capacity <= max_capacity);
        MarkStack {
            stack: Vec::with_capacity(capacity),
            capacity,
            max_capacity,
            hit_limit: false,
        }
    }

    /// Push `object`.  Returns false if the stack is full.
    #[must_use]
    pub fn push(&mut self, object: ObjectReference) -> bool {
        if self.stack.len() >= self.capacity {
            return false;
        }
        self.stack.push(object);
        true
    }

    pub fn pop(&mut self) -> Option<ObjectReference> {
        self.stack.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.stack.len() >= self.capacity
    }

    /// Drop every entry and return the lowest address among them.
    pub fn take_least_and_clear(&mut self) -> Option<ObjectReference> {
        let least = self.stack.iter().copied().min();
        self.stack.clear();
        least
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, ObjectReference> {
        self.stack.drain(..)
    }

    /// Double the capacity, up to the maximum.  Failing to grow is reported but not fatal.
    pub fn expand(&mut self) {
        if self.capacity >= self.max_capacity {
            if !self.hit_limit {
                self.hit_limit = true;
                log::warn!(
                    "Mark stack is at its maximum size of {} entries",
                    self.max_capacity
                );
            }
            return;
        }
        let new_capacity = (self.capacity * 2).min(self.max_capacity);
        match self
            .stack
            .try_reserve_exact(new_capacity - self.stack.len())
        {
            Ok(()) => {
                log::debug!(
                    "Expanded mark stack from {} to {} entries",
                    self.capacity,
                    new_capacity
                );
                self.capacity = new_capacity;
            }
            Err(e) => {
                self.hit_limit = true;
                log::warn!(
                    "Failed to expand mark stack from {} to {} entries: {}",
                    self.capacity,
                    new_capacity,
                    e
                );
            }
        }
    }

    /// Forget the limit warning at the end of a cycle.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.hit_limit = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Address;

    fn obj(i: usize) -> ObjectReference {
        ObjectReference::from_raw_address(Address::from_usize(0x1000 + i * 64))
    }

    #[test]
    fn bounded_push_and_expand() {
        let mut stack = MarkStack::new(2, 4);
        assert!(stack.push(obj(3)));
        assert!(stack.push(obj(1)));
        assert!(!stack.push(obj(2)));
        stack.expand();
        assert_eq!(stack.capacity(), 4);
        assert!(stack.push(obj(2)));
        assert!(stack.push(obj(4)));
        stack.expand();
        assert_eq!(stack.capacity(), 4);
        assert!(!stack.push(obj(5)));
        assert_eq!(stack.take_least_and_clear(), Some(obj(1)));
        assert!(stack.is_empty());
    }
}
