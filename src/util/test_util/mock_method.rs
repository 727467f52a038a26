//! A replaceable implementation of one runtime collaborator method.
//!
//! [`MockVM`](super::mock_vm::MockVM) holds one `MockMethod` per method of the runtime traits.
//! A test overrides the methods it cares about and can afterwards ask how often each was called.

/// The closure behind a mocked method.  `I` is the argument tuple and `R` the return type.
pub type MockClosureSignature<I, R> = Box<dyn Fn(I) -> R + Send + Sync>;

pub struct MockMethod<I, R> {
    closures: Vec<MockClosureSignature<I, R>>,
    call_count: usize,
}

impl<I, R> Default for MockMethod<I, R> {
    fn default() -> Self {
        Self::new_unimplemented()
    }
}

impl<I, R> MockMethod<I, R> {
    /// Panics when called.
    pub fn new_unimplemented() -> Self {
        Self::new_fixed(Box::new(|_| unimplemented!()))
    }

    /// Returns `R::default()`.
    pub fn new_default() -> Self
    where
        R: Default,
    {
        Self::new_fixed(Box::new(|_| R::default()))
    }

    /// Runs `closure` on every call.
    pub fn new_fixed(closure: MockClosureSignature<I, R>) -> Self {
        Self::new_sequence(vec![closure])
    }

    /// Runs the closures in turn, starting over after the last one.
    pub fn new_sequence(closures: Vec<MockClosureSignature<I, R>>) -> Self {
        assert!(!closures.is_empty(), "a mock method needs a closure");
        Self {
            closures,
            call_count: 0,
        }
    }

    pub fn call(&mut self, args: I) -> R {
        let closure = &self.closures[self.call_count % self.closures.len()];
        self.call_count += 1;
        closure(args)
    }

    pub fn is_called(&self) -> bool {
        self.call_count > 0
    }

    pub fn call_count(&self) -> usize {
        self.call_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed() {
        let mut young_used = MockMethod::new_fixed(Box::new(|()| 4096usize));
        assert!(!young_used.is_called());
        assert_eq!(young_used.call(()), 4096);
        assert_eq!(young_used.call(()), 4096);
        assert_eq!(young_used.call_count(), 2);
    }

    #[test]
    fn fixed_with_arguments() {
        let mut oom = MockMethod::new_fixed(Box::new(|bytes: usize| bytes > 1024));
        assert!(oom.call(2048));
        assert!(!oom.call(16));
        assert!(oom.is_called());
    }

    #[test]
    fn sequence_wraps_around() {
        // A young generation that fills up and is then collected.
        let mut young_used = MockMethod::new_sequence(vec![
            Box::new(|()| 0usize),
            Box::new(|()| 512),
            Box::new(|()| 1024),
        ]);
        let seen: Vec<usize> = (0..5).map(|_| young_used.call(())).collect();
        assert_eq!(seen, vec![0, 512, 1024, 0, 512]);
        assert_eq!(young_used.call_count(), 5);
    }

    #[test]
    fn default_returns_default() {
        let mut preclean = MockMethod::<(), ()>::new_default();
        preclean.call(());
        assert_eq!(preclean.call_count(), 1);
    }

    #[test]
    #[should_panic]
    fn unimplemented_panics() {
        let mut method = MockMethod::<(), usize>::default();
        method.call(());
    }
}
