/// Identifies one issued network read in a stable, copyable way.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Request(pub u64);

/// Monotonic generation counter used to recognise superseded async work.
///
/// Work is tagged with the generation current when it was started; a result
/// whose tag no longer matches `current()` is stale and must be discarded.
#[derive(Debug, Default, Clone)]
pub struct Generation {
    current: u64,
    next_request: u64,
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    /// Starts a new generation, invalidating everything tagged before it.
    pub fn advance(&mut self) -> u64 {
        self.current = self.current.wrapping_add(1);
        self.current
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current == generation
    }

    /// Allocates a fresh request handle. Handles are never reused.
    pub fn next_request(&mut self) -> Request {
        let req = Request(self.next_request);
        self.next_request = self.next_request.wrapping_add(1);
        req
    }
}
