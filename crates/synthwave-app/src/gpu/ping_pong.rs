/// Two interchangeable slots with explicit current/next roles.
///
/// `current` is the readable side, `next` the write target. The roles only
/// change through `swap`, and never alias the same slot.
pub struct PingPong<T> {
    slots: [T; 2],
    current: usize,
}

impl<T> PingPong<T> {
    pub fn new(a: T, b: T) -> Self {
        Self {
            slots: [a, b],
            current: 0,
        }
    }

    pub fn current(&self) -> &T {
        &self.slots[self.current]
    }

    pub fn next(&self) -> &T {
        &self.slots[1 - self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut()
    }
}
