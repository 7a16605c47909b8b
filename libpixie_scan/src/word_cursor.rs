/// A bounds-checked reader over a slice of 32-bit words.
///
/// Every read checks the number of words remaining, so a malformed length field can never
/// walk off the end of a buffer. Reads that would overrun return None and leave the
/// position untouched.
#[derive(Debug, Clone)]
pub struct WordCursor<'a> {
    words: &'a [u32],
    position: usize,
}

impl<'a> WordCursor<'a> {
    pub fn new(words: &'a [u32]) -> Self {
        Self { words, position: 0 }
    }

    /// Index of the next word to be read
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.words.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn peek(&self) -> Option<u32> {
        self.words.get(self.position).copied()
    }

    pub fn read(&mut self) -> Option<u32> {
        let word = self.peek()?;
        self.position += 1;
        Some(word)
    }

    /// Take the next n words as a slice
    pub fn take(&mut self, n: usize) -> Option<&'a [u32]> {
        if n > self.remaining() {
            return None;
        }
        let slice = &self.words[self.position..self.position + n];
        self.position += n;
        Some(slice)
    }

    pub fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    /// Everything not yet consumed
    pub fn rest(&self) -> &'a [u32] {
        &self.words[self.position..]
    }
}
