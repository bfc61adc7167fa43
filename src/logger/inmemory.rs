// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

use core::{
    cmp::min,
    fmt::{self, Write},
};

/// A circular log buffer.
///
/// The microcontroller usually has no console attached, so the firmware keeps the most recent log
/// output in RAM where a debugger can read it back.
pub struct MemoryLogger<const SIZE: usize> {
    /// Offset in `buffer` at which the next byte is written.
    head: usize,
    /// Number of bytes written since creation or the last `clear`. May exceed `SIZE`.
    written: usize,
    buffer: [u8; SIZE],
}

impl<const SIZE: usize> MemoryLogger<SIZE> {
    /// Creates an empty logger.
    pub const fn new() -> Self {
        Self {
            head: 0,
            written: 0,
            buffer: [0; SIZE],
        }
    }

    /// Discards everything logged so far.
    pub fn clear(&mut self) {
        self.head = 0;
        self.written = 0;
    }

    /// Returns the number of bytes currently held.
    pub fn len(&self) -> usize {
        min(self.written, SIZE)
    }

    /// Returns whether nothing has been logged.
    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Returns the number of bytes that have been overwritten.
    pub fn lost(&self) -> usize {
        self.written.saturating_sub(SIZE)
    }

    fn push(&mut self, mut bytes: &[u8]) {
        self.written += bytes.len();
        if bytes.len() > SIZE {
            bytes = &bytes[bytes.len() - SIZE..];
        }

        let first = min(bytes.len(), SIZE - self.head);
        let (to_end, wrapped) = bytes.split_at(first);
        self.buffer[self.head..self.head + first].copy_from_slice(to_end);
        self.buffer[..wrapped.len()].copy_from_slice(wrapped);
        self.head = (self.head + bytes.len()) % SIZE;
    }

    /// Returns the held bytes as two slices, oldest first.
    pub fn as_slices(&self) -> (&[u8], &[u8]) {
        if self.written < SIZE {
            (&self.buffer[..self.head], &[])
        } else {
            let (newer, older) = self.buffer.split_at(self.head);
            (older, newer)
        }
    }

    /// Moves the oldest held byte to the start of the buffer.
    fn make_contiguous(&mut self) {
        if self.written >= SIZE {
            self.buffer.rotate_left(self.head);
            self.head = 0;
        }
    }

    /// Returns the longest valid UTF-8 suffix of the held bytes.
    ///
    /// After wrapping, the oldest character may have been partly overwritten, so up to three
    /// leading bytes can be skipped.
    pub fn as_str(&mut self) -> &str {
        self.make_contiguous();
        let mut held = &self.buffer[..self.len()];
        loop {
            match str::from_utf8(held) {
                Ok(text) => return text,
                Err(e) if e.valid_up_to() > 0 => {
                    // Only an incomplete character at the end.
                    return str::from_utf8(&held[..e.valid_up_to()]).unwrap_or_default();
                }
                Err(e) => match e.error_len() {
                    Some(len) => held = &held[len..],
                    None => return "",
                },
            }
        }
    }
}

impl<const SIZE: usize> Default for MemoryLogger<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize> Write for MemoryLogger<SIZE> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push(s.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_without_wrap() {
        let mut logger = MemoryLogger::<5>::new();
        assert!(logger.is_empty());

        logger.push(&[1]);
        logger.push(&[2, 3]);
        assert_eq!(3, logger.head);
        assert_eq!(3, logger.len());
        assert_eq!((&[1, 2, 3][..], &[][..]), logger.as_slices());
    }

    #[test]
    fn push_wraps_around() {
        let mut logger = MemoryLogger::<5>::new();
        logger.push(&[1, 2, 3]);
        logger.push(&[4, 5, 6]);

        assert_eq!(1, logger.head);
        assert_eq!([6, 2, 3, 4, 5], logger.buffer);
        assert_eq!((&[2, 3, 4, 5][..], &[6][..]), logger.as_slices());
        assert_eq!(1, logger.lost());
    }

    #[test]
    fn push_longer_than_buffer_keeps_tail() {
        let mut logger = MemoryLogger::<5>::new();
        logger.push(&[1, 2, 3, 4, 5, 6, 7]);
        assert_eq!([3, 4, 5, 6, 7], logger.buffer);
        assert_eq!(0, logger.head);
        assert_eq!(2, logger.lost());
    }

    #[test]
    fn as_str_after_wrap() {
        let mut logger = MemoryLogger::<16>::new();
        write!(logger, "power up {}", "FPD").unwrap();
        assert_eq!("power up FPD", logger.as_str());

        write!(logger, " / slave OCM").unwrap();
        assert_eq!("FPD / slave OCM", logger.as_str().get(1..).unwrap());
        assert_eq!(16, logger.as_str().len());

        logger.clear();
        assert_eq!("", logger.as_str());
    }

    #[test]
    fn as_str_skips_partial_character() {
        let mut logger = MemoryLogger::<8>::new();
        // 'µ' is two bytes in UTF-8, so the first one gets cut in half.
        write!(logger, "µµµµ").unwrap();
        write!(logger, "x").unwrap();
        assert_eq!("µµµx", logger.as_str());
    }
}
