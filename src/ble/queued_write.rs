//! Queued Write Buffer
//!
//! Accumulates prepare-write fragments for the characteristic it is bound to
//! and applies them only on an execute-write. A cancel or a disconnect never
//! lets a partial value reach the write callback. An overflowing fragment is
//! rejected and leaves the fragments already queued as they were.

use crate::error::Error;

/// Backing store size: the largest value a long write can assemble
pub const QUEUED_WRITE_CAPACITY: usize = 512;

/// Smallest prepare-write fragment, at the default ATT MTU of 23
const MIN_FRAGMENT_LEN: usize = 18;
/// Handle, offset and length ahead of every fragment the stack queues
const STACK_RECORD_HEADER_LEN: usize = 6;

/// Memory block lent to the stack for its own prepare-write queue: a full
/// value in minimum-size fragments plus the terminating handle
pub const STACK_MEM_LEN: usize = QUEUED_WRITE_CAPACITY
    + (QUEUED_WRITE_CAPACITY + MIN_FRAGMENT_LEN - 1) / MIN_FRAGMENT_LEN * STACK_RECORD_HEADER_LEN
    + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QueuedWriteError {
    /// Fragment would run past the backing buffer
    Capacity { offset: u16, len: u16 },
    /// No attribute bound yet
    NotBound,
    /// Fragment targets an attribute other than the bound one
    UnknownAttribute { handle: u16 },
}

impl From<QueuedWriteError> for Error {
    fn from(error: QueuedWriteError) -> Self {
        match error {
            QueuedWriteError::Capacity { offset, len } => Error::Capacity {
                offset,
                len,
                capacity: QUEUED_WRITE_CAPACITY as u16,
            },
            QueuedWriteError::NotBound | QueuedWriteError::UnknownAttribute { .. } => Error::Parameter,
        }
    }
}

#[derive(Debug)]
pub struct QueuedWriteBuffer {
    buf: [u8; QUEUED_WRITE_CAPACITY],
    /// Owned by the stack between a memory request and its release
    stack_mem: [u8; STACK_MEM_LEN],
    /// Highest byte written so far
    len: usize,
    /// End of the most recent fragment
    cursor: usize,
    /// Attribute the buffer serves, 0 while unbound
    attr_handle: u16,
}

impl Default for QueuedWriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl QueuedWriteBuffer {
    pub const fn new() -> Self {
        Self {
            buf: [0; QUEUED_WRITE_CAPACITY],
            stack_mem: [0; STACK_MEM_LEN],
            len: 0,
            cursor: 0,
            attr_handle: 0,
        }
    }

    /// Bind the buffer to the value handle of the characteristic it serves
    pub fn bind(&mut self, attr_handle: u16) -> Result<(), Error> {
        if attr_handle == 0 {
            return Err(Error::Parameter);
        }
        self.attr_handle = attr_handle;
        self.clear();
        debug!("QWR: Bound to handle {:#x}", attr_handle);
        Ok(())
    }

    pub fn attr_handle(&self) -> Option<u16> {
        (self.attr_handle != 0).then_some(self.attr_handle)
    }

    /// Queue a prepare-write fragment for `handle`
    pub fn prepare_write(&mut self, handle: u16, offset: u16, data: &[u8]) -> Result<(), QueuedWriteError> {
        match self.attr_handle() {
            None => return Err(QueuedWriteError::NotBound),
            Some(bound) if bound != handle => return Err(QueuedWriteError::UnknownAttribute { handle }),
            Some(_) => {}
        }
        self.begin_write(offset, data)
    }

    /// Copy a fragment into the buffer at `offset`
    pub fn begin_write(&mut self, offset: u16, data: &[u8]) -> Result<(), QueuedWriteError> {
        let start = usize::from(offset);
        let end = start + data.len();
        if end > QUEUED_WRITE_CAPACITY {
            warn!(
                "QWR: Fragment of {} bytes at offset {} exceeds capacity",
                data.len(),
                offset
            );
            return Err(QueuedWriteError::Capacity {
                offset,
                len: data.len() as u16,
            });
        }

        self.buf[start..end].copy_from_slice(data);
        self.len = self.len.max(end);
        self.cursor = end;
        trace!("QWR: Queued {} bytes at offset {}, total {}", data.len(), offset, self.len);
        Ok(())
    }

    /// Apply the accumulated value to `apply` and clear the buffer
    ///
    /// Returns `None` without calling `apply` when nothing is queued.
    pub fn commit<R>(&mut self, apply: impl FnOnce(u16, &[u8]) -> R) -> Option<R> {
        if self.len == 0 || self.attr_handle == 0 {
            self.clear();
            return None;
        }
        debug!("QWR: Executing {} bytes for handle {:#x}", self.len, self.attr_handle);
        let result = apply(self.attr_handle, &self.buf[..self.len]);
        self.clear();
        Some(result)
    }

    /// Discard everything queued
    pub fn cancel(&mut self) {
        if self.len != 0 {
            debug!("QWR: Discarding {} queued bytes", self.len);
        }
        self.clear();
    }

    /// Memory block handed to the stack for queued writes
    ///
    /// Kept apart from the assembled value: the stack writes its own
    /// record format here, while fragments reach [`Self::prepare_write`]
    /// through authorisation requests.
    pub fn stack_mem_mut(&mut self) -> &mut [u8] {
        &mut self.stack_mem
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// End of the most recent fragment
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn clear(&mut self) {
        self.buf[..self.len].fill(0);
        self.len = 0;
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bind_rejects_invalid_handle() {
        let mut qwr = QueuedWriteBuffer::new();
        assert_eq!(qwr.bind(0), Err(Error::Parameter));
        assert_eq!(qwr.attr_handle(), None);
        assert_eq!(qwr.prepare_write(0x10, 0, &[1]), Err(QueuedWriteError::NotBound));
    }

    #[test]
    fn test_fragments_assemble_in_order() {
        let mut qwr = QueuedWriteBuffer::new();
        qwr.bind(0x10).unwrap();
        qwr.prepare_write(0x10, 0, &[1, 2, 3]).unwrap();
        qwr.prepare_write(0x10, 3, &[4, 5]).unwrap();
        assert_eq!(qwr.cursor(), 5);

        let mut seen = [0u8; 5];
        let handle = qwr.commit(|handle, data| {
            seen.copy_from_slice(data);
            handle
        });
        assert_eq!(handle, Some(0x10));
        assert_eq!(seen, [1, 2, 3, 4, 5]);
        assert!(qwr.is_empty());
    }

    #[test]
    fn test_overflow_rejected() {
        let mut qwr = QueuedWriteBuffer::new();
        qwr.bind(0x10).unwrap();
        qwr.prepare_write(0x10, 500, &[0; 12]).unwrap();
        assert_eq!(
            qwr.prepare_write(0x10, 500, &[0; 13]),
            Err(QueuedWriteError::Capacity { offset: 500, len: 13 })
        );
        assert_eq!(qwr.len(), 512);
    }

    #[test]
    fn test_other_attribute_rejected() {
        let mut qwr = QueuedWriteBuffer::new();
        qwr.bind(0x10).unwrap();
        assert_eq!(
            qwr.prepare_write(0x11, 0, &[1]),
            Err(QueuedWriteError::UnknownAttribute { handle: 0x11 })
        );
        assert!(qwr.is_empty());
    }

    #[test]
    fn test_stack_memory_separate_from_value() {
        let mut qwr = QueuedWriteBuffer::new();
        qwr.bind(0x10).unwrap();
        qwr.prepare_write(0x10, 0, &[1, 2, 3]).unwrap();

        let stack_mem = qwr.stack_mem_mut();
        assert_eq!(stack_mem.len(), STACK_MEM_LEN);
        assert!(STACK_MEM_LEN > QUEUED_WRITE_CAPACITY);
        stack_mem[..8].fill(0xAA);

        assert_eq!(qwr.data(), &[1, 2, 3]);
    }

    #[test]
    fn test_commit_with_nothing_queued() {
        let mut qwr = QueuedWriteBuffer::new();
        qwr.bind(0x10).unwrap();
        let mut called = false;
        assert_eq!(qwr.commit(|_, _| called = true), None);
        assert!(!called);
    }

    #[test]
    fn test_capacity_error_maps_to_error() {
        let error: Error = QueuedWriteError::Capacity { offset: 510, len: 4 }.into();
        assert_eq!(
            error,
            Error::Capacity {
                offset: 510,
                len: 4,
                capacity: 512
            }
        );
    }

    proptest! {
        #[test]
        fn prop_cancel_never_reaches_callback(
            fragments in proptest::collection::vec((0u16..600, proptest::collection::vec(any::<u8>(), 0..64)), 0..16)
        ) {
            let mut qwr = QueuedWriteBuffer::new();
            qwr.bind(0x10).unwrap();
            for (offset, data) in fragments.iter() {
                let _ = qwr.prepare_write(0x10, *offset, data);
            }
            qwr.cancel();
            prop_assert!(qwr.is_empty());
            let mut called = false;
            prop_assert_eq!(qwr.commit(|_, _| called = true), None);
            prop_assert!(!called);
        }

        #[test]
        fn prop_commit_delivers_every_accepted_fragment(
            fragments in proptest::collection::vec((0u16..600, proptest::collection::vec(any::<u8>(), 1..64)), 1..16)
        ) {
            let mut qwr = QueuedWriteBuffer::new();
            qwr.bind(0x10).unwrap();
            let mut expected = [0u8; QUEUED_WRITE_CAPACITY];
            let mut expected_len = 0usize;
            for (offset, data) in fragments.iter() {
                let start = usize::from(*offset);
                let accepted = qwr.prepare_write(0x10, *offset, data).is_ok();
                prop_assert_eq!(accepted, start + data.len() <= QUEUED_WRITE_CAPACITY);
                if accepted {
                    expected[start..start + data.len()].copy_from_slice(data);
                    expected_len = expected_len.max(start + data.len());
                }
            }

            let mut delivered: Option<([u8; QUEUED_WRITE_CAPACITY], usize)> = None;
            qwr.commit(|_, data| {
                let mut copy = [0u8; QUEUED_WRITE_CAPACITY];
                copy[..data.len()].copy_from_slice(data);
                delivered = Some((copy, data.len()));
            });
            match delivered {
                Some((copy, len)) => {
                    prop_assert_eq!(len, expected_len);
                    prop_assert_eq!(&copy[..len], &expected[..expected_len]);
                }
                None => prop_assert_eq!(expected_len, 0),
            }
        }
    }
}
