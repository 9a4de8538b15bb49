//! Transfer slots
//!
//! A [`TransferSlot`] is the bookkeeping for one in-flight operation: it
//! owns the byte buffer for exactly as long as the transfer is armed and is
//! consumed by the completion (or by cancellation, which still runs the
//! completion). Slots are not reused across kinds; the underlying buffers
//! are allocated once at attach time and recycled through the session
//! between arms.

/// Which transfer a slot is armed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// The reserved 8-byte control frame.
    Control,
    /// The device's status stream.
    InterruptIn,
    /// The audio/data path to the device.
    InterruptOut,
}

/// One armed transfer: kind, buffer, and the completed length.
#[derive(Debug)]
pub struct TransferSlot {
    kind: SlotKind,
    buffer: Vec<u8>,
    actual_len: usize,
}

impl TransferSlot {
    pub(crate) fn interrupt_in(buffer: Vec<u8>) -> Self {
        TransferSlot { kind: SlotKind::InterruptIn, buffer, actual_len: 0 }
    }

    pub(crate) fn interrupt_out(buffer: Vec<u8>) -> Self {
        TransferSlot { kind: SlotKind::InterruptOut, buffer, actual_len: 0 }
    }

    pub(crate) fn control(frame: Vec<u8>) -> Self {
        TransferSlot { kind: SlotKind::Control, buffer: frame, actual_len: 0 }
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Whole buffer, for the transport to fill on an in transfer.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Record how many bytes the transfer actually moved. Clamped to the
    /// buffer size.
    pub fn set_actual_len(&mut self, len: usize) {
        self.actual_len = len.min(self.buffer.len());
    }

    /// Bytes the completed transfer delivered.
    pub fn payload(&self) -> &[u8] {
        &self.buffer[..self.actual_len]
    }

    /// Stage outbound data, truncating silently at the buffer capacity.
    /// Returns the staged length.
    pub(crate) fn stage(&mut self, data: &[u8]) -> usize {
        let len = data.len().min(self.buffer.len());
        self.buffer[..len].copy_from_slice(&data[..len]);
        self.actual_len = len;
        len
    }

    /// Staged outbound bytes.
    pub(crate) fn staged(&self) -> &[u8] {
        &self.buffer[..self.actual_len]
    }

    pub(crate) fn reset(&mut self) {
        self.actual_len = 0;
    }

    /// Consume the slot, recovering its buffer for the next arm.
    pub(crate) fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}
