//! In-memory backend for images handed over by the host.
//!
//! The buffer is reference counted, so an image supplied through
//! [`crate::image::ImageSource::Memory`] is shared with the handle instead of copied.

use std::sync::Arc;

use super::Backend;

/// Shared, immutable byte buffer.
#[derive(Debug, Clone)]
pub struct Memory {
    data: Arc<[u8]>,
}

impl Memory {
    /// Wraps an existing buffer.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Memory {
        Memory { data: data.into() }
    }
}

impl Backend for Memory {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}
