// stylecam-camera/src/pool.rs
// ============================================================
// Fixed-capacity pixel buffer pool.
// ------------------------------------------------------------
//   BufferPool::acquire()   – check out a writable buffer
//   PooledBuffer::freeze()  – turn it into a shareable PixelBuffer
//   drop(last PixelBuffer)  – checks the bytes back in
// ============================================================

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("buffer pool exhausted: {capacity} buffers already checked out")]
    Exhausted { capacity: usize },
    #[error("requested {requested} bytes from a pool of {buffer_len}-byte buffers")]
    SizeMismatch { requested: usize, buffer_len: usize },
    #[error("could not allocate {0} bytes")]
    OutOfMemory(usize),
}

struct PoolShared {
    buffer_len: usize,
    capacity: usize,
    outstanding: AtomicUsize,
    idle: Mutex<Vec<Vec<u8>>>,
}

impl PoolShared {
    fn check_in(&self, data: Vec<u8>) {
        if data.len() == self.buffer_len {
            self.idle.lock().push(data);
        }
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Pool of equally sized byte buffers with a hard cap on how many may be
/// checked out at once. Cloning the pool shares it.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    pub fn new(buffer_len: usize, capacity: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                buffer_len,
                capacity,
                outstanding: AtomicUsize::new(0),
                idle: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Pool sized for `width`×`height` frames with `bytes_per_pixel`.
    pub fn for_frames(width: u32, height: u32, bytes_per_pixel: usize, capacity: usize) -> Self {
        Self::new(width as usize * height as usize * bytes_per_pixel, capacity)
    }

    pub fn buffer_len(&self) -> usize {
        self.shared.buffer_len
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Buffers currently checked out (including ones held by live `PixelBuffer`s).
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    /// Check out a buffer. Contents are whatever the previous user left behind.
    /// Safe to call from any thread.
    pub fn acquire(&self) -> Result<PooledBuffer, PoolError> {
        let shared = &self.shared;
        let mut current = shared.outstanding.load(Ordering::Acquire);
        loop {
            if current >= shared.capacity {
                return Err(PoolError::Exhausted { capacity: shared.capacity });
            }
            match shared.outstanding.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(seen) => current = seen,
            }
        }

        let recycled = shared.idle.lock().pop();
        let data = match recycled {
            Some(data) => data,
            None => match alloc_bytes(shared.buffer_len) {
                Ok(data) => data,
                Err(e) => {
                    shared.outstanding.fetch_sub(1, Ordering::AcqRel);
                    return Err(e);
                }
            },
        };

        Ok(PooledBuffer { data, home: Some(Arc::clone(shared)) })
    }

    /// Check out a buffer of exactly `len` bytes, failing if the pool holds another size.
    pub fn acquire_len(&self, len: usize) -> Result<PooledBuffer, PoolError> {
        if len != self.shared.buffer_len {
            return Err(PoolError::SizeMismatch { requested: len, buffer_len: self.shared.buffer_len });
        }
        self.acquire()
    }
}

fn alloc_bytes(len: usize) -> Result<Vec<u8>, PoolError> {
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|_| PoolError::OutOfMemory(len))?;
    data.resize(len, 0);
    Ok(data)
}

/// Uniquely owned, writable buffer. Returns to its pool on drop.
pub struct PooledBuffer {
    data: Vec<u8>,
    home: Option<Arc<PoolShared>>,
}

impl PooledBuffer {
    /// Fresh zeroed buffer that does not belong to any pool.
    pub fn unpooled(len: usize) -> Result<Self, PoolError> {
        Ok(Self { data: alloc_bytes(len)?, home: None })
    }

    /// Take `pool`'s buffer when it has the right size, otherwise allocate.
    pub fn from_pool_or_alloc(pool: Option<&BufferPool>, len: usize) -> Result<Self, PoolError> {
        match pool {
            Some(pool) if pool.buffer_len() == len => pool.acquire(),
            _ => Self::unpooled(len),
        }
    }

    pub fn is_pooled(&self) -> bool {
        self.home.is_some()
    }

    pub fn freeze(self) -> PixelBuffer {
        PixelBuffer(Arc::new(self))
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(home) = self.home.take() {
            home.check_in(std::mem::take(&mut self.data));
        }
    }
}

/// Reference-counted, read-only pixel storage.
#[derive(Clone)]
pub struct PixelBuffer(Arc<PooledBuffer>);

impl PixelBuffer {
    /// Wrap bytes that were produced outside any pool (e.g. a camera copy).
    pub fn from_vec(data: Vec<u8>) -> Self {
        PooledBuffer { data, home: None }.freeze()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn is_pooled(&self) -> bool {
        self.0.is_pooled()
    }

    /// Number of handles sharing this storage.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl Deref for PixelBuffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for PixelBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("len", &self.0.len())
            .field("pooled", &self.0.is_pooled())
            .finish()
    }
}
