//! Shareable device tensor buffers
//!
//! A [`TensorBuffer`] is a handle to a typed, device-accessible memory
//! region. Handles can be duplicated so that two signature contexts refer
//! to the same underlying storage; aliasing is explicit and established at
//! construction time only. CPU-side access goes through a [`ScopedLock`]
//! whose release is guaranteed on all exit paths and which excludes every
//! aliased handle while held.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::dtype::DType;
use crate::{Error, Result};

/// Typed storage shared by all aliases of one buffer.
#[derive(Debug)]
enum Cells {
    I32(Vec<i32>),
    I16(Vec<i16>),
    F32(Vec<f32>),
}

impl Cells {
    fn new(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::I32 => Self::I32(vec![0; len]),
            DType::I16 => Self::I16(vec![0; len]),
            DType::F32 => Self::F32(vec![0.0; len]),
        }
    }

    fn fill_zero(&mut self) {
        match self {
            Self::I32(v) => v.fill(0),
            Self::I16(v) => v.fill(0),
            Self::F32(v) => v.fill(0.0),
        }
    }
}

/// A typed, device-accessible memory region.
///
/// Distinct buffers are independent; [`TensorBuffer::duplicate`] produces a
/// new handle over the same storage. The handle carries element type and
/// dimensions; the storage carries the lock.
#[derive(Debug)]
pub struct TensorBuffer {
    dtype: DType,
    dims: Vec<usize>,
    cells: Arc<Mutex<Cells>>,
}

impl TensorBuffer {
    /// Allocate a zero-filled buffer.
    #[must_use]
    pub fn new(dtype: DType, dims: &[usize]) -> Self {
        let len = dims.iter().product();
        Self {
            dtype,
            dims: dims.to_vec(),
            cells: Arc::new(Mutex::new(Cells::new(dtype, len))),
        }
    }

    /// New handle sharing this buffer's storage.
    ///
    /// The duplicate owns its own dtype/shape metadata but locking either
    /// handle excludes the other.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self {
            dtype: self.dtype,
            dims: self.dims.clone(),
            cells: Arc::clone(&self.cells),
        }
    }

    /// Element type of the buffer.
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Ordered dimensions of the buffer.
    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Total number of elements.
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Total size in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.num_elements() * self.dtype.size_in_bytes()
    }

    /// Whether `other` aliases the same underlying storage.
    #[must_use]
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cells, &other.cells)
    }

    /// Acquire exclusive CPU access to the storage.
    ///
    /// Blocks until any outstanding lock on the same storage (through any
    /// alias) is released.
    #[must_use]
    pub fn lock(&self) -> ScopedLock<'_> {
        let guard = self
            .cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        ScopedLock {
            guard,
            dtype: self.dtype,
        }
    }

    /// Copy the buffer contents into a host vector.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` if the buffer is not int32.
    pub fn copy_i32(&self) -> Result<Vec<i32>> {
        Ok(self.lock().as_i32()?.to_vec())
    }

    /// Copy the buffer contents into a host vector.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` if the buffer is not int16.
    pub fn copy_i16(&self) -> Result<Vec<i16>> {
        Ok(self.lock().as_i16()?.to_vec())
    }

    /// Copy the buffer contents into a host vector.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` if the buffer is not float32.
    pub fn copy_f32(&self) -> Result<Vec<f32>> {
        Ok(self.lock().as_f32()?.to_vec())
    }

    /// Write a host span into the front of the buffer.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` for a non-int32 buffer and `InvalidArgument`
    /// if the span does not fit.
    pub fn write_i32(&self, src: &[i32]) -> Result<()> {
        let mut lock = self.lock();
        let dst = lock.as_i32_mut()?;
        Self::check_fit(src.len(), dst.len())?;
        dst[..src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Write a host span into the front of the buffer.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` for a non-int16 buffer and `InvalidArgument`
    /// if the span does not fit.
    pub fn write_i16(&self, src: &[i16]) -> Result<()> {
        let mut lock = self.lock();
        let dst = lock.as_i16_mut()?;
        Self::check_fit(src.len(), dst.len())?;
        dst[..src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Write a host span into the front of the buffer.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` for a non-float32 buffer and
    /// `InvalidArgument` if the span does not fit.
    pub fn write_f32(&self, src: &[f32]) -> Result<()> {
        let mut lock = self.lock();
        let dst = lock.as_f32_mut()?;
        Self::check_fit(src.len(), dst.len())?;
        dst[..src.len()].copy_from_slice(src);
        Ok(())
    }

    fn check_fit(src_len: usize, dst_len: usize) -> Result<()> {
        if src_len > dst_len {
            return Err(Error::InvalidArgument(format!(
                "write of {src_len} elements exceeds buffer capacity {dst_len}"
            )));
        }
        Ok(())
    }
}

/// Exclusive CPU access to a buffer's storage, released on drop.
pub struct ScopedLock<'a> {
    guard: MutexGuard<'a, Cells>,
    dtype: DType,
}

impl ScopedLock<'_> {
    /// View the storage as int32 elements.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` if the buffer holds another element type.
    pub fn as_i32(&self) -> Result<&[i32]> {
        match &*self.guard {
            Cells::I32(v) => Ok(v),
            _ => Err(self.mismatch(DType::I32)),
        }
    }

    /// Mutable int32 view of the storage.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` if the buffer holds another element type.
    pub fn as_i32_mut(&mut self) -> Result<&mut [i32]> {
        match &mut *self.guard {
            Cells::I32(v) => Ok(v),
            _ => Err(Error::DtypeMismatch {
                expected: DType::I32.to_string(),
                got: self.dtype.to_string(),
            }),
        }
    }

    /// View the storage as int16 elements.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` if the buffer holds another element type.
    pub fn as_i16(&self) -> Result<&[i16]> {
        match &*self.guard {
            Cells::I16(v) => Ok(v),
            _ => Err(self.mismatch(DType::I16)),
        }
    }

    /// Mutable int16 view of the storage.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` if the buffer holds another element type.
    pub fn as_i16_mut(&mut self) -> Result<&mut [i16]> {
        match &mut *self.guard {
            Cells::I16(v) => Ok(v),
            _ => Err(Error::DtypeMismatch {
                expected: DType::I16.to_string(),
                got: self.dtype.to_string(),
            }),
        }
    }

    /// View the storage as float32 elements.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` if the buffer holds another element type.
    pub fn as_f32(&self) -> Result<&[f32]> {
        match &*self.guard {
            Cells::F32(v) => Ok(v),
            _ => Err(self.mismatch(DType::F32)),
        }
    }

    /// Mutable float32 view of the storage.
    ///
    /// # Errors
    /// Returns `DtypeMismatch` if the buffer holds another element type.
    pub fn as_f32_mut(&mut self) -> Result<&mut [f32]> {
        match &mut *self.guard {
            Cells::F32(v) => Ok(v),
            _ => Err(Error::DtypeMismatch {
                expected: DType::F32.to_string(),
                got: self.dtype.to_string(),
            }),
        }
    }

    /// Zero every element of the storage.
    pub fn fill_zero(&mut self) {
        self.guard.fill_zero();
    }

    fn mismatch(&self, expected: DType) -> Error {
        Error::DtypeMismatch {
            expected: expected.to_string(),
            got: self.dtype.to_string(),
        }
    }
}
