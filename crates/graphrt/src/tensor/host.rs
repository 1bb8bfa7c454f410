//! Runtime tensors: a descriptor bound to live host storage.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::buffer::{AlignedBuffer, ExternalBuffer};
use super::dtype::element_matches;
use super::{DType, Element, Shape, TensorDescriptor, TensorSpec};
use crate::error::{BackendError, BackendResult};

static NEXT_TENSOR: AtomicU64 = AtomicU64::new(0);

fn fresh_name() -> String {
    format!("tensor_{}", NEXT_TENSOR.fetch_add(1, Ordering::Relaxed))
}

enum Storage {
    Owned(AlignedBuffer),
    External(ExternalBuffer),
}

impl Storage {
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Owned(buffer) => buffer.as_slice(),
            Storage::External(buffer) => buffer.as_slice(),
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Storage::Owned(buffer) => buffer.as_mut_slice(),
            Storage::External(buffer) => buffer.as_mut_slice(),
        }
    }
}

/// A live tensor passed to [`crate::Backend::call`].
pub struct Tensor {
    descriptor: TensorDescriptor,
    storage: Storage,
}

impl Tensor {
    /// Allocates a zero-filled host tensor.
    pub fn new(dtype: DType, shape: impl Into<Shape>) -> Self {
        let descriptor = TensorDescriptor::new(dtype, shape, fresh_name());
        let storage = Storage::Owned(AlignedBuffer::zeroed(descriptor.size()));
        Tensor {
            descriptor,
            storage,
        }
    }

    pub fn from_spec(spec: &TensorSpec) -> Self {
        Self::new(spec.dtype, spec.shape.clone())
    }

    /// Binds a tensor to caller-owned memory. The buffer must cover the tensor.
    pub fn from_external(
        dtype: DType,
        shape: impl Into<Shape>,
        buffer: ExternalBuffer,
    ) -> BackendResult<Self> {
        let descriptor = TensorDescriptor::new(dtype, shape, fresh_name());
        if buffer.len() < descriptor.size() {
            return Err(BackendError::Tensor(format!(
                "external buffer of {} bytes is too small for {} ({} bytes)",
                buffer.len(),
                descriptor.spec(),
                descriptor.size()
            )));
        }
        Ok(Tensor {
            descriptor,
            storage: Storage::External(buffer),
        })
    }

    /// Allocates a tensor holding a copy of `data`.
    pub fn from_slice<T: Element>(shape: impl Into<Shape>, data: &[T]) -> BackendResult<Self> {
        let mut tensor = Tensor::new(T::DTYPE, shape);
        tensor.write(data)?;
        Ok(tensor)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let spec = self.descriptor.spec();
        self.descriptor = TensorDescriptor::from_spec(&spec, name);
        self
    }

    pub fn descriptor(&self) -> &TensorDescriptor {
        &self.descriptor
    }

    pub fn dtype(&self) -> DType {
        self.descriptor.dtype()
    }

    pub fn shape(&self) -> &Shape {
        self.descriptor.shape()
    }

    pub fn spec(&self) -> TensorSpec {
        self.descriptor.spec()
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn element_count(&self) -> usize {
        self.descriptor.element_count()
    }

    pub fn byte_len(&self) -> usize {
        self.descriptor.size()
    }

    pub fn is_external(&self) -> bool {
        matches!(self.storage, Storage::External(_))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.storage.bytes()[..self.byte_len()]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.byte_len();
        &mut self.storage.bytes_mut()[..len]
    }

    pub fn as_slice<T: Element>(&self) -> BackendResult<&[T]> {
        self.check_element::<T>()?;
        bytemuck::try_cast_slice(self.as_bytes())
            .map_err(|err| BackendError::Tensor(format!("cannot view {self} as {}: {err}", T::DTYPE)))
    }

    pub fn as_mut_slice<T: Element>(&mut self) -> BackendResult<&mut [T]> {
        self.check_element::<T>()?;
        let name = self.descriptor.to_string();
        bytemuck::try_cast_slice_mut(self.as_bytes_mut())
            .map_err(|err| BackendError::Tensor(format!("cannot view {name} as {}: {err}", T::DTYPE)))
    }

    /// Copies `data` into the tensor; the element count must match exactly.
    pub fn write<T: Element>(&mut self, data: &[T]) -> BackendResult<()> {
        let count = self.element_count();
        if data.len() != count {
            return Err(BackendError::Tensor(format!(
                "cannot write {} elements into {self} holding {count}",
                data.len()
            )));
        }
        self.as_mut_slice::<T>()?.copy_from_slice(data);
        Ok(())
    }

    pub fn read<T: Element>(&self) -> BackendResult<Vec<T>> {
        Ok(self.as_slice::<T>()?.to_vec())
    }

    /// Copies raw bytes from another tensor of identical byte length.
    pub fn copy_from(&mut self, source: &Tensor) -> BackendResult<()> {
        self.write_bytes(source.as_bytes())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> BackendResult<()> {
        if bytes.len() != self.byte_len() {
            return Err(BackendError::Tensor(format!(
                "cannot copy {} bytes into {self} of {} bytes",
                bytes.len(),
                self.byte_len()
            )));
        }
        self.as_bytes_mut().copy_from_slice(bytes);
        Ok(())
    }

    fn check_element<T: Element>(&self) -> BackendResult<()> {
        if element_matches::<T>(self.dtype()) {
            Ok(())
        } else {
            Err(BackendError::Tensor(format!(
                "{self} holds {} elements, not {}",
                self.dtype(),
                T::DTYPE
            )))
        }
    }
}

impl Clone for Tensor {
    /// Deep copy into owned storage, including for externally bound tensors.
    fn clone(&self) -> Self {
        Tensor {
            descriptor: self.descriptor.clone(),
            storage: Storage::Owned(AlignedBuffer::from_bytes(self.as_bytes())),
        }
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.descriptor, f)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("name", &self.name())
            .field("spec", &self.spec())
            .field("external", &self.is_external())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_tensor_is_zeroed() {
        let tensor = Tensor::new(DType::F32, [2, 3]);
        assert_eq!(tensor.byte_len(), 24);
        assert_eq!(tensor.read::<f32>().expect("read"), vec![0.0; 6]);
    }

    #[test]
    fn typed_access_rejects_wrong_dtype() {
        let tensor = Tensor::from_slice([2], &[1i32, 2]).expect("tensor");
        assert!(tensor.as_slice::<f32>().is_err());
        assert_eq!(tensor.read::<i32>().expect("read"), vec![1, 2]);
    }

    #[test]
    fn write_requires_matching_length() {
        let mut tensor = Tensor::new(DType::F64, [3]);
        assert!(tensor.write(&[1.0f64, 2.0]).is_err());
        tensor.write(&[1.0f64, 2.0, 3.0]).expect("write");
    }

    #[test]
    fn external_tensor_writes_through() {
        let mut backing = vec![0u32; 4];
        // SAFETY: `backing` outlives `tensor`.
        let buffer = unsafe { ExternalBuffer::from_slice(bytemuck::cast_slice_mut(&mut backing)) };
        {
            let mut tensor = Tensor::from_external(DType::U32, [4], buffer).expect("bind");
            assert!(tensor.is_external());
            tensor.write(&[1u32, 2, 3, 4]).expect("write");
        }
        assert_eq!(backing, vec![1, 2, 3, 4]);
    }

    #[test]
    fn external_buffer_must_cover_tensor() {
        let mut backing = vec![0u8; 4];
        // SAFETY: `backing` outlives the attempted binding.
        let buffer = unsafe { ExternalBuffer::from_slice(&mut backing) };
        assert!(Tensor::from_external(DType::F32, [2], buffer).is_err());
    }

    #[test]
    fn clone_detaches_external_storage() {
        let mut backing = vec![0u8; 4];
        // SAFETY: `backing` outlives `tensor`.
        let buffer = unsafe { ExternalBuffer::from_slice(&mut backing) };
        let tensor = Tensor::from_external(DType::F32, [1], buffer).expect("bind");
        let copy = tensor.clone();
        assert!(!copy.is_external());
        assert_eq!(copy.name(), tensor.name());
    }
}
