//! Enumerates the scalar element types a graph tensor may carry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical element type shared between graph descriptors and runtime buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// One byte per element holding `0` or `1`.
    Boolean,
    /// 32-bit floating point following IEEE-754 semantics.
    F32,
    /// 64-bit floating point following IEEE-754 semantics.
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl DType {
    pub const ALL: [DType; 11] = [
        DType::Boolean,
        DType::F32,
        DType::F64,
        DType::I8,
        DType::I16,
        DType::I32,
        DType::I64,
        DType::U8,
        DType::U16,
        DType::U32,
        DType::U64,
    ];

    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Boolean | DType::I8 | DType::U8 => 1,
            DType::I16 | DType::U16 => 2,
            DType::F32 | DType::I32 | DType::U32 => 4,
            DType::F64 | DType::I64 | DType::U64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            DType::F32 | DType::F64 | DType::I8 | DType::I16 | DType::I32 | DType::I64
        )
    }

    pub fn is_integer(self) -> bool {
        !self.is_float() && self != DType::Boolean
    }

    /// Short lowercase name used in diagnostics and generated symbol names.
    pub fn name(self) -> &'static str {
        match self {
            DType::Boolean => "bool",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::I8 => "i8",
            DType::I16 => "i16",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U8 => "u8",
            DType::U16 => "u16",
            DType::U32 => "u32",
            DType::U64 => "u64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rust scalar types that can view tensor storage directly.
pub trait Element: bytemuck::Pod + Send + Sync + 'static {
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;
            }
        )*
    };
}

impl_element!(
    f32 => F32,
    f64 => F64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
);

/// Whether storage of `dtype` may be viewed as `T`. Booleans are viewed as `u8`.
pub fn element_matches<T: Element>(dtype: DType) -> bool {
    T::DTYPE == dtype || (dtype == DType::Boolean && T::DTYPE == DType::U8)
}
