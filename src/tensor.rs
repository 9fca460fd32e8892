//! Tensor marshaling between typed Rust slices and wire tensors.
//!
//! Payloads are little-endian byte buffers backed by [`Bytes`], paired with
//! a [`DType`] and shape. Typed constructors and accessors validate element
//! counts and byte lengths up front so a malformed tensor is an error, never
//! a panic.

use std::fmt;

use bytes::Bytes;

use crate::error::{Error, Result};

/// Wire datatype taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Fp16,
    Fp32,
    Fp64,
    /// Variable-length byte elements; no fixed element size.
    Bytes,
}

impl DType {
    /// Wire name used in tensor messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Bool => "BOOL",
            DType::Uint8 => "UINT8",
            DType::Uint16 => "UINT16",
            DType::Uint32 => "UINT32",
            DType::Uint64 => "UINT64",
            DType::Int8 => "INT8",
            DType::Int16 => "INT16",
            DType::Int32 => "INT32",
            DType::Int64 => "INT64",
            DType::Fp16 => "FP16",
            DType::Fp32 => "FP32",
            DType::Fp64 => "FP64",
            DType::Bytes => "BYTES",
        }
    }

    /// Parse a wire datatype name.
    pub fn from_wire(name: &str) -> Result<Self> {
        Ok(match name {
            "BOOL" => DType::Bool,
            "UINT8" => DType::Uint8,
            "UINT16" => DType::Uint16,
            "UINT32" => DType::Uint32,
            "UINT64" => DType::Uint64,
            "INT8" => DType::Int8,
            "INT16" => DType::Int16,
            "INT32" => DType::Int32,
            "INT64" => DType::Int64,
            "FP16" => DType::Fp16,
            "FP32" => DType::Fp32,
            "FP64" => DType::Fp64,
            "BYTES" => DType::Bytes,
            other => {
                return Err(Error::InvalidData(format!("unknown datatype `{other}`")));
            }
        })
    }

    /// Fixed element size in bytes, or `None` for [`DType::Bytes`].
    pub fn element_size(&self) -> Option<usize> {
        match self {
            DType::Bool | DType::Uint8 | DType::Int8 => Some(1),
            DType::Uint16 | DType::Int16 | DType::Fp16 => Some(2),
            DType::Uint32 | DType::Int32 | DType::Fp32 => Some(4),
            DType::Uint64 | DType::Int64 | DType::Fp64 => Some(8),
            DType::Bytes => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn numel(shape: &[i64]) -> Result<usize> {
    let mut n: usize = 1;
    for &dim in shape {
        if dim < 0 {
            return Err(Error::InvalidData(format!(
                "negative dimension {dim} in shape {shape:?}"
            )));
        }
        n = n.saturating_mul(dim as usize);
    }
    Ok(n)
}

/// One named input tensor, ready to marshal onto the wire.
#[derive(Clone, Debug)]
pub struct InferInput {
    pub name: String,
    pub shape: Vec<i64>,
    pub dtype: DType,
    pub data: Bytes,
}

macro_rules! typed_input {
    ($fn_name:ident, $ty:ty, $dtype:expr) => {
        /// Build an input from a typed slice, validating the element count
        /// against the shape.
        pub fn $fn_name(
            name: impl Into<String>,
            shape: Vec<i64>,
            values: &[$ty],
        ) -> Result<Self> {
            let mut data = Vec::with_capacity(std::mem::size_of::<$ty>() * values.len());
            for v in values {
                data.extend_from_slice(&v.to_le_bytes());
            }
            Self::from_elements(name.into(), shape, $dtype, values.len(), Bytes::from(data))
        }
    };
}

impl InferInput {
    /// Build an input from raw little-endian bytes, validating the byte
    /// length against shape and dtype.
    pub fn new(
        name: impl Into<String>,
        shape: Vec<i64>,
        dtype: DType,
        data: Bytes,
    ) -> Result<Self> {
        let name = name.into();
        if let Some(element_size) = dtype.element_size() {
            let expected = numel(&shape)?.saturating_mul(element_size);
            if data.len() != expected {
                return Err(Error::InvalidData(format!(
                    "input `{name}`: {} bytes for {dtype} shape {shape:?}, expected {expected}",
                    data.len()
                )));
            }
        }
        Ok(Self {
            name,
            shape,
            dtype,
            data,
        })
    }

    fn from_elements(
        name: String,
        shape: Vec<i64>,
        dtype: DType,
        count: usize,
        data: Bytes,
    ) -> Result<Self> {
        let expected = numel(&shape)?;
        if count != expected {
            return Err(Error::InvalidData(format!(
                "input `{name}`: {count} elements for shape {shape:?}, expected {expected}"
            )));
        }
        Ok(Self {
            name,
            shape,
            dtype,
            data,
        })
    }

    typed_input!(from_f32, f32, DType::Fp32);
    typed_input!(from_f64, f64, DType::Fp64);
    typed_input!(from_i32, i32, DType::Int32);
    typed_input!(from_i64, i64, DType::Int64);
    typed_input!(from_u16, u16, DType::Uint16);
    typed_input!(from_u32, u32, DType::Uint32);
    typed_input!(from_u64, u64, DType::Uint64);

    /// Build a UINT8 input; bytes are taken as-is.
    pub fn from_u8(name: impl Into<String>, shape: Vec<i64>, values: &[u8]) -> Result<Self> {
        Self::from_elements(
            name.into(),
            shape,
            DType::Uint8,
            values.len(),
            Bytes::copy_from_slice(values),
        )
    }

    /// Build a BOOL input; each element is one byte on the wire.
    pub fn from_bool(name: impl Into<String>, shape: Vec<i64>, values: &[bool]) -> Result<Self> {
        let data: Vec<u8> = values.iter().map(|&b| b as u8).collect();
        Self::from_elements(
            name.into(),
            shape,
            DType::Bool,
            values.len(),
            Bytes::from(data),
        )
    }

    /// Number of elements implied by the shape.
    pub fn numel(&self) -> usize {
        self.shape
            .iter()
            .map(|&d| d.max(0) as usize)
            .product::<usize>()
    }
}

/// A requested output: its name and the byte allocation it needs.
///
/// The byte size is used to size shared-memory regions; for in-band
/// responses it is only advisory.
#[derive(Clone, Debug)]
pub struct OutputSpec {
    pub name: String,
    pub byte_size: u64,
}

impl OutputSpec {
    pub fn new(name: impl Into<String>, byte_size: u64) -> Self {
        Self {
            name: name.into(),
            byte_size,
        }
    }
}

/// One decoded output tensor.
#[derive(Clone, Debug)]
pub struct InferOutput {
    pub name: String,
    pub dtype: DType,
    pub shape: Vec<i64>,
    pub data: Bytes,
}

macro_rules! typed_output {
    ($fn_name:ident, $ty:ty, $dtype:expr, $width:expr) => {
        /// Copy the payload out as a typed vector, validating dtype and
        /// byte length.
        pub fn $fn_name(&self) -> Result<Vec<$ty>> {
            self.check_dtype($dtype)?;
            if self.data.len() % $width != 0 {
                return Err(Error::InvalidData(format!(
                    "output `{}`: {} bytes is not a multiple of element size {}",
                    self.name,
                    self.data.len(),
                    $width
                )));
            }
            let mut values = Vec::with_capacity(self.data.len() / $width);
            for chunk in self.data.chunks_exact($width) {
                let mut buf = [0u8; $width];
                buf.copy_from_slice(chunk);
                values.push(<$ty>::from_le_bytes(buf));
            }
            Ok(values)
        }
    };
}

impl InferOutput {
    fn check_dtype(&self, expected: DType) -> Result<()> {
        if self.dtype != expected {
            return Err(Error::InvalidData(format!(
                "output `{}` has dtype {}, requested {expected}",
                self.name, self.dtype
            )));
        }
        Ok(())
    }

    typed_output!(as_f32, f32, DType::Fp32, 4);
    typed_output!(as_f64, f64, DType::Fp64, 8);
    typed_output!(as_i32, i32, DType::Int32, 4);
    typed_output!(as_i64, i64, DType::Int64, 8);
    typed_output!(as_u16, u16, DType::Uint16, 2);
    typed_output!(as_u32, u32, DType::Uint32, 4);
    typed_output!(as_u64, u64, DType::Uint64, 8);

    /// Borrow the payload as raw bytes.
    pub fn as_u8(&self) -> Result<&[u8]> {
        self.check_dtype(DType::Uint8)?;
        Ok(&self.data)
    }

    pub fn as_bool(&self) -> Result<Vec<bool>> {
        self.check_dtype(DType::Bool)?;
        Ok(self.data.iter().map(|&b| b != 0).collect())
    }

    /// Number of elements implied by the shape.
    pub fn numel(&self) -> usize {
        self.shape
            .iter()
            .map(|&d| d.max(0) as usize)
            .product::<usize>()
    }
}
