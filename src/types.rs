//! Core data types: sample types, integer boxes and request regions

use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sample data types a field can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    /// Unsigned 8-bit integer
    U8 = 1,
    /// Unsigned 16-bit integer
    U16 = 2,
    /// Unsigned 32-bit integer
    U32 = 3,
    /// Unsigned 64-bit integer
    U64 = 4,
    /// Signed 8-bit integer
    I8 = 5,
    /// Signed 16-bit integer
    I16 = 6,
    /// Signed 32-bit integer
    I32 = 7,
    /// Signed 64-bit integer
    I64 = 8,
    /// 32-bit floating point
    F32 = 9,
    /// 64-bit floating point
    F64 = 10,
}

impl DataType {
    /// Size in bytes of this data type
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::U64 | DataType::I64 | DataType::F64 => 8,
        }
    }

    /// Check if this is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    /// Canonical lowercase name, as used in dtype strings
    pub fn name(&self) -> &'static str {
        match self {
            DataType::U8 => "uint8",
            DataType::U16 => "uint16",
            DataType::U32 => "uint32",
            DataType::U64 => "uint64",
            DataType::I8 => "int8",
            DataType::I16 => "int16",
            DataType::I32 => "int32",
            DataType::I64 => "int64",
            DataType::F32 => "float32",
            DataType::F64 => "float64",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "uint8" | "u8" => Ok(DataType::U8),
            "uint16" | "u16" => Ok(DataType::U16),
            "uint32" | "u32" => Ok(DataType::U32),
            "uint64" | "u64" => Ok(DataType::U64),
            "int8" | "i8" => Ok(DataType::I8),
            "int16" | "i16" => Ok(DataType::I16),
            "int32" | "i32" => Ok(DataType::I32),
            "int64" | "i64" => Ok(DataType::I64),
            "float32" | "f32" => Ok(DataType::F32),
            "float64" | "f64" => Ok(DataType::F64),
            other => Err(QueryError::InvalidDataType(other.to_string())),
        }
    }
}

/// Sample type of a field: a scalar type plus a component count
///
/// Parsed from strings such as `"float32"` or `"uint8[3]"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldType {
    pub data_type: DataType,
    pub components: usize,
}

impl FieldType {
    pub fn scalar(data_type: DataType) -> Self {
        Self {
            data_type,
            components: 1,
        }
    }

    /// Bytes occupied by one sample (all components)
    pub fn sample_size(&self) -> usize {
        self.data_type.size_in_bytes() * self.components
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components == 1 {
            write!(f, "{}", self.data_type)
        } else {
            write!(f, "{}[{}]", self.data_type, self.components)
        }
    }
}

impl FromStr for FieldType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.split_once('[') {
            None => Ok(FieldType::scalar(s.parse()?)),
            Some((name, rest)) => {
                let count = rest
                    .strip_suffix(']')
                    .ok_or_else(|| QueryError::InvalidDataType(s.to_string()))?;
                let components: usize = count
                    .trim()
                    .parse()
                    .map_err(|_| QueryError::InvalidDataType(s.to_string()))?;
                if components == 0 {
                    return Err(QueryError::InvalidDataType(s.to_string()));
                }
                Ok(FieldType {
                    data_type: name.parse()?,
                    components,
                })
            }
        }
    }
}

/// Integer box in logic (full resolution) coordinates, `p1` inclusive and
/// `p2` exclusive on every axis
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "BoxRepr")]
pub struct LogicBox {
    pub p1: Vec<i64>,
    pub p2: Vec<i64>,
}

#[derive(Deserialize)]
struct BoxRepr {
    p1: Vec<i64>,
    p2: Vec<i64>,
}

impl TryFrom<BoxRepr> for LogicBox {
    type Error = QueryError;

    fn try_from(repr: BoxRepr) -> Result<Self> {
        LogicBox::new(repr.p1, repr.p2)
    }
}

impl LogicBox {
    /// Create a box, checking that both corners have the same dimensionality
    pub fn new(p1: Vec<i64>, p2: Vec<i64>) -> Result<Self> {
        if p1.len() != p2.len() {
            return Err(QueryError::InvalidDimensions(format!(
                "box corners have different dimensionality: {} vs {}",
                p1.len(),
                p2.len()
            )));
        }
        if p1.is_empty() || p1.len() > 3 {
            return Err(QueryError::InvalidDimensions(format!(
                "box dimensionality must be between 1 and 3, got {}",
                p1.len()
            )));
        }
        Ok(Self { p1, p2 })
    }

    /// Box `[0, size)` on every axis
    pub fn from_size(size: &[i64]) -> Result<Self> {
        Self::new(vec![0; size.len()], size.to_vec())
    }

    pub fn pdim(&self) -> usize {
        self.p1.len()
    }

    /// Extent along each axis
    pub fn size(&self) -> Vec<i64> {
        self.p1.iter().zip(&self.p2).map(|(a, b)| b - a).collect()
    }

    /// True if any axis has `p2 <= p1`
    pub fn is_degenerate(&self) -> bool {
        self.p1.iter().zip(&self.p2).any(|(a, b)| b <= a)
    }

    /// True if `other` lies entirely inside this box
    pub fn contains(&self, other: &LogicBox) -> bool {
        self.pdim() == other.pdim()
            && (0..self.pdim()).all(|i| self.p1[i] <= other.p1[i] && other.p2[i] <= self.p2[i])
    }
}

impl fmt::Display for LogicBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}..{:?}", self.p1, self.p2)
    }
}

/// Requested region, possibly with fractional bounds (e.g. derived from a
/// viewport); the planner floors and ceils it onto the logic grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub p1: Vec<f64>,
    pub p2: Vec<f64>,
}

impl Region {
    pub fn new(p1: Vec<f64>, p2: Vec<f64>) -> Self {
        Self { p1, p2 }
    }

    pub fn pdim(&self) -> usize {
        self.p1.len()
    }
}

impl From<&LogicBox> for Region {
    fn from(b: &LogicBox) -> Self {
        Region {
            p1: b.p1.iter().map(|&v| v as f64).collect(),
            p2: b.p2.iter().map(|&v| v as f64).collect(),
        }
    }
}

impl From<LogicBox> for Region {
    fn from(b: LogicBox) -> Self {
        Region::from(&b)
    }
}

/// Upper bound on the number of cells a query may return
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PixelBudget {
    /// Total number of cells
    Total(u64),
    /// Per-axis budget (e.g. a viewport width and height), reduced to
    /// their product
    PerAxis(Vec<u64>),
}

impl PixelBudget {
    /// Scalar budget
    pub fn total(&self) -> u64 {
        match self {
            PixelBudget::Total(n) => *n,
            PixelBudget::PerAxis(v) => v.iter().fold(1u64, |acc, &n| acc.saturating_mul(n)),
        }
    }
}

impl From<u64> for PixelBudget {
    fn from(n: u64) -> Self {
        PixelBudget::Total(n)
    }
}
