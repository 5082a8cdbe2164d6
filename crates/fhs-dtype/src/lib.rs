#![forbid(unsafe_code)]

/// Element dtypes a generated tensor may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl DType {
    pub const ALL: [Self; 11] = [
        Self::Bool,
        Self::I8,
        Self::I16,
        Self::I32,
        Self::I64,
        Self::U8,
        Self::U16,
        Self::U32,
        Self::U64,
        Self::F32,
        Self::F64,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }

    #[must_use]
    pub const fn item_size(self) -> usize {
        match self {
            Self::Bool | Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    /// Native width in bits, as used when drawing elements.
    #[must_use]
    pub const fn bit_width(self) -> u32 {
        (self.item_size() * 8) as u32
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(Self::Bool),
            "i8" | "int8" => Some(Self::I8),
            "i16" | "int16" => Some(Self::I16),
            "i32" | "int32" => Some(Self::I32),
            "i64" | "int64" => Some(Self::I64),
            "u8" | "uint8" => Some(Self::U8),
            "u16" | "uint16" => Some(Self::U16),
            "u32" | "uint32" => Some(Self::U32),
            "u64" | "uint64" => Some(Self::U64),
            "f32" | "float32" => Some(Self::F32),
            "f64" | "float64" => Some(Self::F64),
            _ => None,
        }
    }

    /// Returns `true` if this is a signed or unsigned integer type (not Bool).
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::I8
                | Self::I16
                | Self::I32
                | Self::I64
                | Self::U8
                | Self::U16
                | Self::U32
                | Self::U64
        )
    }

    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    #[must_use]
    pub const fn is_bool(self) -> bool {
        matches!(self, Self::Bool)
    }

    /// Rounds `value` to the nearest value representable in this dtype.
    ///
    /// Floats narrower than f64 lose precision; bools collapse to 0/1;
    /// integers truncate toward zero and saturate at the dtype bounds.
    #[must_use]
    pub fn quantize(self, value: f64) -> f64 {
        match self {
            Self::F64 => value,
            Self::F32 => f64::from(value as f32),
            Self::Bool => {
                if value != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::I8 => f64::from(value as i8),
            Self::I16 => f64::from(value as i16),
            Self::I32 => f64::from(value as i32),
            Self::I64 => (value as i64) as f64,
            Self::U8 => f64::from(value as u8),
            Self::U16 => f64::from(value as u16),
            Self::U32 => f64::from(value as u32),
            Self::U64 => (value as u64) as f64,
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Promotion for binary elementwise ops.
///
/// - `promote(Bool, X) = X`
/// - same kind: the wider type
/// - signed with unsigned: the smallest signed type covering both, F64 for U64
/// - integers with F32: F32 up to 16 bits, F64 beyond
/// - any F64 operand: F64
#[must_use]
pub const fn promote(lhs: DType, rhs: DType) -> DType {
    use DType::*;

    match (lhs, rhs) {
        (Bool, x) | (x, Bool) => x,
        (F64, _) | (_, F64) => F64,
        (F32, I8 | I16 | U8 | U16 | F32) | (I8 | I16 | U8 | U16, F32) => F32,
        (F32, _) | (_, F32) => F64,

        (I8, I8) => I8,
        (I8, I16) | (I16, I8) | (I16, I16) => I16,
        (I8 | I16 | I32, I32) | (I32, I8 | I16) => I32,
        (I8 | I16 | I32 | I64, I64) | (I64, I8 | I16 | I32) => I64,

        (U8, U8) => U8,
        (U8, U16) | (U16, U8) | (U16, U16) => U16,
        (U8 | U16 | U32, U32) | (U32, U8 | U16) => U32,
        (U8 | U16 | U32 | U64, U64) | (U64, U8 | U16 | U32) => U64,

        (U8, I8) | (I8, U8) | (U8, I16) | (I16, U8) => I16,
        (U8, I32) | (I32, U8) => I32,
        (U16, I8 | I16 | I32) | (I8 | I16 | I32, U16) => I32,
        (U8 | U16 | U32, I64) | (I64, U8 | U16 | U32) => I64,
        (U32, I8 | I16 | I32) | (I8 | I16 | I32, U32) => I64,
        (U64, _) | (_, U64) => F64,
    }
}

#[cfg(test)]
mod tests {
    use super::{DType, promote};

    #[test]
    fn promotion_is_commutative() {
        for &lhs in &DType::ALL {
            for &rhs in &DType::ALL {
                assert_eq!(promote(lhs, rhs), promote(rhs, lhs), "{lhs:?}/{rhs:?}");
            }
        }
    }

    #[test]
    fn promotion_expectations_hold() {
        assert_eq!(promote(DType::Bool, DType::I32), DType::I32);
        assert_eq!(promote(DType::I32, DType::I64), DType::I64);
        assert_eq!(promote(DType::I32, DType::F32), DType::F64);
        assert_eq!(promote(DType::I16, DType::F32), DType::F32);
        assert_eq!(promote(DType::F32, DType::F64), DType::F64);
        assert_eq!(promote(DType::U8, DType::I8), DType::I16);
        assert_eq!(promote(DType::U64, DType::I64), DType::F64);
    }

    #[test]
    fn names_round_trip() {
        for dtype in DType::ALL {
            assert_eq!(DType::parse(dtype.name()), Some(dtype));
        }
        assert_eq!(DType::parse("float32"), Some(DType::F32));
        assert_eq!(DType::parse("complex64"), None);
    }

    #[test]
    fn classification_partitions_dtypes() {
        for dtype in DType::ALL {
            let kinds = [dtype.is_bool(), dtype.is_integer(), dtype.is_float()];
            assert_eq!(kinds.iter().filter(|&&k| k).count(), 1, "{dtype:?}");
        }
        assert_eq!(DType::F32.bit_width(), 32);
        assert_eq!(DType::F64.bit_width(), 64);
        assert_eq!(DType::Bool.bit_width(), 8);
    }

    #[test]
    fn quantize_respects_width() {
        let third = 1.0_f64 / 3.0;
        assert_eq!(DType::F64.quantize(third), third);
        assert_ne!(DType::F32.quantize(third), third);
        assert_eq!(DType::F32.quantize(third), f64::from(third as f32));
        assert_eq!(DType::Bool.quantize(-2.5), 1.0);
        assert_eq!(DType::U8.quantize(300.0), 255.0);
    }
}
