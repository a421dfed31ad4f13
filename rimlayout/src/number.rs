// SPDX-License-Identifier: MIT

use serde::{Deserialize, Deserializer};

use crate::error::*;

/// Size factor letters, indexed by their power.
const SIZE_FACTORS: [char; 5] = ['B', 'K', 'M', 'G', 'T'];

/// Units tried by [`produce_human_number`], largest first.
const HUMAN_UNITS: [(&str, i64); 8] = [
    ("TiB", 1 << 40),
    ("TB", 1_000_000_000_000),
    ("GiB", 1 << 30),
    ("GB", 1_000_000_000),
    ("MiB", 1 << 20),
    ("MB", 1_000_000),
    ("KiB", 1 << 10),
    ("KB", 1_000),
];

/// A human friendly size as written in a layout document (`"4GiB"`, `"-10%"`, `4096`).
///
/// Kept as text until the normalizer knows which grammar applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeSpec(String);

impl SizeSpec {
    pub fn new(spec: impl Into<String>) -> Self {
        Self(spec.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the spec as an absolute byte count.
    pub fn bytes(&self) -> LayoutResult<i64> {
        parse_human_number(&self.0)
    }

    /// Parses the spec relative to `max` (percentages and negative offsets).
    pub fn relative_to(&self, max: i64) -> LayoutResult<i64> {
        parse_relative_number(max, &self.0)
    }
}

impl From<u64> for SizeSpec {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for SizeSpec {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for SizeSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SizeSpecVisitor;

        impl<'de> serde::de::Visitor<'de> for SizeSpecVisitor {
            type Value = SizeSpec;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a size like 4096, '512MiB', '4GB', '-10%'")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(SizeSpec::new(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(SizeSpec(value.to_string()))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(SizeSpec(value.to_string()))
            }
        }

        deserializer.deserialize_any(SizeSpecVisitor)
    }
}

impl std::fmt::Display for SizeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parses sizes like `4GiB`, `4GB`, `4G`, `-500MiB` or `512`.
///
/// The first unit letter selects the power (`B`, `K`, `M`, `G`, `T`); what follows
/// selects the base: nothing or `iB` means 1024, `B` means 1000.
pub fn parse_human_number(operand: &str) -> LayoutResult<i64> {
    let invalid = |why: &str| LayoutError::InvalidAdjustment(format!("{why} in {operand:?}"));

    let upper = operand.trim().to_ascii_uppercase();
    let (negative, rest) = match upper.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, upper.as_str()),
    };

    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let (digits, suffix) = rest.split_at(digits_end);
    if digits.is_empty() {
        return Err(invalid("no number"));
    }
    let number: i64 = digits.parse().map_err(|_| invalid("number too large"))?;

    let multiplier = if suffix.is_empty() {
        1
    } else {
        let mut chars = suffix.chars();
        let factor = chars.next();
        let power = SIZE_FACTORS
            .iter()
            .position(|&c| Some(c) == factor)
            .ok_or_else(|| invalid("unknown size factor"))?;
        let base: i64 = match chars.as_str() {
            "" | "IB" => 1024,
            "B" => 1000,
            _ => return Err(invalid("unknown block factor")),
        };
        if power == 0 && !chars.as_str().is_empty() {
            return Err(invalid("unknown block factor"));
        }
        base.pow(power as u32)
    };

    let value = number
        .checked_mul(multiplier)
        .ok_or_else(|| invalid("number too large"))?;
    Ok(if negative { -value } else { value })
}

/// Formats `number` with the largest unit that divides it exactly.
pub fn produce_human_number(number: i64) -> String {
    for (suffix, size) in HUMAN_UNITS {
        if number % size == 0 {
            return format!("{}{suffix}", number / size);
        }
    }
    number.to_string()
}

/// Parses a size relative to `max`: `90%` of it, an absolute value,
/// or a negative value taken off it.
pub fn parse_relative_number(max: i64, spec: &str) -> LayoutResult<i64> {
    let spec = spec.trim();
    if let Some(percent) = spec.strip_suffix('%') {
        let percent: i64 = percent.trim().parse().map_err(|_| {
            LayoutError::InvalidAdjustment(format!("invalid percentage {spec:?}"))
        })?;
        let value = (i128::from(max) * i128::from(percent)).div_euclid(100);
        return i64::try_from(value)
            .map_err(|_| LayoutError::InvalidAdjustment(format!("{spec:?} of {max} overflows")));
    }

    let value = parse_human_number(spec)?;
    if value < 0 {
        max.checked_add(value)
            .ok_or_else(|| LayoutError::InvalidAdjustment(format!("{spec:?} overflows")))
    } else {
        Ok(value)
    }
}
