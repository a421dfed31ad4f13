// SPDX-License-Identifier: MIT

use core::fmt;

/// Unified error type for layout resolution, normalization and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// A referenced layout document (or one of its parents) does not exist.
    ConfigNotFound(String),
    /// No partition with the requested number or label.
    PartitionNotFound(String),
    InvalidLayout(String),
    InvalidAdjustment(String),
    InvalidSize(String),
    /// A child layout reorders partitions it shares with its parent.
    ConflictingPartitionOrder(String),
    MismatchedRootfsFormat(String),
    MismatchedRootfsBlocks(String),
    MissingEraseBlockField(String),
    ExcessFailureProbability(String),
    UnalignedPartition(String),
    ExpandNandImpossible(String),
    ExcessPartitionSize(String),
}

impl LayoutError {
    pub fn kind(&self) -> &'static str {
        match self {
            LayoutError::ConfigNotFound(_) => "config not found",
            LayoutError::PartitionNotFound(_) => "partition not found",
            LayoutError::InvalidLayout(_) => "invalid layout",
            LayoutError::InvalidAdjustment(_) => "invalid adjustment",
            LayoutError::InvalidSize(_) => "invalid size",
            LayoutError::ConflictingPartitionOrder(_) => "conflicting partition order",
            LayoutError::MismatchedRootfsFormat(_) => "mismatched rootfs format",
            LayoutError::MismatchedRootfsBlocks(_) => "mismatched rootfs erase blocks",
            LayoutError::MissingEraseBlockField(_) => "missing erase block field",
            LayoutError::ExcessFailureProbability(_) => "excess failure probability",
            LayoutError::UnalignedPartition(_) => "unaligned partition",
            LayoutError::ExpandNandImpossible(_) => "expand impossible on NAND",
            LayoutError::ExcessPartitionSize(_) => "excess partition size",
        }
    }

    pub fn msg(&self) -> &str {
        match self {
            LayoutError::ConfigNotFound(msg)
            | LayoutError::PartitionNotFound(msg)
            | LayoutError::InvalidLayout(msg)
            | LayoutError::InvalidAdjustment(msg)
            | LayoutError::InvalidSize(msg)
            | LayoutError::ConflictingPartitionOrder(msg)
            | LayoutError::MismatchedRootfsFormat(msg)
            | LayoutError::MismatchedRootfsBlocks(msg)
            | LayoutError::MissingEraseBlockField(msg)
            | LayoutError::ExcessFailureProbability(msg)
            | LayoutError::UnalignedPartition(msg)
            | LayoutError::ExpandNandImpossible(msg)
            | LayoutError::ExcessPartitionSize(msg) => msg,
        }
    }

    /// Structural violations: the document shape itself is wrong.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            LayoutError::InvalidLayout(_)
                | LayoutError::ConflictingPartitionOrder(_)
                | LayoutError::ConfigNotFound(_)
        )
    }

    /// Arithmetic violations: the shape is fine but some size does not work out.
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            LayoutError::InvalidSize(_)
                | LayoutError::InvalidAdjustment(_)
                | LayoutError::UnalignedPartition(_)
                | LayoutError::ExcessPartitionSize(_)
                | LayoutError::ExcessFailureProbability(_)
        )
    }
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.msg())
    }
}

impl std::error::Error for LayoutError {}

pub type LayoutResult<T = ()> = Result<T, LayoutError>;
