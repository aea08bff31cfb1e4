// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

use std::io;

use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("segment of {segment} bytes cannot hold {count} buffers of at least {min_buffer} bytes")]
    SegmentTooSmall {
        segment: usize,
        count: usize,
        min_buffer: usize,
    },

    #[error("ring layout mismatch on {field}: expected {expected}, found {found}")]
    LayoutMismatch {
        field: &'static str,
        expected: u64,
        found: u64,
    },

    #[error("ring segment has not been initialised by a consumer")]
    NotInitialized,

    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

/// Ordering violations detected by the drain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SequenceError {
    #[error("buffer carries sequence 0")]
    Zero,

    #[error("sequence {seq} seen twice in one batch")]
    Duplicate { seq: u64 },

    #[error("stale sequence {seq}, expected {expected}")]
    Stale { seq: u64, expected: u64 },

    #[error("sequence jumped forward to {seq}, expected {expected}")]
    Desync { seq: u64, expected: u64 },

    #[error("sequence jumped backwards to {seq}, expected {expected}")]
    Backwards { seq: u64, expected: u64 },
}
