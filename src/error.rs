//! Unified error handling for dynchan.
//!
//! This module provides the engine's error hierarchy, with automatic
//! conversions from the store and metric labeling.

use crate::db::StoreError;
use crate::platform::PlatformError;
use crate::state::{ChannelKey, TemplateError, TenantId};
use thiserror::Error;

// ============================================================================
// Engine Errors (lifecycle transitions and command operations)
// ============================================================================

/// Errors that can occur during a lifecycle transition or command.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The channel is not managed. Callers treat this as "nothing to do".
    #[error("channel {0} is not managed")]
    NotFound(ChannelKey),

    #[error("channel {0} no longer exists on the platform")]
    ResourceGone(ChannelKey),

    #[error("tenant {0} no longer exists on the platform")]
    TenantGone(TenantId),

    #[error("invalid template: {0}")]
    TemplateInvalid(#[from] TemplateError),

    /// `channel.resource_id` is 0 for tenant-level calls.
    #[error("platform call {operation} failed for {channel}: {source}")]
    PlatformCallFailed {
        operation: &'static str,
        channel: ChannelKey,
        #[source]
        source: PlatformError,
    },

    #[error("channel {channel} is a {actual} channel, expected {expected}")]
    WrongChannelType {
        channel: ChannelKey,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("channel {0} is already managed")]
    AlreadyManaged(ChannelKey),

    #[error("invalid hold duration '{0}', expected DD:HH:MM")]
    InvalidHold(String),

    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl EngineError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::ResourceGone(_) => "resource_gone",
            Self::TenantGone(_) => "tenant_gone",
            Self::TemplateInvalid(_) => "template_invalid",
            Self::PlatformCallFailed { .. } => "platform_call_failed",
            Self::WrongChannelType { .. } => "wrong_channel_type",
            Self::AlreadyManaged(_) => "already_managed",
            Self::InvalidHold(_) => "invalid_hold",
            Self::Store(_) => "store_error",
        }
    }

    /// Map a platform failure for `channel`.
    ///
    /// `Absent` means the channel itself is gone.
    pub fn platform(operation: &'static str, channel: ChannelKey, source: PlatformError) -> Self {
        match source {
            PlatformError::Absent => Self::ResourceGone(channel),
            source => Self::PlatformCallFailed {
                operation,
                channel,
                source,
            },
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => Self::NotFound(key),
            other => Self::Store(other),
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
