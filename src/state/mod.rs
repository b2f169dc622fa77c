//! State management module.
//!
//! Contains the managed-channel model, naming rules, and the per-channel lock table.

pub mod channel;
pub mod locks;
pub mod naming;

pub use channel::{
    ChannelConfig, ChannelKey, ChannelKind, DEFAULT_TEMPLATE, IMPORT_CHANNEL_NUMBER,
    ManagedChannel, OccupantId, ResourceId, TenantId,
};
pub use locks::LockManager;
pub use naming::TemplateError;
