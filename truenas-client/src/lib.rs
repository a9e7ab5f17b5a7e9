//! TrueNAS iSCSI API Client Library
//!
//! Typed access to the iSCSI sharing resources of a TrueNAS appliance.
//!
//! This library provides:
//! - Typed records and their decode step (`types`)
//! - The `StorageApi` capability trait consumed by the audit
//! - A REST implementation with retry (`client`)
//! - A deterministic in-memory implementation for tests (`mock`)

pub mod api;
pub mod client;
pub mod error;
pub mod metrics;
pub mod mock;
pub mod types;

pub use api::StorageApi;
pub use client::{ClientConfig, TrueNasClient};
pub use error::{ApiError, DecodeError, Result};
pub use mock::{MockCall, MockClient};
pub use types::{
    Association, Extent, ExtentId, ExtentType, ResourceClass, SessionRecord, Target, TargetId,
};
