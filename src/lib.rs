//! Cross-cloud block-storage control plane.
//!
//! The crate exposes a [`Provider`] abstraction for creating, inspecting,
//! copying, tagging and deleting volumes and snapshots, with
//! implementations for Amazon EBS, Google persistent disks, IBM SoftLayer
//! block storage and Scaleway Block Storage. Restoring a snapshot into
//! another zone goes through the [`ZoneResolver`], and every asynchronous
//! backend operation is awaited with the bounded poller in [`poll`].

pub mod aws;
pub mod config;
pub mod error;
pub mod gcp;
pub mod ibm;
pub mod model;
pub mod poll;
pub mod provider;
pub mod registry;
pub mod scaleway;
pub mod tags;
pub mod test_support;
pub mod zone;

pub use aws::EbsProvider;
pub use config::{ConfigError, ScalewayConfig, TagConfig};
pub use error::{ClientError, ProviderError, ResourceKind};
pub use gcp::PdProvider;
pub use ibm::SoftlayerProvider;
pub use model::{
    ProviderKind, Resource, Snapshot, Tags, UnknownProviderKind, Volume, VolumeRequest,
    VolumeRequestBuilder,
};
pub use poll::{
    Backoff, CallContext, CancelHandle, CancelReason, CancelToken, PollError, cancel_pair,
    wait_with_backoff, wait_with_backoff_with_retries,
};
pub use provider::{BackendFuture, Provider, RestoreTargets, SnapshotRestoreTargets};
pub use registry::{ProviderArgs, ProviderFactory, Registry};
pub use scaleway::{SbsProvider, ScalewayBlockClient};
pub use tags::{CLUSTER_NAME_TAG, VERSION_TAG};
pub use zone::{NodeZoneInventory, StaticZoneDirectory, ZoneDirectory, ZoneResolver};
