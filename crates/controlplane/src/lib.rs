//! `controlplane` crate: the boundary between the provisioning core and the
//! remote control-plane API.
//!
//! Every remote call is an [`Operation`]: a named, async, zero-argument call
//! that returns a [`ResourceDescriptor`] or a classified [`OpError`]. The
//! [`ControlPlane`] trait is the create / lookup / delete surface that the
//! ready-made operations in [`ops`] are bound to.

pub mod descriptor;
pub mod error;
pub mod memory;
pub mod mock;
pub mod ops;
pub mod traits;

pub use descriptor::{ResourceDescriptor, ResourceKind};
pub use error::{ErrorKind, OpError};
pub use memory::InMemoryControlPlane;
pub use traits::{
    operation_fn, ControlPlane, FnOperation, Idempotency, LatencyClass, Operation, OperationInput,
};
