//! Primary store backends.
//!
//! The trait seam lets tests run entirely in memory while production deploys
//! against SQL; both apply a [`traits::WriteUnit`] atomically.

pub mod memory;
pub mod sql;
pub mod traits;

pub use memory::MemoryStateStore;
pub use sql::SqlStateStore;
pub use traits::{StateStore, StoreError, VehicleFilter, VehiclePage, WriteUnit};
