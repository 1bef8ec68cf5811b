//! Runtime seam — every domain module reaches the container runtime
//! through the [`ContainerOps`] trait.

pub mod fake;
pub mod live;
pub mod ops;

pub use ops::ContainerOps;
