//! Thin abstraction over the external container runtime: build, run/start/stop/rm,
//! apply manifests, list, logs, exec. The core never shells out to `docker`/`podman`
//! itself — everything funnels through [`RuntimeDriver`].

pub mod docker;
pub mod driver;

pub use docker::DockerDriver;
pub use driver::{
    ContainerSpec, ContainerState, ContainerStatus, ContainerSummary, ManifestDescriptor,
    PortBinding, Protocol, RuntimeDriver, RuntimeError, RuntimeResult,
};
