//! Mutating admission webhook that keeps data-transparency annotations on
//! pods and refuses EU-restricted pods on clusters with nodes elsewhere.

pub mod admission;
pub mod config;
pub mod errors;
pub mod locations;
pub mod patch;
pub mod policy;
pub mod tags;
pub mod webhook;

pub use admission::{AdmissionRequest, Admitter};
pub use config::PolicyConfig;
pub use errors::AdmitError;
pub use locations::{KubeLocationProvider, LocationProvider, LocationSet};
