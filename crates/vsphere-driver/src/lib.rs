//! Machine lifecycle entry points for vSphere
//!
//! Decodes provider spec and secrets, picks the backend matching the spec
//! version and maps provider errors to status codes.

#![deny(missing_docs)]

pub mod config;
pub mod decode;
pub mod dispatcher;
pub mod error;
pub mod plugin;
pub mod request;
pub mod volumes;

pub use config::DriverConfig;
pub use decode::{decode_request, DecodedRequest, Purpose};
pub use dispatcher::Dispatcher;
pub use error::{MachineError, MachineErrorCode};
pub use plugin::{MachinePlugin, MachineResult};
pub use request::{
    CreateMachineResponse, DeleteMachineResponse, GetMachineStatusResponse, GetVolumeIdsResponse,
    ListMachinesRequest, ListMachinesResponse, MachineRequest, ShutDownMachineResponse,
};
