pub mod error;
pub mod consts;
pub mod version;
pub mod paths;
pub mod io;
pub mod cube;
pub mod indexing;
pub mod headers;
pub mod calibrate;
pub mod select;
pub mod register;
pub mod collapse;
pub mod mueller;
pub mod polarimetry;
pub mod products;
pub mod organization;
pub mod pipeline;

/// Version of the running pipeline, recorded in generated configurations
/// and checked against loaded ones before execution.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
