//! Instance naming and generation for the UAV persistent-monitoring solver.

pub mod generate;
mod name;

pub use generate::{
    from_distance_matrix, from_solomon, GenerateError, GenerateParams, GeneratedInstance,
    TimeScale,
};
pub use name::{InstanceName, NameError, INSTANCE_SUFFIX};
