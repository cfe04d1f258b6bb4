pub mod comm;
pub mod constants;
pub mod focalplane;
pub mod mapmaking;
pub mod noise;
pub mod observation;
pub mod operators;
pub mod pipeline;
pub mod pixels;
pub mod schedule;
pub mod todmc_errors;
