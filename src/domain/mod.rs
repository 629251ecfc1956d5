//! Domain model of a payment claim and the ports through which the pipeline
//! reaches the outside world.

pub mod claim;
pub mod outcome;
pub mod ports;
