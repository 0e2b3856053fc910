pub mod materializer;
pub mod overtime;
pub mod recalibration;
pub mod resolver;
