pub mod actor;
pub mod adjustment;
pub mod leave;
pub mod overtime;
pub mod shift;
pub mod timesheet;
