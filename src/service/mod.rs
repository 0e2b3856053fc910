//! Transactional operations. Each public function loads what it needs with
//! row locks, runs the pure engine, writes the result and commits before
//! any notification goes out.

pub mod attendance;
pub mod leave;
pub mod overtime;
