pub mod accounts;
pub mod attendance;
pub mod classes;
pub mod core;
pub mod guardians;
pub mod sessions;
pub mod students;
pub mod teachers;
