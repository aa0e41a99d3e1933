pub mod attendance;
pub mod bundle;
pub mod classes;
pub mod core;
pub mod grades;
pub mod reports;
pub mod settings;
pub mod students;
pub mod subjects;
