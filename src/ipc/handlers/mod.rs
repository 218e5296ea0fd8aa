pub mod admin;
pub mod core;
pub mod courses;
pub mod exams;
pub mod fees;
pub mod students;
