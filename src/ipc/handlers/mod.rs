pub mod assessments;
pub mod core;
pub mod grades;
pub mod records;
