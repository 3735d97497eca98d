pub mod grading;
pub mod healing;
pub mod prediction;
