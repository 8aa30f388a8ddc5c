pub mod access;
pub mod attachments;
pub mod file_store;
pub mod grading;
pub mod submissions;
