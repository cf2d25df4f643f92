pub mod config;
pub mod daemon;
pub mod enroll;
pub mod helpers;
pub mod init;
pub mod report;
