pub mod init;
pub mod run;
pub mod show;
pub mod types;
pub mod validate;
