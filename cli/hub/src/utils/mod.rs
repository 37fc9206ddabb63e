pub mod init;
pub mod logger;
pub mod message;
