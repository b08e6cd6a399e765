pub mod branches;
pub mod client;
pub mod commits;
pub mod init;
pub mod push;
pub mod serve;
pub mod status;
