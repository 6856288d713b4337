pub mod archive;
pub mod layout;
pub mod s3_service;
