//! Database schema shared by every ruinmap process

pub mod init;

pub use init::{create_schema, init_database};
