pub mod apply;
pub mod destroy;
pub mod init;
pub mod outputs;
pub mod plan;
pub mod state;
pub mod validate;
