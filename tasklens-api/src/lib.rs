pub mod http;
pub mod tasks;
