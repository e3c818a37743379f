pub mod http;
pub mod id;
