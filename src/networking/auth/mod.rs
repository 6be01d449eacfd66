//! XML-RPC login bootstrap

pub mod login;
pub mod types;
pub mod xmlrpc;

pub use login::LoginClient;
pub use types::{LoginParams, LoginResponse, LoginStatus};
pub use xmlrpc::XmlRpcClient;
