pub mod models;         // request / function-directory JSON
pub mod client;         // resolution + request_bundle over the invoker seams
pub mod http;           // HTTPS function gateway (reqwest)

pub use client::{resolve_function, FunctionDirectory, FunctionInvoker, ProvisioningClient};
pub use http::HttpFunctionGateway;
pub use models::ResolvedFunction;
