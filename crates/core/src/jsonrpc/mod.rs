// JSON-RPC 2.0 codec, validation and transport runtime

pub mod client;
pub mod error;
pub mod message;
pub mod server;
pub mod transport;
pub mod validate;

pub use client::{CallError, JsonRpcClient};
pub use error::{ErrorKind, JsonRpcError};
pub use message::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, RequestId, ResponseOutcome};
pub use server::{JsonRpcServer, MethodDescriptor};
pub use transport::{FnTransport, LocalTransport, RpcEndpoint, Transport, TransportError};
pub use validate::{parse, validate_batch, validate_request, validate_response, ValidationResult};
