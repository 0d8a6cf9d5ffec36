//! Cooperative command/response dispatch over a framed transport: inbound
//! requests are routed to registered handlers (native or auto-exposed rhai
//! script functions); outbound requests are correlated to their replies by
//! a child-generated id prefix.

mod error;
mod method;
mod server;

pub use error::{HandlerError, RpcError};
pub use method::{MethodMeta, ParamMeta};
pub use server::CommandServer;
