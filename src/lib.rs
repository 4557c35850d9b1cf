//! Relay router: the routing decision engine of a multi-server proxy client.

pub mod admin;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod registry;
pub mod routing;

pub use config::schema::RouterConfig;
pub use lifecycle::Shutdown;
pub use registry::server::Server;
pub use routing::{ResolveRequest, RoutingEngine};
