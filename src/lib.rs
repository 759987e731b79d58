pub mod capture;
pub mod config;
pub mod endpoint;
pub mod middleware;
pub mod normalize;
pub mod observability;
pub mod sampling;
pub mod server;
pub mod trace;
