//! The single-connection self-healing layer: [`SteadyConnection`] and
//! [`SteadyCursor`]. The [`Pool`](crate::pool::Pool) multiplexes these
//! across concurrent users, but neither type here knows the pool exists.

mod connection;
mod cursor;

pub use connection::{FailoverOverride, SteadyConfig, SteadyConnection};
pub use cursor::SteadyCursor;
