//! Raw HTTP/1.1 over TCP and TLS
//!
//! - `endpoint`: URL, method, and connection parameters
//! - `request`: request rendering
//! - `throttle`: sliced writes with progress and cancellation
//! - `transport`: connections and connection-close response reads
//! - `response`: header/body framing
//! - `tls`: certificate verification policies

mod endpoint;
mod request;
mod response;
mod throttle;
mod tls;
mod transport;

pub use endpoint::*;
pub use request::*;
pub use response::*;
pub use throttle::*;
pub use tls::*;
pub use transport::*;
