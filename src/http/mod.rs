//! Connection layer: destinations, requests, responses and the client
//! that moves them over TCP or TLS.

mod client;
mod destination;
mod ratelimit;
mod request;
mod response;

pub use client::{Client, ClientConfig, HttpStream};
pub use destination::{Destination, Protocol};
pub use ratelimit::RateLimiter;
pub use request::{Headers, Request, RequestLine};
pub use response::Response;
