//! REST client
//!
//! Requests are grouped into buckets by route signature, drained FIFO per bucket
//! and released through a global requests-per-second throttle. 429 responses lock
//! the bucket (or every bucket, when global) for the advertised delay.

pub mod bucket;
pub mod dispatcher;
pub mod error;
pub mod gateway_bot;
pub mod global;
pub mod headers;
pub mod invalid;
pub mod request;
pub mod route;
pub mod transport;

pub use bucket::BucketSnapshot;
pub use dispatcher::RateLimitedDispatcher;
pub use error::{RestError, RestResult};
pub use gateway_bot::{GatewayBot, SessionStartLimit};
pub use global::GlobalThrottle;
pub use headers::RateLimitHeaders;
pub use request::{HttpRequest, Method, RestRequest, RestResponse};
pub use route::RouteData;
pub use transport::{HttpTransport, ReqwestTransport};
