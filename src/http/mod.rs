//! HTTP/1.1 request parser and response serializer.
//!
//! Method, target, version, and headers are copied out of the connection's buffer into owned
//! `String`s rather than borrowing from it. Copying out sidesteps the lifetime tangle of keeping
//! a parse borrowed across more than one non-blocking read of the same connection, at the cost of
//! one allocation per header.

pub mod method;
pub mod request;
pub mod response;
pub mod status;
pub mod version;

pub use method::Method;
pub use request::{ParseError, ParseOutcome, Request};
pub use response::{Response, ResponseBody};
pub use status::Status;
pub use version::Version;
