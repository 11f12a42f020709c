pub mod config;
pub mod dispatcher;
pub mod exception;
pub mod headers;
pub mod logger;
pub mod param;
pub mod request;
pub mod response;
pub mod route;
pub mod schema;
pub mod server;
pub mod typed;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use exception::Exception;
pub use headers::{HeaderValue, Headers};
pub use logger::{ConsoleLogger, LogLevel, Logger, NullLogger};
pub use param::{HttpRequestMethod, HttpVersion};
pub use request::{RawRequest, Request};
pub use response::{Body, ErrorFormat, Response, SerializedResponse};
pub use route::{match_route, Matcher, PathMatcher, Route, RouteKind, RouteTable};
pub use schema::{compile, validate, Schema, SchemaCache, Validator};
pub use server::{serve_connection, Server};
pub use typed::{TypedRequest, TypedRoute, Validated};
