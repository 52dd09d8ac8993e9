//! A small static file server that answers exactly one request per connection.
//!
//! Every connection goes through [`handler::ConnectionHandler`], which reads one
//! [`request::Request`], resolves it to a [`resource::Resource`], applies access control and
//! `If-Modified-Since`, sends one [`response::Response`] and appends one line to the
//! [`log::AccessLog`].

pub mod access;
pub mod config;
pub mod date;
pub mod files;
pub mod handler;
pub mod log;
pub mod mime;
pub mod request;
pub mod resource;
pub mod response;
pub mod server;
pub mod url;
