//! Built-in modules: two sinks and two small producers.

pub mod json_sink;
pub mod memory_sink;
pub mod parent_domains;
pub mod url_hosts;

pub use json_sink::JsonSink;
pub use memory_sink::MemorySink;
pub use parent_domains::ParentDomains;
pub use url_hosts::UrlHosts;
