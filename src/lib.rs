pub mod config;
pub mod credentials;
pub mod decode;
pub mod error;
pub mod forecast;
pub mod history;
pub mod http;
pub mod manager;
pub mod models;
pub mod providers;

#[cfg(test)]
pub(crate) mod test_support;
