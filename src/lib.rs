// Environment-derived startup configuration
pub mod config;

// Connection string parsing and OAuth2 refresh-token exchange
pub mod credentials;

// Redirect targets and rendered HTTP responses
pub mod redirect;

// Sequential accept-and-reply loop
pub mod server;
