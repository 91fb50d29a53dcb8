pub mod apigateway;
pub mod endpoints;
pub mod retry;
pub mod services;

pub use endpoints::EndpointsTranslator;
