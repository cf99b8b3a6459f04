pub mod routes;
pub mod stream;

pub use stream::WebState;
