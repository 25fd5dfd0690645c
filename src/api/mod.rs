mod http;
mod routes;
mod server;

pub use server::serve;
