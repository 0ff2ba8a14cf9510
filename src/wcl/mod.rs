pub mod client;
pub mod fetcher;
pub mod queries;
pub mod token;
pub mod transport;

pub use client::GqlClient;
pub use fetcher::{FetchRequest, ReportFetcher};
pub use token::{Credentials, TokenManager};
pub use transport::GraphQlTransport;
