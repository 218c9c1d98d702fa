pub mod cleaner;
pub mod greenhouse;
pub mod http;
pub mod remoteok;

pub use cleaner::HtmlCleaner;
pub use greenhouse::GreenhouseConnector;
pub use http::HttpClient;
pub use remoteok::RemoteOkConnector;
