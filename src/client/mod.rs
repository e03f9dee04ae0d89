pub mod session;
pub mod transport;

pub use session::BatchSession;
pub use transport::StorageTransport;
