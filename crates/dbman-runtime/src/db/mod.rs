mod connection;
mod session;

pub use connection::Database;
pub use session::{PgSession, Session};
