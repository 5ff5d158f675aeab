pub mod commands;
pub mod server;
pub mod session;

pub use server::SmtpServer;
pub use session::{SmtpContext, SmtpSession};
