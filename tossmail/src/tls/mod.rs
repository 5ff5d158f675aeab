//! TLS certificate storage and SNI resolution

mod store;

pub use store::{CertificateStore, StoredCertificate};
