use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Returned from `supersede_lease` when the conflict check in section
    /// 4.1 fails; callers log and drop the offending packet without
    /// mutating the database.
    #[error("lease conflict on {ip}: identifiers don't match the existing binding")]
    LeaseConflict { ip: std::net::Ipv4Addr },
    #[error("no such lease handle")]
    NoSuchLease,
    #[error("no such pool handle")]
    NoSuchPool,
    #[error("journal I/O error: {0}")]
    Journal(#[from] std::io::Error),
    #[error("journal parse error: {0}")]
    JournalParse(String),
}

pub type Result<T> = std::result::Result<T, Error>;
