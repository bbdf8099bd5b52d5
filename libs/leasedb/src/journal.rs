//! The append-only lease journal: `write_lease` appends a textual record,
//! `commit_leases` flushes and fsyncs, and `maybe_rewrite` compacts the file
//! once enough commits have accumulated.
//!
//! The full `{lease|host|group|class|subclass} <key> { ... } ;` grammar is
//! shared with `dhcpd.conf` parsing and lives in the `confparse` crate,
//! which parses this module's own output back into a `LeaseDb` on startup.
//! This module only needs to *write* lease records and to replay them
//! during crash recovery, so it carries a small self-contained formatter
//! rather than depending on the parser crate (which depends on this one).

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::lease::Lease;

/// Rewrite cadence named in the external-interfaces section: the lease
/// file is rewritten atomically on startup and after roughly this many
/// interim commits.
pub const REWRITE_AFTER_COMMITS: u64 = 1000;

pub struct Journal {
    path: PathBuf,
    writer: BufWriter<File>,
    commits_since_rewrite: u64,
}

fn to_epoch_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs()
}

fn from_epoch_secs(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(":")
}

fn unhex(s: &str) -> Vec<u8> {
    s.split(':')
        .filter(|p| !p.is_empty())
        .filter_map(|p| u8::from_str_radix(p, 16).ok())
        .collect()
}

impl Journal {
    /// Open (creating if necessary) the journal at `path` for appending.
    /// Per section 4.1's crash-recovery rule, the caller is responsible for
    /// refusing to start when the file is missing but its parent directory
    /// exists -- see `Journal::open_existing`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Journal {
            path,
            writer: BufWriter::new(file),
            commits_since_rewrite: 0,
        })
    }

    /// Open an existing journal for appending, refusing to silently create
    /// one: a missing lease file with an existing parent directory
    /// indicates a prior rewrite failed partway through.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                if parent.exists() {
                    return Err(Error::Journal(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!(
                            "lease file {} missing but parent directory exists; refusing to start \
                             (likely a failed prior rewrite)",
                            path.display()
                        ),
                    )));
                }
            }
        }
        Self::create(path)
    }

    pub fn write_lease(&mut self, lease: &Lease) -> Result<()> {
        writeln!(self.writer, "lease {} {{", lease.ip)?;
        writeln!(self.writer, "  starts {};", to_epoch_secs(lease.starts))?;
        writeln!(self.writer, "  ends {};", to_epoch_secs(lease.ends))?;
        writeln!(self.writer, "  cltt {};", to_epoch_secs(lease.cltt))?;
        writeln!(self.writer, "  binding state {:?};", lease.binding_state)?;
        writeln!(self.writer, "  hardware {};", hex(&lease.hw_addr))?;
        if !lease.uid.is_empty() {
            writeln!(self.writer, "  uid {};", hex(&lease.uid))?;
        }
        writeln!(self.writer, "  flags {};", lease.flags.bits())?;
        writeln!(self.writer, "}}")?;
        Ok(())
    }

    /// Flush buffered writes and fsync -- per the commit protocol, a
    /// decision offered to a client isn't durable until this returns `Ok`.
    pub fn commit_leases(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.commits_since_rewrite += 1;
        if self.commits_since_rewrite >= REWRITE_AFTER_COMMITS {
            info!(path = %self.path.display(), "commit threshold reached, compacting journal");
        }
        Ok(())
    }

    /// Rewrite the journal as a compacted snapshot of `leases` under a
    /// temporary name, then atomically rename it into place. Called on
    /// startup unconditionally, and from the commit path once
    /// `REWRITE_AFTER_COMMITS` interim commits have accumulated.
    pub fn maybe_rewrite<'a>(&mut self, leases: impl Iterator<Item = &'a Lease>) -> Result<()> {
        if self.commits_since_rewrite < REWRITE_AFTER_COMMITS {
            return Ok(());
        }
        self.rewrite(leases)
    }

    pub fn rewrite<'a>(&mut self, leases: impl Iterator<Item = &'a Lease>) -> Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut tmp = BufWriter::new(file);
            for lease in leases {
                writeln!(tmp, "lease {} {{", lease.ip)?;
                writeln!(tmp, "  starts {};", to_epoch_secs(lease.starts))?;
                writeln!(tmp, "  ends {};", to_epoch_secs(lease.ends))?;
                writeln!(tmp, "  cltt {};", to_epoch_secs(lease.cltt))?;
                writeln!(tmp, "  binding state {:?};", lease.binding_state)?;
                writeln!(tmp, "  hardware {};", hex(&lease.hw_addr))?;
                if !lease.uid.is_empty() {
                    writeln!(tmp, "  uid {};", hex(&lease.uid))?;
                }
                writeln!(tmp, "  flags {};", lease.flags.bits())?;
                writeln!(tmp, "}}")?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_data()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.commits_since_rewrite = 0;
        Ok(())
    }
}

/// One lease record recovered from the journal during replay. Field
/// parsing is intentionally forgiving (unknown lines are skipped) since the
/// full grammar lives in `confparse`; this is only exercised during crash
/// recovery before the parser crate has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredLease {
    pub ip: std::net::Ipv4Addr,
    pub starts: SystemTime,
    pub ends: SystemTime,
    pub cltt: SystemTime,
    pub hw_addr: Vec<u8>,
    pub uid: Vec<u8>,
    pub flags: u8,
}

/// Replay a journal file written by `write_lease`/`rewrite`, returning one
/// `RecoveredLease` per record in file order (later records for the same
/// IP supersede earlier ones, same as re-running `supersede_lease`).
pub fn replay(path: impl AsRef<Path>) -> Result<Vec<RecoveredLease>> {
    let text = match fs::read_to_string(path.as_ref()) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Journal(e)),
    };
    let mut out = Vec::new();
    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        let line = line.trim();
        if !line.starts_with("lease ") {
            continue;
        }
        let ip_str = line
            .trim_start_matches("lease ")
            .trim_end_matches('{')
            .trim();
        let ip: std::net::Ipv4Addr = match ip_str.parse() {
            Ok(ip) => ip,
            Err(_) => {
                warn!(%line, "skipping unparseable lease record header");
                continue;
            }
        };
        let mut rec = RecoveredLease {
            ip,
            starts: UNIX_EPOCH,
            ends: UNIX_EPOCH,
            cltt: UNIX_EPOCH,
            hw_addr: Vec::new(),
            uid: Vec::new(),
            flags: 0,
        };
        for field_line in lines.by_ref() {
            let field_line = field_line.trim();
            if field_line == "}" {
                break;
            }
            let field_line = field_line.trim_end_matches(';');
            if let Some(rest) = field_line.strip_prefix("starts ") {
                rec.starts = from_epoch_secs(rest.trim().parse().unwrap_or(0));
            } else if let Some(rest) = field_line.strip_prefix("ends ") {
                rec.ends = from_epoch_secs(rest.trim().parse().unwrap_or(0));
            } else if let Some(rest) = field_line.strip_prefix("cltt ") {
                rec.cltt = from_epoch_secs(rest.trim().parse().unwrap_or(0));
            } else if let Some(rest) = field_line.strip_prefix("hardware ") {
                rec.hw_addr = unhex(rest.trim());
            } else if let Some(rest) = field_line.strip_prefix("uid ") {
                rec.uid = unhex(rest.trim());
            } else if let Some(rest) = field_line.strip_prefix("flags ") {
                rec.flags = rest.trim().parse().unwrap_or(0);
            }
        }
        out.push(rec);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::BindingState;
    use std::net::Ipv4Addr;

    fn dummy_lease(ip: Ipv4Addr) -> Lease {
        let pool_handle: crate::pool::PoolHandle = {
            let mut slab: crate::arena::Slab<crate::pool::Pool> = crate::arena::Slab::new();
            slab.alloc(crate::pool::Pool::new(
                crate::pool::GroupId(0),
                crate::pool::SharedNetworkId(0),
            ))
        };
        let mut lease = Lease::new(ip, pool_handle);
        lease.hw_addr = vec![0x52, 0x54, 0x00, 0x12, 0x34, 0x56];
        lease.uid = vec![1, 2, 3];
        lease.binding_state = BindingState::Active;
        lease.ends = from_epoch_secs(1000);
        lease
    }

    #[test]
    fn write_then_replay_round_trips_key_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dhcpd.leases");
        let mut journal = Journal::create(&path).unwrap();
        let lease = dummy_lease(Ipv4Addr::new(192, 0, 2, 10));
        journal.write_lease(&lease).unwrap();
        journal.commit_leases().unwrap();
        drop(journal);

        let recovered = replay(&path).unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].ip, Ipv4Addr::new(192, 0, 2, 10));
        assert_eq!(recovered[0].hw_addr, vec![0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
        assert_eq!(recovered[0].uid, vec![1, 2, 3]);
        assert_eq!(recovered[0].ends, from_epoch_secs(1000));
    }

    #[test]
    fn missing_file_with_existing_parent_refuses_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dhcpd.leases");
        let err = Journal::open_existing(&path).unwrap_err();
        assert!(matches!(err, Error::Journal(_)));
    }

    #[test]
    fn rewrite_compacts_to_latest_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dhcpd.leases");
        let mut journal = Journal::create(&path).unwrap();
        let lease = dummy_lease(Ipv4Addr::new(192, 0, 2, 20));
        journal.rewrite(std::iter::once(&lease)).unwrap();
        let recovered = replay(&path).unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].ip, Ipv4Addr::new(192, 0, 2, 20));
    }
}
