//! Device session collaborator
//!
//! The remote side of a backup: open a management session to one router and
//! run its configuration export. The trait pair keeps the transport behind a
//! seam so the orchestrator (and its tests) never touch SSH directly. The
//! concrete transport is an SSH exec of the RouterOS `/export` command;
//! sessions disconnect on drop.
//!
//! Everything here is deliberately blocking — callers run it on the blocking
//! thread pool. No timeout is layered on top: the transport's own behavior
//! applies, and a stuck router costs only its own slot in a sequential run.

use crate::backup::BackupError;
use crate::records::DeviceRecord;
use std::io::Read;
use std::net::TcpStream;

/// Export command sent to the router once a session is up.
const EXPORT_COMMAND: &str = "/export";

/// An open session to one router.
pub trait DeviceSession: Send {
    /// Run the export command and return the raw configuration text.
    fn export(&mut self) -> Result<String, BackupError>;
}

/// Opens sessions. One implementation per transport; tests substitute fakes.
pub trait DeviceConnector: Send + Sync {
    fn connect(&self, record: &DeviceRecord) -> Result<Box<dyn DeviceSession>, BackupError>;
}

/// SSH transport via libssh2: TCP connect, handshake, password auth.
pub struct SshConnector;

impl SshConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceConnector for SshConnector {
    fn connect(&self, record: &DeviceRecord) -> Result<Box<dyn DeviceSession>, BackupError> {
        let unreachable = |e: &dyn std::fmt::Display| BackupError::Unreachable(e.to_string());

        let tcp = TcpStream::connect((record.host.as_str(), record.port))
            .map_err(|e| unreachable(&e))?;
        let mut session = ssh2::Session::new().map_err(|e| unreachable(&e))?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| unreachable(&e))?;
        session
            .userauth_password(&record.user, &record.password)
            .map_err(|e| unreachable(&e))?;
        Ok(Box::new(SshDeviceSession { session }))
    }
}

struct SshDeviceSession {
    session: ssh2::Session,
}

impl DeviceSession for SshDeviceSession {
    fn export(&mut self) -> Result<String, BackupError> {
        let failed = |e: &dyn std::fmt::Display| BackupError::ExportFailed(e.to_string());

        let mut channel = self.session.channel_session().map_err(|e| failed(&e))?;
        channel.exec(EXPORT_COMMAND).map_err(|e| failed(&e))?;
        let mut output = String::new();
        channel.read_to_string(&mut output).map_err(|e| failed(&e))?;
        let _ = channel.wait_close();
        Ok(output)
    }
}
