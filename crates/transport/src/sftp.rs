//! Remote endpoint over SSH/SFTP using russh
//!
//! Session lifecycle: `connect` performs the TCP connection and handshake
//! and captures the host-key fingerprint; `authenticate` runs the configured
//! auth method and opens the SFTP subsystem channel. Every operation is
//! bounded by the configured session timeout.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, KeyboardInteractiveAuthResponse};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{load_secret_key, HashAlg, PublicKey};
use russh::Disconnect;
use russh_sftp::client::error::Error as SftpClientError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use driftsync_core::{
    Directory, FileAttrs, FileItem, FileKind, SessionStatus, SyncError, WatcherConfig,
};

use crate::{record_error, Endpoint, ErrorSlot};

/// Captures the server's host-key fingerprint during the handshake
struct HostKeyCapture {
    fingerprint: Arc<Mutex<Option<Vec<u8>>>>,
}

impl client::Handler for HostKeyCapture {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fp = server_public_key.fingerprint(HashAlg::Sha256);
        debug!(fingerprint = %fp, "captured host key fingerprint");
        *self.fingerprint.lock().expect("fingerprint slot poisoned") =
            Some(fp.as_bytes().to_vec());
        Ok(true)
    }
}

/// Adapter for the remote side of the watcher
pub struct SftpEndpoint {
    config: Arc<WatcherConfig>,
    timeout: Duration,
    status: Arc<AtomicU8>,
    fingerprint: Arc<Mutex<Option<Vec<u8>>>>,
    errors: ErrorSlot,
    session: Option<Handle<HostKeyCapture>>,
    sftp: Option<SftpSession>,
}

fn attrs_from_wire(wire: &FileAttributes) -> FileAttrs {
    FileAttrs {
        size: wire.size.unwrap_or(0),
        mtime: wire.mtime.unwrap_or(0),
        atime: wire.atime.unwrap_or(0),
        uid: wire.uid,
        gid: wire.gid,
        permissions: wire.permissions,
    }
}

fn attrs_to_wire(attrs: &FileAttrs) -> FileAttributes {
    let mut wire = FileAttributes::default();
    wire.size = Some(attrs.size);
    wire.mtime = Some(attrs.mtime);
    wire.atime = Some(attrs.atime);
    wire.uid = attrs.uid;
    wire.gid = attrs.gid;
    wire.permissions = attrs.permissions;
    wire
}

fn status_code_value(code: &StatusCode) -> u32 {
    match code {
        StatusCode::Ok => 0,
        StatusCode::Eof => 1,
        StatusCode::NoSuchFile => 2,
        StatusCode::PermissionDenied => 3,
        StatusCode::Failure => 4,
        StatusCode::BadMessage => 5,
        StatusCode::NoConnection => 6,
        StatusCode::ConnectionLost => 7,
        StatusCode::OpUnsupported => 8,
    }
}

fn map_sftp_error(err: SftpClientError, path: &str) -> SyncError {
    match err {
        SftpClientError::Status(status) => {
            SyncError::sftp(status_code_value(&status.status_code)).with_path(path)
        }
        other => SyncError::session(other.to_string()).with_path(path),
    }
}

impl SftpEndpoint {
    #[must_use]
    pub fn new(
        config: Arc<WatcherConfig>,
        status: Arc<AtomicU8>,
        fingerprint: Arc<Mutex<Option<Vec<u8>>>>,
        errors: ErrorSlot,
    ) -> Self {
        let timeout = Duration::from_secs(config.timeout_sec);
        Self {
            config,
            timeout,
            status,
            fingerprint,
            errors,
            session: None,
            sftp: None,
        }
    }

    fn status_now(&self) -> SessionStatus {
        SessionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: SessionStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    fn fail(&self, err: SyncError) -> SyncError {
        record_error(&self.errors, err)
    }

    fn subsystem(&self) -> Result<&SftpSession, SyncError> {
        self.sftp
            .as_ref()
            .ok_or_else(|| self.fail(SyncError::session("sftp subsystem is not open")))
    }

    /// Run one SFTP operation under the session timeout
    async fn bounded<T, F>(&self, path: &str, fut: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, SftpClientError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(self.fail(map_sftp_error(err, path))),
            Err(_) => Err(self.fail(
                SyncError::session("operation timed out waiting for the server").with_path(path),
            )),
        }
    }

    async fn auth_publickey(&mut self, pubkey: &str, privkey: &str) -> Result<(), SyncError> {
        let _ = pubkey; // the private key carries the public half
        let passphrase = self.config.password.as_deref().filter(|p| !p.is_empty());
        let key = load_secret_key(privkey, passphrase).map_err(|e| {
            self.fail(SyncError::transport(format!("cannot load private key: {e}")).with_path(privkey))
        })?;

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| SyncError::session("session is not connected"))?;
        let result = session
            .authenticate_publickey(
                &self.config.username,
                PrivateKeyWithHashAlg::new(Arc::new(key), None),
            )
            .await
            .map_err(|e| {
                record_error(&self.errors, SyncError::transport(format!("authentication error: {e}")))
            })?;

        if result.success() {
            info!(user = %self.config.username, "authenticated with public key");
            Ok(())
        } else {
            Err(self.fail(SyncError::transport("public key authentication rejected")))
        }
    }

    async fn auth_keyboard_interactive(&mut self, password: &str) -> Result<(), SyncError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| SyncError::session("session is not connected"))?;

        let mut response = session
            .authenticate_keyboard_interactive_start(&self.config.username, None)
            .await
            .map_err(|e| {
                record_error(&self.errors, SyncError::transport(format!("authentication error: {e}")))
            })?;

        loop {
            match response {
                KeyboardInteractiveAuthResponse::Success => {
                    info!(user = %self.config.username, "authenticated (keyboard-interactive)");
                    return Ok(());
                }
                KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                    // only single-prompt exchanges are supported: the prompt
                    // is answered with the configured password
                    if prompts.len() > 1 {
                        return Err(self.fail(SyncError::transport(
                            "keyboard-interactive requested more than one prompt",
                        )));
                    }
                    let answers = vec![password.to_string(); prompts.len()];
                    response = session
                        .authenticate_keyboard_interactive_respond(answers)
                        .await
                        .map_err(|e| {
                            record_error(
                                &self.errors,
                                SyncError::transport(format!("authentication error: {e}")),
                            )
                        })?;
                }
                _ => {
                    return Err(
                        self.fail(SyncError::transport("keyboard-interactive authentication failed"))
                    );
                }
            }
        }
    }

    async fn auth_password(&mut self, password: &str) -> Result<(), SyncError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| SyncError::session("session is not connected"))?;
        let result = session
            .authenticate_password(&self.config.username, password)
            .await
            .map_err(|e| {
                record_error(&self.errors, SyncError::transport(format!("authentication error: {e}")))
            })?;

        if result.success() {
            info!(user = %self.config.username, "authenticated with password");
            Ok(())
        } else {
            Err(self.fail(SyncError::transport("password authentication rejected")))
        }
    }
}

#[async_trait]
impl Endpoint for SftpEndpoint {
    fn root(&self) -> &str {
        &self.config.remote_path
    }

    async fn connect(&mut self) -> Result<(), SyncError> {
        if self.status_now() >= SessionStatus::Connected {
            return Ok(());
        }

        info!(
            host = %self.config.host,
            port = self.config.port,
            user = %self.config.username,
            "connecting"
        );

        let client_config = Arc::new(client::Config {
            inactivity_timeout: Some(self.timeout),
            ..client::Config::default()
        });
        let handler = HostKeyCapture {
            fingerprint: self.fingerprint.clone(),
        };

        let connecting = client::connect(
            client_config,
            (self.config.host.as_str(), self.config.port),
            handler,
        );
        let session = match tokio::time::timeout(self.timeout, connecting).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                return Err(self.fail(SyncError::transport(format!(
                    "cannot connect to {}:{}: {e}",
                    self.config.host, self.config.port
                ))));
            }
            Err(_) => {
                return Err(self.fail(SyncError::transport(format!(
                    "connection to {}:{} timed out",
                    self.config.host, self.config.port
                ))));
            }
        };

        self.session = Some(session);
        self.set_status(SessionStatus::Connected);
        Ok(())
    }

    async fn authenticate(&mut self) -> Result<(), SyncError> {
        if self.status_now() >= SessionStatus::Authenticated {
            return Ok(());
        }

        // public key is preferred; password-based methods are the fallback
        if self.config.has_key_auth() {
            let pubkey = self.config.pubkey.clone().unwrap_or_default();
            let privkey = self.config.privkey.clone().unwrap_or_default();
            self.auth_publickey(&pubkey, &privkey).await?;
        } else if self.config.has_password_auth() {
            let password = self.config.password.clone().unwrap_or_default();
            if self.config.use_keyboard {
                self.auth_keyboard_interactive(&password).await?;
            } else {
                self.auth_password(&password).await?;
            }
        } else {
            return Err(self.fail(SyncError::transport("no valid authentication is provided")));
        }

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| SyncError::session("session is not connected"))?;
        let channel = session.channel_open_session().await.map_err(|e| {
            record_error(&self.errors, SyncError::session(format!("cannot open channel: {e}")))
        })?;
        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            record_error(
                &self.errors,
                SyncError::session(format!("cannot request sftp subsystem: {e}")),
            )
        })?;
        let sftp = SftpSession::new(channel.into_stream()).await.map_err(|e| {
            record_error(&self.errors, map_sftp_error(e, &self.config.remote_path))
        })?;

        self.sftp = Some(sftp);
        self.set_status(SessionStatus::Authenticated);
        Ok(())
    }

    async fn disconnect(&mut self) {
        // dropping the subsystem closes its channel
        self.sftp = None;

        if let Some(session) = self.session.take() {
            if let Err(e) = session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
            {
                warn!(error = %e, "disconnect failed");
            }
        }

        self.set_status(SessionStatus::Disconnected);
    }

    async fn list_dir(&mut self, dir: &Directory) -> Result<Vec<FileItem>, SyncError> {
        let sftp = self.subsystem()?;
        let listing = self.bounded(&dir.abs, sftp.read_dir(&dir.abs)).await?;

        let mut items = Vec::new();
        for entry in listing {
            let leaf = entry.file_name();
            if leaf == "." || leaf == ".." {
                continue;
            }

            let attrs = attrs_from_wire(&entry.metadata());
            let kind = FileKind::from_mode(attrs.permissions.unwrap_or(0));
            let name = if dir.rela.is_empty() {
                leaf
            } else {
                format!("{}/{leaf}", dir.rela)
            };
            items.push(FileItem { name, kind, attrs });
        }

        Ok(items)
    }

    async fn stat(&mut self, path: &str) -> Result<FileAttrs, SyncError> {
        let sftp = self.subsystem()?;
        let wire = self.bounded(path, sftp.symlink_metadata(path)).await?;
        Ok(attrs_from_wire(&wire))
    }

    async fn set_stat(&mut self, path: &str, attrs: &FileAttrs) -> Result<(), SyncError> {
        let sftp = self.subsystem()?;
        self.bounded(path, sftp.set_metadata(path, attrs_to_wire(attrs)))
            .await
    }

    async fn open_read(
        &mut self,
        path: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, SyncError> {
        let sftp = self.subsystem()?;
        let file = self
            .bounded(path, sftp.open_with_flags(path, OpenFlags::READ))
            .await?;
        Ok(Box::new(file))
    }

    async fn open_write(
        &mut self,
        path: &str,
        perm: u32,
    ) -> Result<Box<dyn AsyncWrite + Send + Unpin>, SyncError> {
        // permissions land with finish_write; the write flags mirror a
        // create-or-truncate open
        let _ = perm;
        let sftp = self.subsystem()?;
        let flags = OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE;
        let file = self.bounded(path, sftp.open_with_flags(path, flags)).await?;
        Ok(Box::new(file))
    }

    async fn finish_write(&mut self, path: &str, attrs: &FileAttrs) -> Result<(), SyncError> {
        self.set_stat(path, attrs).await
    }

    async fn mkdir(&mut self, path: &str, attrs: &FileAttrs) -> Result<(), SyncError> {
        let existing = {
            let sftp = self.subsystem()?;
            self.bounded(path, sftp.symlink_metadata(path)).await
        };

        match existing {
            Ok(wire) => {
                let found = attrs_from_wire(&wire);
                if !FileKind::from_mode(found.permissions.unwrap_or(0)).is_dir() {
                    return Err(self.fail(
                        SyncError::custom(-1, "path exists but is not a directory").with_path(path),
                    ));
                }
                // refresh the stat only when it drifted
                if found != *attrs {
                    self.set_stat(path, attrs).await?;
                }
                Ok(())
            }
            Err(_) => {
                {
                    let sftp = self.subsystem()?;
                    self.bounded(path, sftp.create_dir(path)).await?;
                }
                self.set_stat(path, attrs).await
            }
        }
    }

    async fn remove_file(&mut self, path: &str) -> Result<(), SyncError> {
        let sftp = self.subsystem()?;
        self.bounded(path, sftp.remove_file(path)).await
    }

    async fn remove_dir_all(&mut self, path: &str) -> Result<(), SyncError> {
        // iterative post-order removal: files first, directories bottom-up
        let mut pending = vec![path.to_string()];
        let mut dirs = Vec::new();

        while let Some(current) = pending.pop() {
            let listing = {
                let sftp = self.subsystem()?;
                self.bounded(&current, sftp.read_dir(&current)).await?
            };

            for entry in listing {
                let leaf = entry.file_name();
                if leaf == "." || leaf == ".." {
                    continue;
                }
                let child = format!("{current}/{leaf}");
                let kind = FileKind::from_mode(entry.metadata().permissions.unwrap_or(0));
                if kind.is_dir() {
                    pending.push(child);
                } else {
                    let sftp = self.subsystem()?;
                    self.bounded(&child, sftp.remove_file(&child)).await?;
                }
            }

            dirs.push(current);
        }

        for dir in dirs.iter().rev() {
            let sftp = self.subsystem()?;
            self.bounded(dir, sftp.remove_dir(dir)).await?;
        }

        Ok(())
    }

    async fn read_link(&mut self, path: &str) -> Result<String, SyncError> {
        let sftp = self.subsystem()?;
        self.bounded(path, sftp.read_link(path)).await
    }

    async fn make_symlink(
        &mut self,
        path: &str,
        target: &str,
        _attrs: &FileAttrs,
    ) -> Result<(), SyncError> {
        // the protocol's setstat follows links, so the link's own times are
        // left to the server
        let existing = {
            let sftp = self.subsystem()?;
            self.bounded(path, sftp.symlink_metadata(path)).await
        };
        if let Ok(wire) = existing {
            let kind = FileKind::from_mode(wire.permissions.unwrap_or(0));
            if kind.is_symlink() {
                self.remove_file(path).await?;
            }
        }

        let sftp = self.subsystem()?;
        self.bounded(path, sftp.symlink(path, target)).await
    }
}
