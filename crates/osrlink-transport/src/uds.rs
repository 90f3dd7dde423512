use std::io::ErrorKind;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::IpcStream;

/// Listening Unix domain socket owned by the host side of a session.
///
/// The socket file is removed on drop, unless something else has replaced it
/// at the same path in the meantime.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    created_inode: (u64, u64),
}

impl UnixDomainSocket {
    /// Permission mode applied to the socket file.
    pub const SOCKET_MODE: u32 = 0o600;

    /// `sockaddr_un.sun_path` capacity.
    #[cfg(target_os = "linux")]
    pub const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    pub const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on `path`.
    ///
    /// A stale socket file at `path` is removed first; any other kind of file
    /// is left alone and reported as a bind error.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_err = |source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        match std::fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.file_type().is_socket() => {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(&path).map_err(bind_err)?;
            }
            Ok(_) => {
                return Err(bind_err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(bind_err(err)),
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(Self::SOCKET_MODE))
            .map_err(bind_err)?;
        let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "listening for renderer connection");

        Ok(Self {
            listener,
            path,
            created_inode: (metadata.dev(), metadata.ino()),
        })
    }

    /// Accept a pending connection without blocking.
    ///
    /// Returns `Ok(None)` when nobody has connected yet. The returned stream
    /// is always in blocking mode, whatever the platform inherits from the
    /// listener.
    pub fn try_accept(&self) -> Result<Option<IpcStream>> {
        self.listener
            .set_nonblocking(true)
            .map_err(TransportError::Accept)?;
        match self.listener.accept() {
            Ok((stream, _addr)) => {
                stream.set_nonblocking(false)?;
                debug!(path = ?self.path, "accepted connection");
                Ok(Some(IpcStream::from_unix(stream)))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    /// Connect to a listening socket (single attempt).
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        let stream =
            std::os::unix::net::UnixStream::connect(path).map_err(|e| TransportError::Connect {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!(?path, "connected to host socket");
        Ok(IpcStream::from_unix(stream))
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        let (expected_dev, expected_ino) = self.created_inode;
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "removing socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path replaced; leaving it in place");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "osrlink-uds-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn bind_accept_connect() {
        let dir = scratch_dir("basic");
        let sock_path = dir.join("host.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        assert!(sock_path.exists());

        let path_clone = sock_path.clone();
        let handle = std::thread::spawn(move || {
            let mut client = UnixDomainSocket::connect(&path_clone).unwrap();
            client.write_all(b"ready").unwrap();
        });

        let mut server = loop {
            if let Some(stream) = listener.try_accept().unwrap() {
                break stream;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        };
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ready");

        handle.join().unwrap();

        drop(listener);
        assert!(!sock_path.exists(), "socket file should be removed on drop");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn try_accept_without_peer_returns_none() {
        let dir = scratch_dir("try-none");
        let listener = UnixDomainSocket::bind(dir.join("host.sock")).unwrap();

        assert!(listener.try_accept().unwrap().is_none());

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn try_accept_returns_blocking_stream() {
        let dir = scratch_dir("try-some");
        let sock_path = dir.join("host.sock");
        let listener = UnixDomainSocket::bind(&sock_path).unwrap();

        let mut client = UnixDomainSocket::connect(&sock_path).unwrap();
        let mut server = loop {
            if let Some(stream) = listener.try_accept().unwrap() {
                break stream;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        };

        let writer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(30));
            client.write_all(b"late").unwrap();
        });

        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"late");

        writer.join().unwrap();
        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn connect_before_bind_is_not_listening() {
        let dir = scratch_dir("early");
        let err = UnixDomainSocket::connect(dir.join("missing.sock")).unwrap_err();
        assert!(err.is_not_listening());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = UnixDomainSocket::bind(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn socket_file_is_owner_only() {
        let dir = scratch_dir("perms");
        let sock_path = dir.join("perm.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bind_refuses_to_replace_regular_file() {
        let dir = scratch_dir("regular");
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = UnixDomainSocket::bind(&sock_path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn drop_leaves_replaced_path_alone() {
        let dir = scratch_dir("replaced");
        let sock_path = dir.join("drop.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        std::fs::remove_file(&sock_path).unwrap();
        std::fs::write(&sock_path, b"replacement-file").unwrap();

        drop(listener);
        assert!(sock_path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
