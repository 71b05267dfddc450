//! SSH sessions backed by libssh2

use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Map, Value};
use ssh2::Session;
use tracing::debug;

use crate::remote::RemoteError;
use crate::remote::executor::{ChannelOutput, RemoteSession};

const DEFAULT_PORT: u16 = 22;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound on every blocking libssh2 call (handshake, auth, channel setup)
const SESSION_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 16 * 1024;

/// Credentials taken from a task's `ssh-auth` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshAuth {
    pub user: String,
    pub password: Option<String>,
    pub identity_file: Option<PathBuf>,
    pub port: u16,
}

impl SshAuth {
    /// Reads `user`, `password`, `identityfile` and `port`
    pub fn from_map(auth: &Map<String, Value>) -> Result<Self, RemoteError> {
        let user = auth
            .get("user")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| RemoteError::InvalidAuth("missing user".to_string()))?;

        let port = Self::port_from_map(auth)?;

        Ok(Self {
            user: user.to_string(),
            password: auth.get("password").and_then(Value::as_str).map(str::to_string),
            identity_file: auth
                .get("identityfile")
                .and_then(Value::as_str)
                .map(PathBuf::from),
            port,
        })
    }

    /// Reads only `port`, defaulting to 22
    pub fn port_from_map(auth: &Map<String, Value>) -> Result<u16, RemoteError> {
        match auth.get("port") {
            None | Some(Value::Null) => Ok(DEFAULT_PORT),
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| RemoteError::InvalidAuth(format!("invalid port {n}"))),
            Some(Value::String(s)) => s
                .parse()
                .map_err(|_| RemoteError::InvalidAuth(format!("invalid port {s}"))),
            Some(other) => Err(RemoteError::InvalidAuth(format!("invalid port {other}"))),
        }
    }

    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }
}

/// An authenticated SSH connection
pub struct SshSession {
    session: Session,
}

impl SshSession {
    /// Connects and authenticates, preferring the identity file, then the
    /// password, then the local agent.
    pub fn connect(host: &str, auth: &SshAuth) -> Result<Self, RemoteError> {
        debug!(host, port = auth.port, user = %auth.user, "Opening ssh session");
        let tcp = open_tcp(host, auth.port, CONNECT_TIMEOUT).map_err(|source| {
            RemoteError::Connect {
                host: host.to_string(),
                source,
            }
        })?;

        let mut session = Session::new()?;
        session.set_timeout(SESSION_TIMEOUT.as_millis() as u32);
        session.set_tcp_stream(tcp);
        session.handshake()?;

        match (&auth.identity_file, &auth.password) {
            (Some(key), _) => session.userauth_pubkey_file(&auth.user, None, key, None)?,
            (None, Some(password)) => session.userauth_password(&auth.user, password)?,
            (None, None) => session.userauth_agent(&auth.user)?,
        }

        if !session.authenticated() {
            return Err(RemoteError::AuthFailed {
                host: host.to_string(),
                user: auth.user.clone(),
            });
        }

        Ok(Self { session })
    }
}

impl RemoteSession for SshSession {
    fn run(&mut self, command: &str, pty: bool) -> Result<ChannelOutput, RemoteError> {
        let mut channel = self.session.channel_session()?;
        if pty {
            channel
                .request_pty("xterm", None, None)
                .map_err(|e| RemoteError::Pty(e.to_string()))?;
        }
        channel.exec(command)?;

        // stdout and stderr share one channel window
        let drained = {
            let mut out = channel.stream(0);
            let mut err = channel.stderr();
            self.session.set_blocking(false);
            let drained = drain_streams(&mut out, &mut err, || channel.eof());
            self.session.set_blocking(true);
            drained
        };
        let (stdout, stderr) = drained?;

        channel.wait_close()?;
        let exit_signal = channel.exit_signal()?.exit_signal;
        // A signalled process reports no meaningful exit status
        let exit_code = match exit_signal {
            Some(_) => None,
            None => Some(channel.exit_status()?),
        };

        Ok(ChannelOutput {
            stdout,
            stderr,
            exit_code,
            exit_signal,
        })
    }
}

/// Tries every resolved address of `host`, each bounded by `timeout`
fn open_tcp(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("{host} did not resolve"))
    }))
}

/// Reads two non-blocking streams alternately until `at_eof` reports the
/// end and neither stream yields more data.
fn drain_streams<O: Read, E: Read>(
    stdout: &mut O,
    stderr: &mut E,
    mut at_eof: impl FnMut() -> bool,
) -> io::Result<(String, String)> {
    let mut out = Vec::new();
    let mut err = Vec::new();
    loop {
        let read_out = read_available(stdout, &mut out)?;
        let read_err = read_available(stderr, &mut err)?;
        if read_out || read_err {
            continue;
        }
        if at_eof() {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    Ok((
        String::from_utf8_lossy(&out).into_owned(),
        String::from_utf8_lossy(&err).into_owned(),
    ))
}

/// One read; `false` when nothing was available
fn read_available(stream: &mut impl Read, buffer: &mut Vec<u8>) -> io::Result<bool> {
    let mut chunk = [0u8; READ_CHUNK];
    match stream.read(&mut chunk) {
        Ok(n) => {
            buffer.extend_from_slice(&chunk[..n]);
            Ok(n > 0)
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;
    use std::net::TcpListener;

    /// Remote command whose stdout stays open until its stderr is consumed
    struct Remote {
        stderr_chunks_left: Cell<usize>,
        stdout_closed: Cell<bool>,
    }

    struct StdoutStream<'a>(&'a Remote);
    struct StderrStream<'a>(&'a Remote);

    impl Read for StdoutStream<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let remote = self.0;
            if remote.stderr_chunks_left.get() > 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            if remote.stdout_closed.get() {
                return Ok(0);
            }
            remote.stdout_closed.set(true);
            buf[..5].copy_from_slice(b"done\n");
            Ok(5)
        }
    }

    impl Read for StderrStream<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let left = self.0.stderr_chunks_left.get();
            if left == 0 {
                return Ok(0);
            }
            self.0.stderr_chunks_left.set(left - 1);
            buf[..1024].fill(b'e');
            Ok(1024)
        }
    }

    struct Scripted(Vec<io::Result<&'static [u8]>>);

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() {
                return Ok(0);
            }
            let bytes = self.0.remove(0)?;
            buf[..bytes.len()].copy_from_slice(bytes);
            Ok(bytes.len())
        }
    }

    fn data(bytes: &'static [u8]) -> io::Result<&'static [u8]> {
        Ok(bytes)
    }

    fn fail(kind: io::ErrorKind) -> io::Result<&'static [u8]> {
        Err(kind.into())
    }

    #[test]
    fn test_drain_reads_stderr_while_stdout_is_blocked() {
        let remote = Remote {
            stderr_chunks_left: Cell::new(4000),
            stdout_closed: Cell::new(false),
        };
        let (stdout, stderr) = drain_streams(
            &mut StdoutStream(&remote),
            &mut StderrStream(&remote),
            || remote.stdout_closed.get(),
        )
        .unwrap();

        assert_eq!(stdout, "done\n");
        assert_eq!(stderr.len(), 4000 * 1024);
    }

    #[test]
    fn test_drain_waits_for_eof_and_keeps_buffered_data() {
        let mut stdout = Scripted(vec![
            fail(io::ErrorKind::WouldBlock),
            data(b"one "),
            fail(io::ErrorKind::WouldBlock),
            data(b"two"),
        ]);
        let mut stderr = Scripted(vec![fail(io::ErrorKind::WouldBlock), data(b"warn")]);
        let mut polls = 0;

        let (out, err) = drain_streams(&mut stdout, &mut stderr, || {
            polls += 1;
            polls > 2
        })
        .unwrap();
        assert_eq!(out, "one two");
        assert_eq!(err, "warn");
    }

    #[test]
    fn test_drain_propagates_read_errors() {
        let mut stdout = Scripted(vec![fail(io::ErrorKind::ConnectionReset)]);
        let mut stderr = Scripted(Vec::new());
        let err = drain_streams(&mut stdout, &mut stderr, || true).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_open_tcp_connects_and_reports_refusal() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(open_tcp("127.0.0.1", port, Duration::from_secs(5)).is_ok());

        drop(listener);
        assert!(open_tcp("127.0.0.1", port, Duration::from_secs(5)).is_err());
    }

    fn auth(doc: Value) -> Result<SshAuth, RemoteError> {
        match doc {
            Value::Object(map) => SshAuth::from_map(&map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_auth_defaults_port() {
        let auth = auth(json!({ "user": "root", "password": "secret" })).unwrap();
        assert_eq!(auth.port, 22);
        assert_eq!(auth.password.as_deref(), Some("secret"));
        assert_eq!(auth.identity_file, None);
    }

    #[test]
    fn test_auth_accepts_string_port_and_identity() {
        let auth = auth(json!({ "user": "deploy", "port": "2222", "identityfile": "/k/id" })).unwrap();
        assert_eq!(auth.port, 2222);
        assert_eq!(auth.identity_file, Some(PathBuf::from("/k/id")));
    }

    #[test]
    fn test_port_alone_is_readable_without_user() {
        let map = json!({ "port": 2200 });
        assert_eq!(SshAuth::port_from_map(map.as_object().unwrap()).unwrap(), 2200);
        assert_eq!(SshAuth::port_from_map(&Map::new()).unwrap(), 22);
    }

    #[test]
    fn test_auth_requires_user() {
        assert!(matches!(
            auth(json!({ "password": "x" })),
            Err(RemoteError::InvalidAuth(_))
        ));
        assert!(matches!(
            auth(json!({ "user": "root", "port": 70000 })),
            Err(RemoteError::InvalidAuth(_))
        ));
    }
}
