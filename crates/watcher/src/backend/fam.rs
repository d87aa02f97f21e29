//! File alteration monitor socket
//!
//! A single long-lived Unix socket connection to an external monitor daemon.
//! Requests and replies are newline-delimited JSON:
//!
//! ```text
//! -> {"op":"monitor","id":1,"path":"/home/u/docs","dir":true}
//! -> {"op":"cancel","id":1}
//! <- {"id":1,"code":"created","name":"report.txt"}
//! ```
//!
//! A reply with an empty `name` (or the watched path itself) is about the
//! watched entry. End of stream means the daemon went away.

use super::{duplicate_release, BackendHandle, Driver, RawEvent, Signal, Target};
use crate::error::BackendError;
use ahash::AHashMap;
use dirwatch_core::Method;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Request<'a> {
    Monitor { id: u64, path: &'a Path, dir: bool },
    Cancel { id: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Code {
    Changed,
    Deleted,
    Created,
    Moved,
    Exists,
    EndExist,
    Acknowledge,
}

#[derive(Debug, Deserialize)]
struct Reply {
    id: u64,
    code: Code,
    #[serde(default)]
    name: String,
}

struct Monitored {
    path: PathBuf,
    is_dir: bool,
}

pub struct FamDriver {
    stream: UnixStream,
    requests: AHashMap<u64, Monitored>,
    next_id: u64,
    buf: Vec<u8>,
}

impl FamDriver {
    pub fn connect(socket: &Path) -> Result<Self, BackendError> {
        let unavailable = |e: std::io::Error| BackendError::Unavailable {
            method: Method::Fam,
            reason: format!("{}: {}", socket.display(), e),
        };
        let stream = UnixStream::connect(socket).map_err(unavailable)?;
        stream.set_nonblocking(true).map_err(unavailable)?;
        debug!("Connected to alteration monitor at {}", socket.display());

        Ok(Self {
            stream,
            requests: AHashMap::new(),
            next_id: 0,
            buf: Vec::new(),
        })
    }

    fn send(&mut self, request: &Request<'_>) -> Result<(), BackendError> {
        let mut line =
            serde_json::to_vec(request).map_err(|e| BackendError::Protocol(e.to_string()))?;
        line.push(b'\n');
        self.stream.write_all(&line).map_err(|e| match e.kind() {
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => BackendError::Lost,
            _ => BackendError::Protocol(e.to_string()),
        })
    }

    fn translate(&self, reply: Reply, out: &mut Vec<RawEvent>) {
        let Some(request) = self.requests.get(&reply.id) else {
            trace!("Reply for cancelled request {}", reply.id);
            return;
        };

        let child = child_name(&request.path, &reply.name);
        let signal = match (reply.code, child) {
            (Code::Changed, None) => Signal::Changed,
            (Code::Changed, Some(name)) => Signal::ChildChanged { name },
            (Code::Deleted | Code::Moved, None) => Signal::Deleted,
            (Code::Deleted | Code::Moved, Some(name)) => Signal::ChildDeleted {
                name,
                is_dir: false,
            },
            (Code::Created, None) => Signal::Rescan,
            (Code::Created, Some(name)) => {
                let is_dir = request.is_dir && request.path.join(&name).is_dir();
                Signal::ChildCreated { name, is_dir }
            }
            (Code::Exists | Code::EndExist | Code::Acknowledge, _) => return,
        };
        out.push(RawEvent::entry(request.path.clone(), signal));
    }

    fn parse_lines(&mut self, out: &mut Vec<RawEvent>) {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            match serde_json::from_slice::<Reply>(line) {
                Ok(reply) => self.translate(reply, out),
                Err(e) => warn!("Ignoring malformed monitor reply: {}", e),
            }
        }
    }
}

/// Child name a reply refers to, or None for the entry itself
fn child_name(entry: &Path, name: &str) -> Option<OsString> {
    if name.is_empty() || Path::new(name) == entry {
        return None;
    }
    let name = Path::new(name);
    if name.is_absolute() {
        name.file_name().map(|n| n.to_os_string())
    } else {
        Some(name.as_os_str().to_os_string())
    }
}

impl Driver for FamDriver {
    fn method(&self) -> Method {
        Method::Fam
    }

    fn supports(&self, _target: &Target<'_>) -> bool {
        true
    }

    fn acquire(&mut self, target: &Target<'_>) -> Result<BackendHandle, BackendError> {
        if !target.path.exists() {
            return Err(BackendError::acquire(
                target.path,
                std::io::Error::from(ErrorKind::NotFound),
            ));
        }

        let id = self.next_id + 1;
        self.send(&Request::Monitor {
            id,
            path: target.path,
            dir: target.is_dir,
        })?;
        self.next_id = id;
        self.requests.insert(
            id,
            Monitored {
                path: target.path.to_path_buf(),
                is_dir: target.is_dir,
            },
        );

        Ok(BackendHandle {
            method: Method::Fam,
            token: id,
        })
    }

    fn release(&mut self, handle: BackendHandle) {
        if self.requests.remove(&handle.token).is_none() {
            duplicate_release(handle);
            return;
        }
        if let Err(e) = self.send(&Request::Cancel { id: handle.token }) {
            debug!("Failed to cancel monitor request {}: {}", handle.token, e);
        }
    }

    fn drain(&mut self, out: &mut Vec<RawEvent>) -> Result<(), BackendError> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.parse_lines(out);
                    return Err(BackendError::Lost);
                }
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return Err(BackendError::Lost),
            }
        }
        self.parse_lines(out);
        Ok(())
    }

    fn watch_count(&self) -> usize {
        self.requests.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::os::unix::net::UnixListener;
    use tempfile::TempDir;

    #[test]
    fn test_child_name() {
        let entry = Path::new("/d");
        assert_eq!(child_name(entry, ""), None);
        assert_eq!(child_name(entry, "/d"), None);
        assert_eq!(child_name(entry, "a.txt"), Some(OsString::from("a.txt")));
        assert_eq!(child_name(entry, "/d/b.txt"), Some(OsString::from("b.txt")));
    }

    #[test]
    fn test_reply_decoding() {
        let reply: Reply = serde_json::from_str(r#"{"id":3,"code":"end_exist"}"#).unwrap();
        assert_eq!(reply.id, 3);
        assert_eq!(reply.code, Code::EndExist);
        assert!(reply.name.is_empty());

        let request = serde_json::to_string(&Request::Monitor {
            id: 1,
            path: Path::new("/d"),
            dir: true,
        })
        .unwrap();
        assert_eq!(request, r#"{"op":"monitor","id":1,"path":"/d","dir":true}"#);
    }

    #[test]
    fn test_monitor_round_trip_over_socket() {
        let temp_dir = TempDir::new().unwrap();
        let socket = temp_dir.path().join("fam.sock");
        let watched = temp_dir.path().join("docs");
        std::fs::create_dir(&watched).unwrap();
        let listener = UnixListener::bind(&socket).unwrap();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert!(line.contains(r#""op":"monitor""#));

            let mut writer = stream;
            writer
                .write_all(b"{\"id\":1,\"code\":\"exists\",\"name\":\"\"}\n")
                .unwrap();
            writer
                .write_all(b"{\"id\":1,\"code\":\"deleted\",\"name\":\"old.txt\"}\n")
                .unwrap();
            writer
                .write_all(b"{\"id\":1,\"code\":\"changed\",\"name\":\"\"}\n")
                .unwrap();
        });

        let mut driver = FamDriver::connect(&socket).unwrap();
        driver
            .acquire(&Target {
                path: &watched,
                is_dir: true,
                network: false,
            })
            .unwrap();
        server.join().unwrap();

        let mut events = Vec::new();
        // The server closed its end after writing
        let result = driver.drain(&mut events);
        assert!(matches!(result, Err(BackendError::Lost)));
        assert_eq!(
            events,
            vec![
                RawEvent::entry(
                    watched.clone(),
                    Signal::ChildDeleted {
                        name: "old.txt".into(),
                        is_dir: false
                    }
                ),
                RawEvent::entry(watched.clone(), Signal::Changed),
            ]
        );
    }
}
