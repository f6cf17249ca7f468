//! Device filesystem engine built on raw-REPL execution.
//!
//! Every operation here is a Python snippet (see [`snippets`]) executed
//! through a live [`RawSession`], with the output parsed host-side. The
//! engine keeps a bounded [`OpLog`] so a UI can show recent activity;
//! errors are logged there and still returned to the caller.
//!
//! There are no retries at this layer. A `Remote`, `Protocol` or
//! `Timeout` failure surfaces unchanged.

pub mod oplog;
pub mod snippets;

use std::time::Duration;

use log::debug;

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::raw_repl::RawSession;

pub use oplog::{OpKind, OpLog, OpRecord, OpStatus};

/// Options for [`DeviceFs::write_file`].
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Payload bytes per write command. Each chunk is a separate
    /// execution, so this trades round-trips against command length.
    pub chunk_size: usize,
    /// Write straight to the destination path instead of going through
    /// a temp file and rename.
    pub direct: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            chunk_size: 128,
            direct: false,
        }
    }
}

/// Filesystem usage in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FsStats {
    /// Total filesystem size.
    pub total: u64,
    /// Free space.
    pub free: u64,
    /// Used space (`total - free`).
    pub used: u64,
}

/// Board and interpreter identity, captured once per query.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    /// Board/machine description from `os.uname()`.
    pub machine: String,
    /// MicroPython release (e.g. "1.22.0").
    pub release: String,
    /// Full version/build string.
    pub version: String,
    /// `.mpy` bytecode ABI identifier, "0" when unavailable.
    pub mpy: String,
    /// Module search path entries.
    pub sys_path: Vec<String>,
}

/// Node kind in a filesystem snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FsNodeKind {
    /// Directory.
    Dir,
    /// Regular file.
    File,
}

/// One node of a point-in-time filesystem snapshot.
///
/// Snapshots are rebuilt from scratch on every [`DeviceFs::walk`]; they
/// are never cached or patched incrementally.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FsNode {
    /// Entry name (root is "/").
    pub name: String,
    /// Full device-side path.
    pub path: String,
    /// Directory or file.
    pub kind: FsNodeKind,
    /// File size in bytes; zero for directories.
    pub size: u64,
    /// Child nodes, in listing order.
    pub children: Vec<FsNode>,
}

impl FsNode {
    fn dir(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            kind: FsNodeKind::Dir,
            size: 0,
            children: Vec::new(),
        }
    }

    /// Find a direct child by name.
    pub fn child(&self, name: &str) -> Option<&FsNode> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// Parse the `total free` line from the statvfs snippet.
fn parse_stats(line: &str) -> Result<FsStats> {
    let mut parts = line.split_whitespace();
    let total: u64 = parts
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::Protocol(format!("bad statvfs output: {line:?}")))?;
    let free: u64 = parts
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::Protocol(format!("bad statvfs output: {line:?}")))?;
    Ok(FsStats {
        total,
        free,
        used: total.saturating_sub(free),
    })
}

/// Parse the `|`-delimited identity line from the uname snippet.
fn parse_device_info(line: &str) -> Result<DeviceInfo> {
    let fields: Vec<&str> = line.trim_end().splitn(5, '|').collect();
    if fields.len() != 5 {
        return Err(Error::Protocol(format!(
            "bad device info output: {line:?}"
        )));
    }
    Ok(DeviceInfo {
        machine: fields[0].to_string(),
        release: fields[1].to_string(),
        version: fields[2].to_string(),
        mpy: fields[3].to_string(),
        sys_path: fields[4]
            .split(':')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

/// Rebuild the tree from `kind|path|size` listing lines.
///
/// The listing prints parents before children, but missing intermediate
/// directories are created on demand anyway so a partial listing still
/// produces a consistent tree.
fn build_tree(listing: &str) -> Result<FsNode> {
    let mut root = FsNode::dir("/", "/");

    for line in listing.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let (kind, rest) = line
            .split_once('|')
            .ok_or_else(|| Error::Protocol(format!("bad listing line: {line:?}")))?;
        let (path, size) = rest
            .rsplit_once('|')
            .ok_or_else(|| Error::Protocol(format!("bad listing line: {line:?}")))?;
        let kind = match kind {
            "d" => FsNodeKind::Dir,
            "f" => FsNodeKind::File,
            other => {
                return Err(Error::Protocol(format!(
                    "unknown entry kind {other:?} in listing"
                )));
            },
        };
        let size: u64 = size
            .parse()
            .map_err(|_| Error::Protocol(format!("bad size in listing line: {line:?}")))?;

        insert_node(&mut root, path, kind, size);
    }

    Ok(root)
}

fn insert_node(root: &mut FsNode, path: &str, kind: FsNodeKind, size: u64) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return;
    }

    let mut current = root;
    let mut current_path = String::new();
    for segment in &segments[..segments.len() - 1] {
        current_path.push('/');
        current_path.push_str(segment);
        let pos = match current.children.iter().position(|c| c.name == *segment) {
            Some(pos) => pos,
            None => {
                current.children.push(FsNode::dir(segment, &current_path));
                current.children.len() - 1
            },
        };
        current = &mut current.children[pos];
    }

    let name = segments[segments.len() - 1];
    if let Some(existing) = current.children.iter_mut().find(|c| c.name == name) {
        existing.kind = kind;
        existing.size = size;
        return;
    }
    current.children.push(FsNode {
        name: name.to_string(),
        path: path.to_string(),
        kind,
        size,
        children: Vec::new(),
    });
}

/// Device filesystem operations over a live raw-REPL session.
pub struct DeviceFs<'s, 'p, P: Port> {
    session: &'s mut RawSession<'p, P>,
    log: OpLog,
    exec_timeout: Duration,
}

impl<'s, 'p, P: Port> DeviceFs<'s, 'p, P> {
    /// Wrap a session that is already in raw mode.
    pub fn new(session: &'s mut RawSession<'p, P>) -> Self {
        Self {
            session,
            log: OpLog::new(),
            exec_timeout: Duration::from_secs(10),
        }
    }

    /// Override the per-command timeout.
    #[must_use]
    pub fn with_exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    /// Recent operation history.
    #[must_use]
    pub fn op_log(&self) -> &OpLog {
        &self.log
    }

    /// Read a whole file. An empty file yields an empty vec.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let idx = self.log.start(OpKind::Read, path, 0);
        self.log.begin(idx);
        let result = self
            .session
            .exec(&snippets::read_file(path), self.exec_timeout)
            .and_then(|hex| {
                snippets::decode_hex(&hex)
                    .map_err(|e| Error::Protocol(format!("unreadable content from {path}: {e}")))
            });
        match &result {
            Ok(data) => {
                self.log.progress(idx, data.len());
                self.log.finish(idx, Ok(()));
            },
            Err(e) => self.log.finish(idx, Err(&e.to_string())),
        }
        result
    }

    /// Write a file in chunks.
    ///
    /// By default the data lands in `<path>.tmp` first and is committed
    /// by remove-then-rename, so the real path never holds a partial
    /// file. `direct` skips the temp step for callers that want the
    /// write visible immediately.
    pub fn write_file(&mut self, path: &str, data: &[u8], options: &WriteOptions) -> Result<()> {
        let idx = self.log.start(OpKind::Write, path, data.len());
        self.log.begin(idx);
        let result = self.write_file_inner(path, data, options, idx);
        match &result {
            Ok(()) => self.log.finish(idx, Ok(())),
            Err(e) => self.log.finish(idx, Err(&e.to_string())),
        }
        result
    }

    fn write_file_inner(
        &mut self,
        path: &str,
        data: &[u8],
        options: &WriteOptions,
        idx: usize,
    ) -> Result<()> {
        let tmp_path = format!("{path}.tmp");
        let target: &str = if options.direct { path } else { &tmp_path };
        let chunk_size = options.chunk_size.max(1);

        debug!(
            "writing {} bytes to {target} ({} chunk(s))",
            data.len(),
            data.len().div_ceil(chunk_size).max(1)
        );

        self.session
            .exec(&snippets::open_for_write(target), self.exec_timeout)?;

        let mut written = 0usize;
        for chunk in data.chunks(chunk_size) {
            if let Err(e) = self
                .session
                .exec(&snippets::chunk_command(chunk), self.exec_timeout)
            {
                // Best effort: do not leave the handle open on the board.
                let _ = self.session.exec(snippets::close_write(), self.exec_timeout);
                return Err(e);
            }
            written += chunk.len();
            self.log.progress(idx, written);
        }

        self.session
            .exec(snippets::close_write(), self.exec_timeout)?;

        if !options.direct {
            self.session
                .exec(&snippets::commit_rename(&tmp_path, path), self.exec_timeout)?;
        }
        Ok(())
    }

    /// Delete a file.
    pub fn remove_file(&mut self, path: &str) -> Result<()> {
        let idx = self.log.start(OpKind::Delete, path, 0);
        self.log.begin(idx);
        let result = self
            .session
            .exec(&snippets::remove_file(path), self.exec_timeout)
            .map(|_| ());
        self.finish_simple(idx, &result);
        result
    }

    /// Delete an empty directory.
    pub fn remove_dir(&mut self, path: &str) -> Result<()> {
        let idx = self.log.start(OpKind::Delete, path, 0);
        self.log.begin(idx);
        let result = self
            .session
            .exec(&snippets::remove_dir(path), self.exec_timeout)
            .map(|_| ());
        self.finish_simple(idx, &result);
        result
    }

    /// Create every directory along `path`; existing ones are fine.
    pub fn make_path(&mut self, path: &str) -> Result<()> {
        let idx = self.log.start(OpKind::Mkdir, path, 0);
        self.log.begin(idx);
        let result = self
            .session
            .exec(&snippets::make_path(path), self.exec_timeout)
            .map(|_| ());
        self.finish_simple(idx, &result);
        result
    }

    /// Ensure a file exists.
    pub fn touch_file(&mut self, path: &str) -> Result<()> {
        let idx = self.log.start(OpKind::Write, path, 0);
        self.log.begin(idx);
        let result = self
            .session
            .exec(&snippets::touch_file(path), self.exec_timeout)
            .map(|_| ());
        self.finish_simple(idx, &result);
        result
    }

    /// Filesystem usage for the filesystem holding `path`.
    pub fn fs_stats(&mut self, path: &str) -> Result<FsStats> {
        let idx = self.log.start(OpKind::Stat, path, 0);
        self.log.begin(idx);
        let result = self
            .session
            .exec(&snippets::fs_stats(path), self.exec_timeout)
            .and_then(|out| parse_stats(&out));
        self.finish_parsed(idx, &result);
        result
    }

    /// Board and interpreter identity.
    pub fn device_info(&mut self) -> Result<DeviceInfo> {
        let idx = self.log.start(OpKind::Stat, "/", 0);
        self.log.begin(idx);
        let result = self
            .session
            .exec(snippets::device_info(), self.exec_timeout)
            .and_then(|out| parse_device_info(&out));
        match &result {
            Ok(_) => self.log.finish(idx, Ok(())),
            Err(e) => self.log.finish(idx, Err(&e.to_string())),
        }
        result
    }

    /// Snapshot the whole filesystem tree.
    pub fn walk(&mut self) -> Result<FsNode> {
        let idx = self.log.start(OpKind::List, "/", 0);
        self.log.begin(idx);
        let result = self
            .session
            .exec(snippets::walk(), self.exec_timeout)
            .and_then(|out| build_tree(&out));
        match &result {
            Ok(_) => self.log.finish(idx, Ok(())),
            Err(e) => self.log.finish(idx, Err(&e.to_string())),
        }
        result
    }

    fn finish_simple(&mut self, idx: usize, result: &Result<()>) {
        match result {
            Ok(()) => self.log.finish(idx, Ok(())),
            Err(e) => self.log.finish(idx, Err(&e.to_string())),
        }
    }

    fn finish_parsed(&mut self, idx: usize, result: &Result<FsStats>) {
        match result {
            Ok(_) => self.log.finish(idx, Ok(())),
            Err(e) => self.log.finish(idx, Err(&e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RAW_BANNER;
    use crate::protocol::raw_repl::RawConfig;
    use crate::testutil::MockPort;
    use crate::transport::Transport;

    fn fast_config() -> RawConfig {
        RawConfig {
            responsiveness_timeout: Duration::from_millis(50),
            prompt_wait: Duration::from_millis(10),
            banner_timeout: Duration::from_millis(50),
        }
    }

    /// Transport over a board that enters raw mode and then answers each
    /// execution with the given framed responses.
    fn board(responses: &[&[u8]]) -> Transport<MockPort> {
        let mut raw_phase = RAW_BANNER.to_vec();
        raw_phase.extend_from_slice(b">");
        for response in responses {
            raw_phase.extend_from_slice(b"OK");
            raw_phase.extend_from_slice(response);
            raw_phase.extend_from_slice(b"\x04\x04>");
        }
        Transport::new(MockPort::with_stages(&[b"\r\n>>> ", &raw_phase]))
            .with_poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn test_parse_stats() {
        let stats = parse_stats("2097152 1048576\r\n").unwrap();
        assert_eq!(stats.total, 2097152);
        assert_eq!(stats.free, 1048576);
        assert_eq!(stats.used, 1048576);

        assert!(parse_stats("garbage").is_err());
    }

    #[test]
    fn test_parse_device_info() {
        let line = "Raspberry Pi Pico with RP2040|1.22.0|v1.22.0 on 2023-12-27|6|/lib:/\r\n";
        let info = parse_device_info(line).unwrap();
        assert_eq!(info.machine, "Raspberry Pi Pico with RP2040");
        assert_eq!(info.release, "1.22.0");
        assert_eq!(info.mpy, "6");
        assert_eq!(info.sys_path, vec!["/lib", "/"]);

        assert!(parse_device_info("too|few|fields").is_err());
    }

    #[test]
    fn test_build_tree_nested() {
        let listing = "d|/a|0\nd|/a/b|0\nf|/a/b/c.txt|42\nf|/main.py|10\n";
        let root = build_tree(listing).unwrap();

        let a = root.child("a").unwrap();
        assert_eq!(a.kind, FsNodeKind::Dir);
        let b = a.child("b").unwrap();
        assert_eq!(b.kind, FsNodeKind::Dir);
        let c = b.child("c.txt").unwrap();
        assert_eq!(c.kind, FsNodeKind::File);
        assert_eq!(c.size, 42);
        assert_eq!(c.path, "/a/b/c.txt");

        let main = root.child("main.py").unwrap();
        assert_eq!(main.size, 10);
    }

    #[test]
    fn test_build_tree_orphan_gets_parents() {
        // A file line with no preceding directory lines still produces
        // the intermediate directories.
        let root = build_tree("f|/x/y/z.bin|7\n").unwrap();
        let z = root
            .child("x")
            .and_then(|x| x.child("y"))
            .and_then(|y| y.child("z.bin"))
            .unwrap();
        assert_eq!(z.size, 7);
    }

    #[test]
    fn test_build_tree_rejects_junk() {
        assert!(build_tree("not a listing line\n").is_err());
        assert!(build_tree("x|/a|0\n").is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_snapshot_types_serialize() {
        let stats = FsStats {
            total: 100,
            free: 60,
            used: 40,
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["total"], 100);
        assert_eq!(json["used"], 40);

        let root = build_tree("d|/lib|0\nf|/lib/util.py|42\n").unwrap();
        let json = serde_json::to_value(&root).unwrap();
        assert_eq!(json["kind"], "dir");
        assert_eq!(json["children"][0]["children"][0]["size"], 42);
    }

    #[test]
    fn test_read_file_decodes_hex() {
        let mut transport = board(&[b"48656c6c6f"]);
        let mut session =
            RawSession::begin_with_config(&mut transport, false, fast_config()).unwrap();
        let mut fs = DeviceFs::new(&mut session).with_exec_timeout(Duration::from_millis(200));

        let data = fs.read_file("/hello.txt").unwrap();
        assert_eq!(data, b"Hello");

        let record = fs.op_log().records().next().unwrap();
        assert_eq!(record.kind, OpKind::Read);
        assert_eq!(record.status, OpStatus::Success);
        assert_eq!(record.bytes_done, 5);
    }

    #[test]
    fn test_read_empty_file() {
        let mut transport = board(&[b""]);
        let mut session =
            RawSession::begin_with_config(&mut transport, false, fast_config()).unwrap();
        let mut fs = DeviceFs::new(&mut session).with_exec_timeout(Duration::from_millis(200));

        assert_eq!(fs.read_file("/empty").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_write_file_issues_temp_then_commit() {
        // open + 2 chunks + close + commit = 5 executions.
        let mut transport = board(&[b"", b"", b"", b"", b""]);
        let mut session =
            RawSession::begin_with_config(&mut transport, false, fast_config()).unwrap();
        let mut fs = DeviceFs::new(&mut session).with_exec_timeout(Duration::from_millis(200));

        let data = vec![0xAAu8; 200];
        fs.write_file(
            "/main.py",
            &data,
            &WriteOptions {
                chunk_size: 128,
                direct: false,
            },
        )
        .unwrap();

        let record = fs.op_log().records().next().unwrap();
        assert_eq!(record.status, OpStatus::Success);
        assert_eq!(record.bytes_done, 200);
    }

    #[test]
    fn test_write_file_direct_skips_commit() {
        // open + 1 chunk + close = 3 executions; a fourth would time out.
        let mut transport = board(&[b"", b"", b""]);
        let mut session =
            RawSession::begin_with_config(&mut transport, false, fast_config()).unwrap();
        let mut fs = DeviceFs::new(&mut session).with_exec_timeout(Duration::from_millis(200));

        fs.write_file(
            "/main.py",
            b"print(1)",
            &WriteOptions {
                chunk_size: 128,
                direct: true,
            },
        )
        .unwrap();
    }

    #[test]
    fn test_remove_missing_file_surfaces_remote_error() {
        let mut raw_phase = RAW_BANNER.to_vec();
        raw_phase.extend_from_slice(b">");
        raw_phase.extend_from_slice(b"OK\x04");
        raw_phase.extend_from_slice(b"Traceback (most recent call last):\r\nOSError: [Errno 2] ENOENT\r\n");
        raw_phase.extend_from_slice(b"\x04>");
        let mut transport = Transport::new(MockPort::with_stages(&[b"\r\n>>> ", &raw_phase]))
            .with_poll_interval(Duration::from_millis(1));
        let mut session =
            RawSession::begin_with_config(&mut transport, false, fast_config()).unwrap();
        let mut fs = DeviceFs::new(&mut session).with_exec_timeout(Duration::from_millis(200));

        let err = fs.remove_file("/missing").unwrap_err();
        assert!(matches!(err, Error::Remote { .. }));

        match &fs.op_log().records().next().unwrap().status {
            OpStatus::Error(msg) => assert!(msg.contains("ENOENT")),
            other => panic!("expected error record, got {other:?}"),
        }
    }

    #[test]
    fn test_stats_and_info_via_session() {
        let mut transport = board(&[
            b"1048576 524288\r\n",
            b"esp32|1.21.0|v1.21.0 build|6|/lib\r\n",
        ]);
        let mut session =
            RawSession::begin_with_config(&mut transport, false, fast_config()).unwrap();
        let mut fs = DeviceFs::new(&mut session).with_exec_timeout(Duration::from_millis(200));

        let stats = fs.fs_stats("/").unwrap();
        assert_eq!(stats.used, 524288);

        let info = fs.device_info().unwrap();
        assert_eq!(info.machine, "esp32");
        assert_eq!(info.sys_path, vec!["/lib"]);
    }

    #[test]
    fn test_walk_via_session() {
        let mut transport = board(&[b"d|/a|0\r\nd|/a/b|0\r\nf|/a/b/c.txt|42\r\n"]);
        let mut session =
            RawSession::begin_with_config(&mut transport, false, fast_config()).unwrap();
        let mut fs = DeviceFs::new(&mut session).with_exec_timeout(Duration::from_millis(200));

        let root = fs.walk().unwrap();
        let c = root
            .child("a")
            .and_then(|a| a.child("b"))
            .and_then(|b| b.child("c.txt"))
            .unwrap();
        assert_eq!(c.size, 42);
    }
}
