//! Python snippet builders and chunk codecs for the file-transfer engine.
//!
//! Every device filesystem operation is a small Python program executed
//! over the raw REPL. The builders here are pure string functions so
//! their exact output can be asserted in tests; nothing in this module
//! touches the port.

/// Quote a string as a single-quoted Python literal.
fn py_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Stream a file's content to stdout as one hex string.
pub fn read_file(path: &str) -> String {
    format!(
        "import ubinascii\n\
         with open({}, 'rb') as f:\n\
         \x20   while True:\n\
         \x20       b = f.read(256)\n\
         \x20       if not b: break\n\
         \x20       print(ubinascii.hexlify(b).decode(), end='')",
        py_str(path)
    )
}

/// Open a file for writing and bind it to `f`.
pub fn open_for_write(path: &str) -> String {
    format!("import ubinascii\nf = open({}, 'wb')", py_str(path))
}

/// Close the file bound by [`open_for_write`].
pub fn close_write() -> &'static str {
    "f.close()"
}

/// Commit a temp file over its destination: remove whatever is there,
/// then rename. The rename is the commit point.
pub fn commit_rename(tmp_path: &str, path: &str) -> String {
    format!(
        "import os\n\
         try:\n\
         \x20   os.remove({path})\n\
         except OSError:\n\
         \x20   pass\n\
         os.rename({tmp}, {path})",
        tmp = py_str(tmp_path),
        path = py_str(path),
    )
}

/// Encode one chunk as a `unhexlify` write command.
pub fn chunk_as_hex(data: &[u8]) -> String {
    let mut hex = String::with_capacity(data.len() * 2);
    for byte in data {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("f.write(ubinascii.unhexlify('{hex}'))")
}

/// Encode one chunk as a Python bytes-literal write command.
///
/// Printable ASCII goes through verbatim; everything else is `\xNN`
/// escaped. For mostly-text payloads this is close to 1x overhead where
/// hex is always 2x.
pub fn chunk_as_bytes_literal(data: &[u8]) -> String {
    let mut literal = String::with_capacity(data.len() + 12);
    for &byte in data {
        match byte {
            b'\'' => literal.push_str("\\'"),
            b'\\' => literal.push_str("\\\\"),
            b'\n' => literal.push_str("\\n"),
            b'\r' => literal.push_str("\\r"),
            b'\t' => literal.push_str("\\t"),
            0x20..=0x7E => literal.push(byte as char),
            other => literal.push_str(&format!("\\x{other:02x}")),
        }
    }
    format!("f.write(b'{literal}')")
}

/// Encode one chunk as whichever command is shorter on the wire.
///
/// Encoding overhead multiplies serial latency, so this picks per chunk:
/// text-heavy data wins as a bytes literal, binary data as hex.
pub fn chunk_command(data: &[u8]) -> String {
    let hex = chunk_as_hex(data);
    let literal = chunk_as_bytes_literal(data);
    if literal.len() <= hex.len() { literal } else { hex }
}

/// Decode the hex stream produced by [`read_file`].
pub fn decode_hex(hex: &str) -> Result<Vec<u8>, String> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return Err(format!("odd-length hex output ({} chars)", hex.len()));
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    let bytes = hex.as_bytes();
    for pair in bytes.chunks_exact(2) {
        let hi = hex_value(pair[0]).ok_or_else(|| format!("bad hex byte {:?}", pair[0] as char))?;
        let lo = hex_value(pair[1]).ok_or_else(|| format!("bad hex byte {:?}", pair[1] as char))?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Delete a single file.
pub fn remove_file(path: &str) -> String {
    format!("import os\nos.remove({})", py_str(path))
}

/// Delete an empty directory.
pub fn remove_dir(path: &str) -> String {
    format!("import os\nos.rmdir({})", py_str(path))
}

/// Create every directory along `path`, tolerating ones that exist.
pub fn make_path(path: &str) -> String {
    format!(
        "import os\n\
         p = ''\n\
         for seg in {}.split('/'):\n\
         \x20   if not seg: continue\n\
         \x20   p = p + '/' + seg\n\
         \x20   try:\n\
         \x20       os.mkdir(p)\n\
         \x20   except OSError:\n\
         \x20       pass",
        py_str(path)
    )
}

/// Create an empty file (or update an existing one's presence).
pub fn touch_file(path: &str) -> String {
    format!("f = open({}, 'ab')\nf.close()", py_str(path))
}

/// Print `<total> <free>` for the filesystem holding `path`.
pub fn fs_stats(path: &str) -> String {
    format!(
        "import os\ns = os.statvfs({})\nprint(s[0] * s[2], s[0] * s[3])",
        py_str(path)
    )
}

/// Print one `|`-delimited line of interpreter and board identity.
pub fn device_info() -> &'static str {
    "import os, sys\n\
     u = os.uname()\n\
     m = getattr(sys.implementation, '_mpy', 0)\n\
     print(u.machine + '|' + u.release + '|' + u.version + '|' + str(m) + '|' + ':'.join(sys.path))"
}

/// Recursively list the filesystem, one `kind|path|size` line per entry.
///
/// Directories are detected via the `S_IFDIR` bit of `st_mode`; sizes
/// come from `st_size`. Directories print before their contents, so the
/// host sees parents before children.
pub fn walk() -> &'static str {
    "import os\n\
     def _w(d):\n\
     \x20   for n in os.listdir(d):\n\
     \x20       p = (d + '/' + n) if d != '/' else ('/' + n)\n\
     \x20       st = os.stat(p)\n\
     \x20       if st[0] & 0x4000:\n\
     \x20           print('d|' + p + '|0')\n\
     \x20           _w(p)\n\
     \x20       else:\n\
     \x20           print('f|' + p + '|' + str(st[6]))\n\
     _w('/')"
}
