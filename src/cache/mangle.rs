//! Deterministic URI to cache-path mapping.
//!
//! `cache/<scheme>/<authority>/<segment>.../<query>`, every component
//! percent-escaped so the result only contains filesystem-safe characters.
//! A leading `.` is escaped too, which keeps mangled names from ever
//! colliding with the `.<name>.<kind>` sidecars or with `.`/`..`.

use std::path::{Path, PathBuf};
use url::{Position, Url};

const SAFE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_. ";

/// Stand-in for an empty component. Never produced by [`mangle_component`],
/// whose `%` is always followed by hex digits.
const EMPTY: &str = "%";

/// Escape one path component.
pub fn mangle_component(el: &str) -> String {
    let mut buf = String::with_capacity(el.len());
    for (i, c) in el.chars().enumerate() {
        if !SAFE.contains(c) || (i == 0 && c == '.') {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                if *unit < 256 {
                    buf.push_str(&format!("%{:02x}", unit));
                } else {
                    buf.push_str(&format!("%{:04x}", unit));
                }
            }
        } else {
            buf.push(c);
        }
    }
    buf
}

fn component(el: &str) -> String {
    if el.is_empty() {
        EMPTY.to_string()
    } else {
        mangle_component(el)
    }
}

/// Map a URI to its content path below `root`.
///
/// Url components are ASCII (non-ASCII is percent-encoded or punycoded by
/// the parser), so the `%XXXX` form only appears for hand-built input.
pub fn mangle(root: &Path, uri: &Url) -> PathBuf {
    let mut ret = root.join(component(uri.scheme()));
    ret.push(component(&uri[Position::BeforeUsername..Position::AfterPort]));

    let path = uri.path();
    let path = path.strip_prefix('/').unwrap_or(path);
    for segment in path.split('/') {
        ret.push(component(segment));
    }

    if let Some(query) = uri.query() {
        // The `?` keeps a query apart from a same-named trailing path segment.
        ret.push(mangle_component(&format!("?{}", query)));
    }
    ret
}

/// Path of a sidecar `.<name>.<kind>` next to the content path.
pub fn metafile(content: &Path, kind: &str) -> PathBuf {
    let name = content
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sidecar = format!(".{}.{}", name, kind);
    match content.parent() {
        Some(parent) => parent.join(sidecar),
        None => PathBuf::from(sidecar),
    }
}

/// Last path segment of a URI, for status messages.
pub fn basename(uri: &Url) -> &str {
    let path = uri.path();
    match path.rfind('/') {
        Some(p) => &path[p + 1..],
        None => path,
    }
}
