//! The resource cache.
//!
//! One exclusive lock per URI, taken on the `.info` sidecar and held from
//! reading the previous provenance until the new content and provenance are
//! committed. Different URIs never contend.

use crate::cache::commit;
use crate::cache::fetch::{is_archive_type, FetchRequest, Fetcher};
use crate::cache::mangle::{basename, mangle, metafile};
use crate::cache::provenance::{self, Provenance};
use crate::config::settings::LauncherSettings;
use crate::config::types::{LaunchError, Result};
use crate::descriptor::interpreter::{MAJOR_VERSION, MINOR_VERSION};
use crate::status::StatusSink;
use crate::trust::{fingerprint, jar};
use fs4::FileExt;
use log::{debug, info, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use url::Url;

/// Result of resolving a URI through the cache
#[derive(Clone, Debug)]
pub struct Cached {
    pub path: PathBuf,
    pub provenance: Provenance,
    /// Whether the content was (re)fetched by this update
    pub fresh: bool,
}

pub fn user_agent() -> String {
    format!("Relaunch/{}.{}", MAJOR_VERSION, MINOR_VERSION)
}

pub struct ResourceCache {
    root: PathBuf,
    fetcher: Box<dyn Fetcher>,
    status: Arc<dyn StatusSink>,
    attempts: usize,
    backoff: Duration,
}

impl ResourceCache {
    pub fn new(
        settings: &LauncherSettings,
        fetcher: Box<dyn Fetcher>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            root: settings.cache_root(),
            fetcher,
            status,
            attempts: settings.retry_attempts.max(1),
            backoff: settings.retry_backoff(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local content path for a URI
    pub fn path_for(&self, uri: &Url) -> PathBuf {
        mangle(&self.root, uri)
    }

    /// Sidecar path `.<name>.<kind>` for a URI
    pub fn metafile(&self, uri: &Url, kind: &str) -> PathBuf {
        metafile(&self.path_for(uri), kind)
    }

    /// Bring the cached copy of `uri` up to date.
    ///
    /// Every attempt after a failure is forced (unconditional). When all
    /// attempts fail the first failure is returned with the rest attached.
    pub fn update(&self, uri: &Url, referrer: Option<&Url>, force: bool) -> Result<Cached> {
        let mut force = force;
        let mut errors = Vec::new();
        for attempt in 0..self.attempts {
            if attempt > 0 && !self.backoff.is_zero() {
                let jitter = Duration::from_millis(fastrand::u64(0..=self.backoff.as_millis() as u64));
                thread::sleep(self.backoff + jitter);
            }
            match self.update_once(uri, referrer, force) {
                Ok(cached) => return Ok(cached),
                Err(e) => {
                    warn!("Attempt {} for {} failed: {}", attempt + 1, uri, e);
                    errors.push(e);
                }
            }
            force = true;
        }

        let mut errors = errors.into_iter();
        let first = match errors.next() {
            Some(first) => first,
            None => return Err(LaunchError::Config("retry_attempts must be positive".to_string())),
        };
        Err(LaunchError::Exhausted {
            uri: uri.to_string(),
            attempts: self.attempts,
            first: Box::new(first),
            others: errors.collect(),
        })
    }

    fn update_once(&self, uri: &Url, referrer: Option<&Url>, force: bool) -> Result<Cached> {
        let name = basename(uri);
        self.status.message(&format!("Checking {}...", name));

        let path = self.path_for(uri);
        let info_path = metafile(&path, "info");
        let staging = metafile(&path, "new");
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut info = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&info_path)?;
        info.lock_exclusive()?;
        let result = self.locked_update(uri, referrer, force, &path, &staging, &mut info);
        // staging belongs to the lock holder
        if result.is_err() && staging.exists() {
            let _ = fs::remove_file(&staging);
        }
        if let Err(e) = FileExt::unlock(&info) {
            debug!("Unlocking {} failed: {}", info_path.display(), e);
        }
        result
    }

    fn locked_update(
        &self,
        uri: &Url,
        referrer: Option<&Url>,
        force: bool,
        path: &Path,
        staging: &Path,
        info: &mut File,
    ) -> Result<Cached> {
        let name = basename(uri);
        let old = Provenance::load(info)?;
        let mut new = Provenance::new(uri.as_str());

        // A conditional request is pointless without content to fall back on.
        let conditional = !force && path.is_file();
        let request = FetchRequest {
            uri: uri.clone(),
            user_agent: user_agent(),
            referrer: referrer.cloned(),
            if_modified_since: if conditional { old.mtime.clone() } else { None },
        };

        let mut resp = self.fetcher.fetch(&request)?;
        new.tls_certs = fingerprint::fingerprints(&resp.peer_certificates);

        if resp.not_modified {
            if !conditional {
                return Err(LaunchError::HttpStatus {
                    uri: uri.to_string(),
                    status: 304,
                });
            }
            debug!("{} not modified", uri);
            return Ok(Cached {
                path: path.to_path_buf(),
                provenance: old,
                fresh: false,
            });
        }

        self.status.message(&format!("Fetching {}...", name));
        let expected = resp.content_length;
        self.status.transfer(expected, 0);
        let received = {
            let mut out = File::create(staging)?;
            let mut buf = vec![0u8; 65536];
            let mut received: u64 = 0;
            loop {
                let n = resp.body.read(&mut buf).map_err(|e| LaunchError::Network {
                    uri: uri.to_string(),
                    details: e.to_string(),
                })?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
                received += n as u64;
                self.status.transfer(expected, received);
            }
            out.sync_all()?;
            received
        };
        if let Some(expected) = expected {
            if expected != received {
                return Err(LaunchError::Truncated {
                    uri: uri.to_string(),
                    expected,
                    received,
                });
            }
        }

        new.mtime = resp.last_modified.take();
        new.ctype = resp.content_type.take();
        if new.ctype.as_deref().map(is_archive_type).unwrap_or(false) {
            self.status.message(&format!("Verifying {}...", name));
            let signers = jar::archive_signers(staging, uri.as_str())?;
            new.jar_certs = fingerprint::fingerprints(&signers);
        }

        provenance::clear(info)?;
        commit::replace(staging, path)?;
        new.store(info)?;
        info!("Updated {} ({} bytes)", uri, received);

        Ok(Cached {
            path: path.to_path_buf(),
            provenance: new,
            fresh: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fetch::FetchResponse;
    use crate::status::NullStatus;
    use std::io::Cursor;
    use std::sync::Mutex;

    /// Serves a fixed body with a fixed Last-Modified, honouring
    /// If-Modified-Since by exact token match.
    struct Fixed {
        body: Vec<u8>,
        declared: Option<u64>,
        requests: Arc<Mutex<Vec<FetchRequest>>>,
    }

    impl Fetcher for Fixed {
        fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
            self.requests.lock().unwrap().push(request.clone());
            if request.if_modified_since.as_deref() == Some("T1") {
                return Ok(FetchResponse::not_modified());
            }
            Ok(FetchResponse {
                not_modified: false,
                content_length: self.declared,
                content_type: Some("text/plain".to_string()),
                last_modified: Some("T1".to_string()),
                peer_certificates: Vec::new(),
                body: Box::new(Cursor::new(self.body.clone())),
            })
        }
    }

    fn cache(dir: &Path, body: &[u8], declared: Option<u64>) -> (ResourceCache, Arc<Mutex<Vec<FetchRequest>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let fetcher = Fixed {
            body: body.to_vec(),
            declared,
            requests: Arc::clone(&requests),
        };
        let settings = LauncherSettings::with_base_dir(dir);
        (
            ResourceCache::new(&settings, Box::new(fetcher), Arc::new(NullStatus)),
            requests,
        )
    }

    #[test]
    fn test_fetch_then_not_modified() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, requests) = cache(dir.path(), b"hello", Some(5));
        let uri = Url::parse("http://h/a.txt").unwrap();

        let first = cache.update(&uri, None, false).unwrap();
        assert!(first.fresh);
        assert_eq!(fs::read(&first.path).unwrap(), b"hello");
        assert_eq!(first.provenance.mtime.as_deref(), Some("T1"));

        let second = cache.update(&uri, None, false).unwrap();
        assert!(!second.fresh);
        assert_eq!(second.path, first.path);
        assert_eq!(second.provenance, first.provenance);

        let requests = requests.lock().unwrap();
        assert_eq!(requests[0].if_modified_since, None);
        assert_eq!(requests[1].if_modified_since.as_deref(), Some("T1"));
        assert_eq!(requests[1].user_agent, user_agent());
    }

    #[test]
    fn test_truncated_body_fails_after_all_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, requests) = cache(dir.path(), b"hel", Some(5));
        let uri = Url::parse("http://h/a.txt").unwrap();

        match cache.update(&uri, None, false) {
            Err(LaunchError::Exhausted { attempts, first, others, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(others.len(), 2);
                assert!(matches!(*first, LaunchError::Truncated { expected: 5, received: 3, .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(requests.lock().unwrap().len(), 3);
        assert!(!cache.metafile(&uri, "new").exists());
        assert!(!cache.path_for(&uri).exists());
    }

    #[test]
    fn test_failing_writer_never_removes_a_concurrent_stage() {
        let dir = tempfile::tempdir().unwrap();
        let (failing, _) = cache(dir.path(), b"short", Some(100));
        let (working, _) = cache(dir.path(), b"hello", Some(5));
        let uri = Url::parse("http://h/a.txt").unwrap();

        thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..50 {
                    assert!(failing.update(&uri, None, true).is_err());
                }
            });
            for _ in 0..150 {
                let cached = working.update(&uri, None, true).unwrap();
                assert_eq!(fs::read(&cached.path).unwrap(), b"hello");
            }
        });
        assert!(!working.metafile(&uri, "new").exists());
    }

    #[test]
    fn test_forced_update_is_unconditional() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, requests) = cache(dir.path(), b"hello", None);
        let uri = Url::parse("http://h/a.txt").unwrap();

        cache.update(&uri, None, false).unwrap();
        let forced = cache.update(&uri, None, true).unwrap();
        assert!(forced.fresh);
        assert_eq!(requests.lock().unwrap()[1].if_modified_since, None);
    }

    #[test]
    fn test_referrer_is_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, requests) = cache(dir.path(), b"x", Some(1));
        let uri = Url::parse("http://h/a.txt").unwrap();
        let referrer = Url::parse("http://h/launch.hl").unwrap();

        cache.update(&uri, Some(&referrer), false).unwrap();
        assert_eq!(requests.lock().unwrap()[0].referrer.as_ref(), Some(&referrer));
    }
}
