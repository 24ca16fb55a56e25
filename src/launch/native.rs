/// Platform-selected native libraries unpacked from cached archives
use crate::cache::ResourceCache;
use crate::config::types::{LaunchError, Result};
use crate::launch::runtime::HostInfo;
use crate::resource::Resource;
use filetime::FileTime;
use log::{debug, info};
use regex::{Regex, RegexBuilder};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

#[derive(Clone, Debug)]
pub struct NativeLib {
    pub os: Regex,
    pub arch: Regex,
    pub resource: Resource,
    /// Entry-name prefix to select and strip; entries without it are skipped
    pub prefix: Option<String>,
}

fn matcher(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(&format!("^(?:{})$", pattern))
        .case_insensitive(true)
        .build()
        .map_err(|e| LaunchError::Usage(format!("native-lib: bad pattern {}: {}", pattern, e)))
}

impl NativeLib {
    pub fn new(os: &str, arch: &str, resource: Resource, prefix: Option<String>) -> Result<Self> {
        Ok(Self {
            os: matcher(os)?,
            arch: matcher(arch)?,
            resource,
            prefix: prefix.filter(|p| !p.is_empty()),
        })
    }

    pub fn matches(&self, host: &HostInfo) -> bool {
        self.os.is_match(&host.os_name) && self.arch.is_match(&host.os_arch)
    }

    /// Unpack into the resource's `.lib` sidecar directory, returning it.
    ///
    /// Skipped when the directory exists and is newer than the archive.
    /// Libraries are unpacked into a `.lib.tmp` sibling that replaces the
    /// directory only once complete, so an interrupted run never looks fresh.
    pub fn extract(&self, cache: &ResourceCache) -> Result<PathBuf> {
        let archive = self.resource.update(cache)?;
        let dir = cache.metafile(&self.resource.uri, "lib");

        if dir.is_dir() && newer_than(&dir, &archive)? {
            debug!("{} is up to date", dir.display());
            return Ok(dir);
        }

        let staging = cache.metafile(&self.resource.uri, "lib.tmp");
        remove_dir_if_present(&staging)?;
        fs::create_dir_all(&staging)?;
        let count = match unpack(&archive, &staging, self.prefix.as_deref()) {
            Ok(count) => count,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    debug!("Removing {} failed: {}", staging.display(), cleanup);
                }
                return Err(match e {
                    ExtractError::Io(e) => LaunchError::Io(e),
                    ExtractError::Zip(details) => LaunchError::CorruptArchive {
                        uri: self.resource.uri.to_string(),
                        details,
                    },
                });
            }
        };

        remove_dir_if_present(&dir)?;
        fs::rename(&staging, &dir)?;
        filetime::set_file_mtime(&dir, FileTime::now())?;
        info!("Extracted {} native libraries to {}", count, dir.display());
        Ok(dir)
    }
}

fn newer_than(dir: &Path, archive: &Path) -> Result<bool> {
    let dir_time = FileTime::from_last_modification_time(&fs::metadata(dir)?);
    let archive_time = FileTime::from_last_modification_time(&fs::metadata(archive)?);
    Ok(dir_time > archive_time)
}

fn remove_dir_if_present(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

enum ExtractError {
    Io(io::Error),
    Zip(String),
}

impl From<io::Error> for ExtractError {
    fn from(e: io::Error) -> Self {
        ExtractError::Io(e)
    }
}

impl From<zip::result::ZipError> for ExtractError {
    fn from(e: zip::result::ZipError) -> Self {
        ExtractError::Zip(e.to_string())
    }
}

/// Destination name for an entry, or `None` when it is not extracted.
pub fn target_name<'a>(entry: &'a str, prefix: Option<&str>) -> Option<&'a str> {
    let name = match prefix {
        Some(prefix) => entry.strip_prefix(prefix)?,
        None => entry,
    };
    if name.is_empty() || name.contains('/') || name.starts_with('.') {
        return None;
    }
    Some(name)
}

fn unpack(archive: &Path, dir: &Path, prefix: Option<&str>) -> std::result::Result<usize, ExtractError> {
    let mut zip = ZipArchive::new(BufReader::new(File::open(archive)?))?;
    let mut count = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = target_name(entry.name(), prefix) else {
            continue;
        };
        let dest = dir.join(name);
        let mut out = File::create(&dest)?;
        io::copy(&mut entry, &mut out)?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn lib(os: &str, arch: &str) -> NativeLib {
        NativeLib::new(
            os,
            arch,
            Resource::unvalidated(Url::parse("http://h/natives.jar").unwrap()),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_matching_is_anchored_and_case_insensitive() {
        let host = HostInfo::fixed("Linux", "amd64");
        assert!(lib("linux", "amd64|x86_64").matches(&host));
        assert!(lib("Lin.*", ".*").matches(&host));
        assert!(!lib("in", "amd64").matches(&host));
        assert!(!lib("Windows.*", "amd64").matches(&host));
    }

    #[test]
    fn test_bad_pattern_is_usage_error() {
        let res = Resource::unvalidated(Url::parse("http://h/n.jar").unwrap());
        assert!(matches!(
            NativeLib::new("(", ".*", res, None),
            Err(LaunchError::Usage(_))
        ));
    }

    #[test]
    fn test_target_names() {
        assert_eq!(target_name("libgl.so", None), Some("libgl.so"));
        assert_eq!(target_name("sub/libgl.so", None), None);
        assert_eq!(target_name(".hidden", None), None);
        assert_eq!(target_name("linux64/libgl.so", Some("linux64/")), Some("libgl.so"));
        assert_eq!(target_name("win64/gl.dll", Some("linux64/")), None);
        assert_eq!(target_name("linux64/", Some("linux64/")), None);
    }

    fn natives_cache(dir: &Path, archive: &Path) -> (ResourceCache, NativeLib) {
        let settings = crate::config::settings::LauncherSettings::with_base_dir(dir);
        let cache = ResourceCache::new(
            &settings,
            Box::new(crate::cache::fetch::FileFetcher),
            std::sync::Arc::new(crate::status::NullStatus),
        );
        let uri = Url::from_file_path(archive).unwrap();
        let native = NativeLib::new(".*", ".*", Resource::unvalidated(uri), None).unwrap();
        (cache, native)
    }

    fn natives_zip(libx: &[u8]) -> Vec<u8> {
        use std::io::Write;
        let stored = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        zip.start_file("liba.so", stored).unwrap();
        zip.write_all(b"a").unwrap();
        zip.start_file("libx.so", stored).unwrap();
        zip.write_all(libx).unwrap();
        zip.finish().unwrap().into_inner()
    }

    /// Replace `archive` with `bytes`, dated ahead so the cache refetches it.
    fn publish(archive: &Path, bytes: &[u8]) {
        fs::write(archive, bytes).unwrap();
        let ahead = FileTime::from_unix_time(FileTime::now().unix_seconds() + 10, 0);
        filetime::set_file_mtime(archive, ahead).unwrap();
    }

    #[test]
    fn test_interrupted_extraction_is_redone() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("natives.bin");
        // second entry fails its checksum after the first was written
        let damaged: Vec<u8> = {
            let good = natives_zip(b"XXXXXXXX");
            let at = good.windows(8).position(|w| w == b"XXXXXXXX").unwrap();
            let mut bad = good.clone();
            bad[at..at + 8].copy_from_slice(b"YYYYYYYY");
            bad
        };
        fs::write(&archive, &damaged).unwrap();
        let (cache, native) = natives_cache(&dir.path().join("base"), &archive);

        assert!(native.extract(&cache).is_err());
        let lib_dir = cache.metafile(&native.resource.uri, "lib");
        assert!(!lib_dir.exists());
        assert!(!cache.metafile(&native.resource.uri, "lib.tmp").exists());

        publish(&archive, &natives_zip(b"XXXXXXXX"));
        let extracted = native.extract(&cache).unwrap();
        assert_eq!(extracted, lib_dir);
        assert_eq!(fs::read(lib_dir.join("liba.so")).unwrap(), b"a");
        assert_eq!(fs::read(lib_dir.join("libx.so")).unwrap(), b"XXXXXXXX");
    }

    #[test]
    fn test_stale_library_directory_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("natives.bin");
        fs::write(&archive, natives_zip(b"x")).unwrap();
        let (cache, native) = natives_cache(&dir.path().join("base"), &archive);

        let lib_dir = cache.metafile(&native.resource.uri, "lib");
        fs::create_dir_all(lib_dir.join("libx.so")).unwrap();
        fs::write(lib_dir.join("libold.so"), b"old").unwrap();
        filetime::set_file_mtime(&lib_dir, FileTime::zero()).unwrap();

        native.extract(&cache).unwrap();
        assert_eq!(fs::read(lib_dir.join("libx.so")).unwrap(), b"x");
        assert!(!lib_dir.join("libold.so").exists());

        // up to date now; a second run leaves the directory alone
        fs::write(lib_dir.join("marker"), b"").unwrap();
        native.extract(&cache).unwrap();
        assert!(lib_dir.join("marker").exists());
    }
}
