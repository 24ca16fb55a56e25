//! Integration tests for the launch pipeline
//!
//! A scripted in-memory server stands in for the network; descriptors are
//! interpreted end to end and the resulting command line is inspected.

use relaunch::cache::{FetchRequest, FetchResponse, Fetcher};
use relaunch::config::settings::LauncherSettings;
use relaunch::launch::{self, runtime::HostInfo};
use relaunch::status::NullStatus;
use relaunch::{LaunchError, Resource, Session};
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use url::Url;
use zip::write::SimpleFileOptions;

#[derive(Clone)]
struct Served {
    body: Vec<u8>,
    last_modified: String,
    /// Declared length, when it should differ from the body
    declared: Option<u64>,
}

#[derive(Default)]
struct Server {
    files: Mutex<HashMap<String, Served>>,
    hits: Mutex<HashMap<String, usize>>,
    /// Certificates presented with every response, leaf first
    chain: Mutex<Vec<Vec<u8>>>,
}

impl Server {
    fn put(&self, uri: &str, body: &[u8], last_modified: &str) {
        self.files.lock().unwrap().insert(
            uri.to_string(),
            Served {
                body: body.to_vec(),
                last_modified: last_modified.to_string(),
                declared: None,
            },
        );
    }

    fn truncate(&self, uri: &str, body: &[u8], declared: u64) {
        self.files.lock().unwrap().insert(
            uri.to_string(),
            Served {
                body: body.to_vec(),
                last_modified: "truncated".to_string(),
                declared: Some(declared),
            },
        );
    }

    fn hits(&self, uri: &str) -> usize {
        self.hits.lock().unwrap().get(uri).copied().unwrap_or(0)
    }
}

struct Remote(Arc<Server>);

impl Fetcher for Remote {
    fn fetch(&self, request: &FetchRequest) -> relaunch::Result<FetchResponse> {
        let uri = request.uri.to_string();
        *self.0.hits.lock().unwrap().entry(uri.clone()).or_default() += 1;
        let served = self.0.files.lock().unwrap().get(&uri).cloned();
        let Some(served) = served else {
            return Err(LaunchError::HttpStatus { uri, status: 404 });
        };
        if request.if_modified_since.as_deref() == Some(served.last_modified.as_str()) {
            return Ok(FetchResponse::not_modified());
        }
        Ok(FetchResponse {
            not_modified: false,
            content_length: Some(served.declared.unwrap_or(served.body.len() as u64)),
            content_type: None,
            last_modified: Some(served.last_modified),
            peer_certificates: self.0.chain.lock().unwrap().clone(),
            body: Box::new(Cursor::new(served.body)),
        })
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    server: Arc<Server>,
    session: Session,
    runtime: PathBuf,
}

fn fixture_with(configure: impl FnOnce(&mut LauncherSettings)) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().join("jre");
    std::fs::create_dir_all(home.join("bin")).unwrap();
    let runtime = home.join("bin").join("java");
    std::fs::write(&runtime, b"").unwrap();

    let mut settings = LauncherSettings::with_base_dir(dir.path().join("base"));
    settings.runtime_home = Some(home);
    settings.library_path = None;
    settings.command_file_dir = None;
    configure(&mut settings);

    let server = Arc::new(Server::default());
    let session = Session::with_fetcher(
        settings,
        Box::new(Remote(Arc::clone(&server))),
        Arc::new(NullStatus),
    )
    .with_host(HostInfo::fixed("Linux", "amd64"));
    Fixture {
        _dir: dir,
        server,
        session,
        runtime,
    }
}

fn fixture() -> Fixture {
    fixture_with(|_| {})
}

fn root(uri: &str) -> Resource {
    Resource::unvalidated(Url::parse(uri).unwrap())
}

fn write_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn test_end_to_end_argument_vector() {
    let f = fixture();
    f.server.put(
        "http://example/launch.hl",
        b"class-path http://example/a.jar\nmain-class demo.Main\nheap-size 256\n",
        "t1",
    );
    f.server.put("http://example/a.jar", b"jar bytes", "t1");

    let plan = launch::plan(&f.session, &root("http://example/launch.hl")).unwrap();
    let cached = f.session.cache.path_for(&Url::parse("http://example/a.jar").unwrap());
    assert_eq!(
        plan.argv,
        vec![
            path_str(&f.runtime),
            "-Xmx256m".to_string(),
            "-classpath".to_string(),
            path_str(&cached),
            "demo.Main".to_string(),
        ]
    );
    assert_eq!(std::fs::read(cached).unwrap(), b"jar bytes");
}

#[test]
fn test_include_diamond_is_read_once() {
    let f = fixture();
    f.server.put(
        "http://example/launch.hl",
        b"include b.hl\ninclude c.hl\ninclude common.hl\nmain-class demo.Main\n",
        "t1",
    );
    f.server.put("http://example/b.hl", b"include common.hl\n", "t1");
    f.server.put("http://example/c.hl", b"include ./common.hl\n", "t1");
    f.server
        .put("http://example/common.hl", b"property shared yes\n", "t1");

    let plan = launch::plan(&f.session, &root("http://example/launch.hl")).unwrap();
    assert_eq!(f.server.hits("http://example/common.hl"), 1);
    assert!(plan.argv.contains(&"-Dshared=yes".to_string()));
}

#[test]
fn test_when_with_unbound_variable_raises_error() {
    let f = fixture();
    f.server.put(
        "http://example/launch.hl",
        b"main-class demo.Main\nwhen == ${missing} \"\" : error \"x\"\n",
        "t1",
    );

    let err = launch::plan(&f.session, &root("http://example/launch.hl")).unwrap_err();
    assert!(matches!(err.root(), LaunchError::User(m) if m == "x"));
    assert_eq!(err.to_string(), "http://example/launch.hl:2: x");
}

#[test]
fn test_not_modified_keeps_bytes() {
    let f = fixture();
    let uri = Url::parse("http://example/a.jar").unwrap();
    f.server.put(uri.as_str(), b"original", "t1");

    let first = f.session.cache.update(&uri, None, false).unwrap();
    assert!(first.fresh);
    let before = std::fs::metadata(&first.path).unwrap().modified().unwrap();

    let second = f.session.cache.update(&uri, None, false).unwrap();
    assert!(!second.fresh);
    assert_eq!(std::fs::read(&second.path).unwrap(), b"original");
    assert_eq!(
        std::fs::metadata(&second.path).unwrap().modified().unwrap(),
        before
    );
}

#[test]
fn test_truncated_fetch_keeps_previous_content() {
    let f = fixture();
    let uri = Url::parse("http://example/a.jar").unwrap();
    f.server.put(uri.as_str(), b"original", "t1");
    f.session.cache.update(&uri, None, false).unwrap();

    f.server.truncate(uri.as_str(), b"short", 100);
    let err = f.session.cache.update(&uri, None, false).unwrap_err();
    match err {
        LaunchError::Exhausted { attempts, first, .. } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*first, LaunchError::Truncated { .. }));
        }
        other => panic!("unexpected error {other:?}"),
    }
    let path = f.session.cache.path_for(&uri);
    assert_eq!(std::fs::read(path).unwrap(), b"original");
}

#[test]
fn test_pinned_validator_rejects_plain_fetch() {
    let f = fixture();
    f.server.put(
        "http://example/launch.hl",
        b"validate tls-cert:dig:sha256:00\nclass-path a.jar\nmain-class demo.Main\n",
        "t1",
    );
    f.server.put("http://example/a.jar", b"jar", "t1");

    let err = launch::plan(&f.session, &root("http://example/launch.hl")).unwrap_err();
    assert!(err.is_validation());
}

fn present_chain(server: &Server) {
    *server.chain.lock().unwrap() = vec![
        include_bytes!("fixtures/chain-leaf.der").to_vec(),
        include_bytes!("fixtures/chain-ca.der").to_vec(),
    ];
}

#[test]
fn test_tls_pin_on_issuing_authority_accepts() {
    let f = fixture();
    present_chain(&f.server);
    f.server.put(
        "http://example/launch.hl",
        b"validate tls-cert:key:rsa:BF76A59018E06893CFCDE044C39F951A2F21E34C27FDB7FF360B4EF5FC546AEF\n\
          class-path a.jar\nmain-class demo.Main\n",
        "t1",
    );
    f.server.put("http://example/a.jar", b"jar", "t1");

    assert!(launch::plan(&f.session, &root("http://example/launch.hl")).is_ok());
}

#[test]
fn test_tls_pin_on_unrelated_key_rejects() {
    let f = fixture();
    present_chain(&f.server);
    f.server.put(
        "http://example/launch.hl",
        b"validate tls-cert:key:rsa:97F3DD7C6ECEBE4F0B82A4C198DD76F3B852C692F183887CBC3500C63A84AD90\n\
          class-path a.jar\nmain-class demo.Main\n",
        "t1",
    );
    f.server.put("http://example/a.jar", b"jar", "t1");

    let err = launch::plan(&f.session, &root("http://example/launch.hl")).unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_always_validator_accepts() {
    let f = fixture();
    f.server.put(
        "http://example/launch.hl",
        b"validate always\nclass-path a.jar\nmain-class demo.Main\n",
        "t1",
    );
    f.server.put("http://example/a.jar", b"jar", "t1");

    assert!(launch::plan(&f.session, &root("http://example/launch.hl")).is_ok());
}

#[test]
fn test_chain_hands_off_to_other_descriptor() {
    let f = fixture();
    f.server.put(
        "http://example/launch.hl",
        b"main-class old.Main\nchain next/launch.hl\n",
        "t1",
    );
    f.server.put(
        "http://example/next/launch.hl",
        b"main-class new.Main\nclass-path app.jar\n",
        "t1",
    );
    f.server.put("http://example/next/app.jar", b"jar", "t1");

    let plan = launch::plan(&f.session, &root("http://example/launch.hl")).unwrap();
    assert_eq!(plan.argv.last().map(String::as_str), Some("new.Main"));
}

#[test]
fn test_chain_depth_is_bounded() {
    let f = fixture_with(|s| s.max_chain_depth = 3);
    f.server
        .put("http://example/loop.hl", b"chain loop.hl\n", "t1");

    let err = launch::plan(&f.session, &root("http://example/loop.hl")).unwrap_err();
    assert!(matches!(err, LaunchError::Config(_)));
}

#[test]
fn test_native_libraries_are_extracted() {
    let f = fixture();
    f.server.put(
        "http://example/launch.hl",
        b"native-lib linux amd64|x86_64 natives.jar linux64/\n\
          native-lib windows .* win.jar\n\
          main-class demo.Main\n",
        "t1",
    );
    let natives = write_zip(&[
        ("linux64/libgl.so", "gl"),
        ("linux64/sub/skip.so", "no"),
        ("win64/gl.dll", "no"),
        ("META-INF/MANIFEST.MF", "Manifest-Version: 1.0\r\n"),
    ]);
    f.server.put("http://example/natives.jar", &natives, "t1");

    let plan = launch::plan(&f.session, &root("http://example/launch.hl")).unwrap();
    let dir = f
        .session
        .cache
        .metafile(&Url::parse("http://example/natives.jar").unwrap(), "lib");
    assert!(plan
        .argv
        .contains(&format!("-Djava.library.path={}", path_str(&dir))));
    assert_eq!(std::fs::read(dir.join("libgl.so")).unwrap(), b"gl");
    assert!(!dir.join("skip.so").exists());
    assert!(!dir.join("sub").exists());
    assert_eq!(f.server.hits("http://example/win.jar"), 0);
}

#[test]
fn test_alias_extension_rewrites_commands() {
    let f = fixture();
    let ext = write_zip(&[
        ("META-INF/relaunch-extension", "factory=alias\n"),
        ("META-INF/aliases", "game main-class demo.Main\nmem heap-size\n"),
    ]);
    f.server.put("http://example/ext.jar", &ext, "t1");
    f.server.put(
        "http://example/launch.hl",
        b"extension ext.jar\ngame\nmem 128\n",
        "t1",
    );

    let plan = launch::plan(&f.session, &root("http://example/launch.hl")).unwrap();
    assert!(plan.argv.contains(&"-Xmx128m".to_string()));
    assert_eq!(plan.argv.last().map(String::as_str), Some("demo.Main"));
}

#[test]
fn test_missing_entry_point_is_config_error() {
    let f = fixture();
    f.server
        .put("http://example/launch.hl", b"heap-size 64\n", "t1");

    let err = launch::plan(&f.session, &root("http://example/launch.hl")).unwrap_err();
    assert!(matches!(err, LaunchError::Config(_)));
}
