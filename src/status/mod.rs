//! Progress and error presentation.
//!
//! The cache and interpreter report through a [`StatusSink`]. Sinks are shared
//! (`Arc<dyn StatusSink>`) and use interior mutability. [`ThreadedStatus`]
//! moves presentation onto its own thread; its `error` blocks until the
//! presenter acknowledges the report.

use crate::config::types::{LaunchError, Result};
use crate::descriptor::env::Environment;
use crate::descriptor::extension::Handled;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, warn};
use std::io::Write;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use url::Url;

pub trait StatusSink: Send + Sync {
    fn message(&self, text: &str);

    /// Transfer progress; `total` is `None` when the length is unknown.
    fn transfer(&self, total: Option<u64>, position: u64);

    /// Indeterminate progress tick
    fn progress(&self);

    fn error(&self, err: &LaunchError);

    /// Descriptor commands the sink claims for itself
    fn command(&self, _words: &[String], _env: &Environment) -> Result<Handled> {
        Ok(Handled::No)
    }

    /// Called once the launch plan is settled, before the process starts.
    fn announce(&self, _target: &str) {}

    /// Finish any partially drawn line.
    fn close(&self) {}
}

/// Discards progress; errors go to the log.
#[derive(Debug, Default)]
pub struct NullStatus;

impl StatusSink for NullStatus {
    fn message(&self, _text: &str) {}
    fn transfer(&self, _total: Option<u64>, _position: u64) {}
    fn progress(&self) {}

    fn error(&self, err: &LaunchError) {
        error!("{}", err);
    }
}

const SPINNER: [char; 4] = ['|', '/', '-', '\\'];
const INTERVAL: Duration = Duration::from_millis(50);

struct ConsoleState {
    out: Box<dyn Write + Send>,
    current: String,
    spin: usize,
    last_draw: Option<Instant>,
    title: Option<String>,
    /// Artwork named by the descriptor; a terminal has nowhere to show it
    splash_image: Option<Url>,
    icon: Option<Url>,
}

impl ConsoleState {
    fn redraw(&mut self, text: &str) {
        // Terminal write failures are not worth aborting a launch over.
        let _ = write!(self.out, "\r{}\x1b[K", text);
        let _ = self.out.flush();
    }

    fn due(&mut self) -> bool {
        let now = Instant::now();
        match self.last_draw {
            Some(last) if now.duration_since(last) <= INTERVAL => false,
            _ => {
                self.last_draw = Some(now);
                true
            }
        }
    }
}

/// Single-line terminal status, redrawn with carriage returns.
pub struct ConsoleStatus {
    state: Mutex<ConsoleState>,
}

impl ConsoleStatus {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            state: Mutex::new(ConsoleState {
                out,
                current: String::new(),
                spin: 0,
                last_draw: None,
                title: None,
                splash_image: None,
                icon: None,
            }),
        }
    }

    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    pub fn title(&self) -> Option<String> {
        self.state.lock().ok().and_then(|s| s.title.clone())
    }

    pub fn splash_image(&self) -> Option<Url> {
        self.state.lock().ok().and_then(|s| s.splash_image.clone())
    }

    pub fn icon(&self) -> Option<Url> {
        self.state.lock().ok().and_then(|s| s.icon.clone())
    }

    fn with_state<F: FnOnce(&mut ConsoleState)>(&self, f: F) {
        match self.state.lock() {
            Ok(mut state) => f(&mut state),
            Err(_) => warn!("Console status poisoned, dropping update"),
        }
    }
}

impl StatusSink for ConsoleStatus {
    fn message(&self, text: &str) {
        self.with_state(|s| {
            s.current = format!("{} ", text);
            s.spin = 0;
            s.last_draw = None;
            let line = s.current.clone();
            s.redraw(&line);
        });
    }

    fn transfer(&self, total: Option<u64>, position: u64) {
        self.with_state(|s| {
            if !s.due() {
                return;
            }
            let line = match total {
                Some(total) if total > 0 => format!("{}({}%)", s.current, position * 100 / total),
                _ => format!("{}({} bytes)", s.current, position),
            };
            s.redraw(&line);
        });
    }

    fn progress(&self) {
        self.with_state(|s| {
            if !s.due() {
                return;
            }
            let line = format!("{}{}", s.current, SPINNER[s.spin % SPINNER.len()]);
            s.spin += 1;
            s.redraw(&line);
        });
    }

    fn error(&self, err: &LaunchError) {
        self.with_state(|s| {
            let _ = writeln!(s.out);
            let _ = writeln!(s.out, "error: {}", err);
            if let Some(msg) = err.user_message() {
                let _ = writeln!(s.out, "{}", msg);
            }
            let _ = s.out.flush();
            s.current.clear();
        });
    }

    fn command(&self, words: &[String], env: &Environment) -> Result<Handled> {
        let Some(cmd) = words.first().map(String::as_str) else {
            return Ok(Handled::No);
        };
        let usage = match cmd {
            "title" => "title TITLE",
            "splash-image" => "splash-image URL",
            "icon" => "icon URL",
            _ => return Ok(Handled::No),
        };
        let Some(arg) = words.get(1) else {
            return Err(LaunchError::Usage(usage.to_string()));
        };
        let arg = env.expand(arg)?;
        if cmd == "title" {
            self.with_state(|s| s.title = Some(arg));
            return Ok(Handled::Yes);
        }

        let uri = env.resolve(&arg)?;
        debug!("Console status does not display {} {}", cmd, uri);
        self.with_state(|s| {
            if cmd == "icon" {
                s.icon = Some(uri);
            } else {
                s.splash_image = Some(uri);
            }
        });
        Ok(Handled::Yes)
    }

    fn announce(&self, target: &str) {
        self.with_state(|s| {
            let name = s.title.clone().unwrap_or_else(|| target.to_string());
            let _ = writeln!(s.out);
            let _ = writeln!(s.out, "Launching {}...", name);
            let _ = s.out.flush();
        });
    }

    fn close(&self) {
        self.with_state(|s| {
            let _ = writeln!(s.out);
            let _ = s.out.flush();
            s.current.clear();
        });
    }
}

enum Event {
    Message(String),
    Transfer(Option<u64>, u64),
    Progress,
    Error(LaunchError, Sender<()>),
    Command(Vec<String>, Environment, Sender<Result<Handled>>),
    Announce(String),
    Close,
}

/// Forwards events to a presenter sink running on a dedicated thread.
pub struct ThreadedStatus {
    tx: Sender<Event>,
    presenter: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadedStatus {
    pub fn spawn(inner: Box<dyn StatusSink>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let presenter = thread::spawn(move || present(inner, rx));
        Self {
            tx,
            presenter: Mutex::new(Some(presenter)),
        }
    }

    fn send(&self, event: Event) {
        if self.tx.send(event).is_err() {
            warn!("Status presenter has exited, dropping event");
        }
    }

    /// Stop the presenter and wait for it to drain.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Event::Close);
        if let Ok(mut guard) = self.presenter.lock() {
            if let Some(handle) = guard.take() {
                if handle.join().is_err() {
                    warn!("Status presenter panicked");
                }
            }
        }
    }
}

fn present(inner: Box<dyn StatusSink>, rx: Receiver<Event>) {
    for event in rx {
        match event {
            Event::Message(text) => inner.message(&text),
            Event::Transfer(total, pos) => inner.transfer(total, pos),
            Event::Progress => inner.progress(),
            Event::Error(err, ack) => {
                inner.error(&err);
                let _ = ack.send(());
            }
            Event::Command(words, env, reply) => {
                let _ = reply.send(inner.command(&words, &env));
            }
            Event::Announce(target) => inner.announce(&target),
            Event::Close => {
                inner.close();
                break;
            }
        }
    }
}

/// Detached copy of an error for handing to another thread.
fn detach(err: &LaunchError) -> LaunchError {
    let text = match err.user_message() {
        Some(msg) if msg != err.to_string() => format!("{}\n{}", err, msg),
        _ => err.to_string(),
    };
    LaunchError::User(text)
}

impl StatusSink for ThreadedStatus {
    fn message(&self, text: &str) {
        self.send(Event::Message(text.to_string()));
    }

    fn transfer(&self, total: Option<u64>, position: u64) {
        self.send(Event::Transfer(total, position));
    }

    fn progress(&self) {
        self.send(Event::Progress);
    }

    /// Blocks until the presenter has shown the error.
    fn error(&self, err: &LaunchError) {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if self.tx.send(Event::Error(detach(err), ack_tx)).is_err() {
            error!("{}", err);
            return;
        }
        if ack_rx.recv().is_err() {
            warn!("Status presenter exited before acknowledging error");
        }
    }

    /// Asks the presenter's sink, waiting for its answer.
    fn command(&self, words: &[String], env: &Environment) -> Result<Handled> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let event = Event::Command(words.to_vec(), env.clone(), reply_tx);
        if self.tx.send(event).is_err() {
            warn!("Status presenter has exited, not offering {:?}", words.first());
            return Ok(Handled::No);
        }
        reply_rx.recv().unwrap_or_else(|_| {
            warn!("Status presenter exited before answering");
            Ok(Handled::No)
        })
    }

    fn announce(&self, target: &str) {
        self.send(Event::Announce(target.to_string()));
    }

    fn close(&self) {
        self.shutdown();
    }
}

impl Drop for ThreadedStatus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[test]
    fn test_console_redraws_message_and_percentage() {
        let out = Shared::default();
        let status = ConsoleStatus::new(Box::new(out.clone()));
        status.message("Fetching a.jar...");
        status.transfer(Some(200), 50);
        let text = out.text();
        assert!(text.contains("\rFetching a.jar... \x1b[K"));
        assert!(text.contains("(25%)"));
    }

    #[test]
    fn test_console_transfer_is_rate_limited() {
        let out = Shared::default();
        let status = ConsoleStatus::new(Box::new(out.clone()));
        status.message("x");
        status.transfer(Some(100), 1);
        status.transfer(Some(100), 2);
        let text = out.text();
        assert!(text.contains("(1%)"));
        assert!(!text.contains("(2%)"));
    }

    #[test]
    fn test_console_error_includes_remediation() {
        let out = Shared::default();
        let status = ConsoleStatus::new(Box::new(out.clone()));
        status.error(&LaunchError::ReplaceFailed {
            path: "/c/a.jar".into(),
        });
        assert!(out.text().contains("please quit it and try again"));
    }

    struct Counting {
        errors: Arc<AtomicUsize>,
    }

    impl StatusSink for Counting {
        fn message(&self, _text: &str) {}
        fn transfer(&self, _total: Option<u64>, _position: u64) {}
        fn progress(&self) {}
        fn error(&self, _err: &LaunchError) {
            thread::sleep(Duration::from_millis(20));
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_threaded_error_waits_for_acknowledgement() {
        let errors = Arc::new(AtomicUsize::new(0));
        let status = ThreadedStatus::spawn(Box::new(Counting {
            errors: Arc::clone(&errors),
        }));
        status.message("working");
        status.error(&LaunchError::User("boom".to_string()));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        status.close();
    }

    fn words(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    fn env() -> Environment {
        let host = Arc::new(crate::launch::runtime::HostInfo::fixed("Linux", "amd64"));
        Environment::new(host).with_base(Url::parse("http://example/app/launch.hl").unwrap())
    }

    #[test]
    fn test_console_claims_artwork_commands() {
        let status = ConsoleStatus::new(Box::new(Shared::default()));
        let env = env();
        assert!(matches!(
            status.command(&words("splash-image splash.png"), &env),
            Ok(Handled::Yes)
        ));
        assert!(matches!(
            status.command(&words("icon /icons/app.png"), &env),
            Ok(Handled::Yes)
        ));
        assert_eq!(
            status.splash_image().map(String::from),
            Some("http://example/app/splash.png".to_string())
        );
        assert_eq!(
            status.icon().map(String::from),
            Some("http://example/icons/app.png".to_string())
        );
        assert!(matches!(
            status.command(&words("icon"), &env),
            Err(LaunchError::Usage(u)) if u == "icon URL"
        ));
        assert!(matches!(
            status.command(&words("class-path a.jar"), &env),
            Ok(Handled::No)
        ));
    }

    #[test]
    fn test_threaded_forwards_commands_to_presenter() {
        let out = Shared::default();
        let status = ThreadedStatus::spawn(Box::new(ConsoleStatus::new(Box::new(out.clone()))));
        let env = env();
        assert!(matches!(
            status.command(&words("title Demo"), &env),
            Ok(Handled::Yes)
        ));
        assert!(matches!(
            status.command(&words("title"), &env),
            Err(LaunchError::Usage(_))
        ));
        assert!(matches!(
            status.command(&words("main-class a.B"), &env),
            Ok(Handled::No)
        ));
        status.announce("a.B");
        status.close();
        assert!(out.text().contains("Launching Demo..."));
    }
}
