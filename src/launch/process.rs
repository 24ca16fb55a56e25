//! Runtime process launcher.
//!
//! Collects launch parameters from descriptor commands, then resolves every
//! referenced resource and assembles the argument vector in a fixed order:
//! runtime, heap, raw runtime flags, properties, library path, classpath,
//! entry point, program arguments.

use crate::config::types::{LaunchError, Result};
use crate::descriptor::env::Environment;
use crate::launch::native::NativeLib;
use crate::launch::runtime::{find_runtime, path_separator};
use crate::launch::script::write_command_file;
use crate::resource::Resource;
use crate::session::Session;
use log::{info, warn};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Child, Command, Stdio};

/// Heap ceiling (MB) when the host is not 64-bit
pub const HEAP_CEILING_32BIT: u32 = 1024;

#[derive(Clone, Debug, Default)]
pub struct ProcessLauncher {
    pub classpath: Vec<Resource>,
    pub libraries: Vec<NativeLib>,
    pub jvm_args: Vec<String>,
    pub arguments: Vec<String>,
    pub properties: BTreeMap<String, String>,
    pub heap_size: Option<u32>,
    pub main_class: Option<String>,
    pub exec_jar: Option<Resource>,
    pub command_file: Option<String>,
}

/// Final command line, not yet started
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchPlan {
    pub argv: Vec<String>,
}

fn usage(text: &str) -> LaunchError {
    LaunchError::Usage(text.to_string())
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim launcher commands. Returns `false` for anything else.
    pub fn command(&mut self, words: &[String], env: &Environment) -> Result<bool> {
        let Some(cmd) = words.first() else {
            return Ok(false);
        };
        let arg = |i: usize, text: &str| -> Result<String> {
            env.expand(words.get(i).ok_or_else(|| usage(text))?)
        };

        match cmd.as_str() {
            "main-class" => {
                self.main_class = Some(arg(1, "main-class CLASS-NAME")?);
            }
            "exec-jar" => {
                self.exec_jar = Some(env.resource(&arg(1, "exec-jar URL")?)?);
            }
            "class-path" => {
                let res = env.resource(&arg(1, "class-path URL")?)?;
                self.classpath.push(res);
            }
            "property" => {
                let name = arg(1, "property NAME VALUE")?;
                let value = arg(2, "property NAME VALUE")?;
                self.properties.insert(name, value);
            }
            "heap-size" => {
                let mb = arg(1, "heap-size MBYTES")?;
                let mb: u32 = mb.trim().parse().map_err(|_| usage("heap-size MBYTES"))?;
                self.heap_size = (mb > 0).then_some(mb);
            }
            "jvm-arg" | "arguments" => {
                if words.len() < 2 {
                    return Err(usage(&format!("{} ARG...", cmd)));
                }
                let expanded = words[1..]
                    .iter()
                    .map(|w| env.expand(w))
                    .collect::<Result<Vec<_>>>()?;
                if cmd == "jvm-arg" {
                    self.jvm_args.extend(expanded);
                } else {
                    self.arguments.extend(expanded);
                }
            }
            "native-lib" => {
                const TEXT: &str = "native-lib OS ARCH URL [PREFIX]";
                if words.len() < 4 {
                    return Err(usage(TEXT));
                }
                let os = arg(1, TEXT)?;
                let arch = arg(2, TEXT)?;
                let res = env.resource(&arg(3, TEXT)?)?;
                let prefix = match words.get(4) {
                    Some(p) => Some(env.expand(p)?),
                    None => None,
                };
                self.libraries.push(NativeLib::new(&os, &arch, res, prefix)?);
            }
            "command-file" => {
                self.command_file = Some(arg(1, "command-file FILE-NAME")?);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Resolve resources and assemble the command line.
    pub fn prepare(&self, session: &Session) -> Result<LaunchPlan> {
        let runtime = find_runtime(session.settings.runtime_home.as_deref())?;
        let mut argv = vec![path_string(&runtime)];

        let mut classpath = Vec::with_capacity(self.classpath.len());
        for res in &self.classpath {
            classpath.push(path_string(&res.update(&session.cache)?));
        }
        let entry = match (&self.main_class, &self.exec_jar) {
            (Some(main), _) => vec![main.clone()],
            (None, Some(res)) => vec!["-jar".to_string(), path_string(&res.update(&session.cache)?)],
            (None, None) => {
                return Err(LaunchError::Config(
                    "neither main-class nor exec-jar specified".to_string(),
                ))
            }
        };

        if let Some(mut heap) = self.heap_size {
            if !session.host.is_64bit() {
                heap = heap.min(HEAP_CEILING_32BIT);
            }
            argv.push(format!("-Xmx{}m", heap));
        }
        argv.extend(self.jvm_args.iter().cloned());
        for (name, value) in &self.properties {
            argv.push(format!("-D{}={}", name, value));
        }

        let mut libdirs = Vec::new();
        for lib in &self.libraries {
            if lib.matches(&session.host) {
                libdirs.push(path_string(&lib.extract(&session.cache)?));
            }
        }
        if !libdirs.is_empty() {
            if let Some(inherited) = session.settings.library_path.as_deref() {
                if !inherited.is_empty() {
                    libdirs.push(inherited.to_string());
                }
            }
            argv.push(format!("-Djava.library.path={}", libdirs.join(path_separator())));
        }

        if !classpath.is_empty() {
            argv.push("-classpath".to_string());
            argv.push(classpath.join(path_separator()));
        }

        argv.extend(entry);
        argv.extend(self.arguments.iter().cloned());

        Ok(LaunchPlan { argv })
    }

    /// Prepare, optionally write the command file, and start the process.
    /// Does not wait for it.
    pub fn launch(&self, session: &Session) -> Result<(LaunchPlan, Child)> {
        let plan = self.prepare(session)?;

        if let Some(ref name) = self.command_file {
            match command_file_dir(session) {
                Some(dir) => match write_command_file(&dir, name, &plan.argv) {
                    Ok(path) => info!("Wrote command file {}", path.display()),
                    Err(e) => warn!("Could not write command file {}: {}", name, e),
                },
                None => warn!("No directory for command file {}", name),
            }
        }

        let target = self.main_class.clone().unwrap_or_else(|| {
            self.exec_jar
                .as_ref()
                .map(|r| r.uri.to_string())
                .unwrap_or_default()
        });
        session.status.message("Launching...");
        session.status.announce(&target);
        info!("[{}] Launching {:?}", session.id, plan.argv);

        let child = Command::new(&plan.argv[0])
            .args(&plan.argv[1..])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()?;
        Ok((plan, child))
    }
}

fn command_file_dir(session: &Session) -> Option<std::path::PathBuf> {
    if let Some(ref dir) = session.settings.command_file_dir {
        return Some(dir.clone());
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::runtime::HostInfo;
    use std::sync::Arc;
    use url::Url;

    fn env() -> Environment {
        let res = Resource::unvalidated(Url::parse("http://h/app/launch.hl").unwrap());
        Environment::for_resource(&res, Arc::new(HostInfo::fixed("Linux", "amd64")))
            .with_var("game", "haven")
    }

    fn line(launcher: &mut ProcessLauncher, words: &[&str]) -> Result<bool> {
        let words: Vec<String> = words.iter().map(|w| w.to_string()).collect();
        launcher.command(&words, &env())
    }

    #[test]
    fn test_commands_populate_launcher() {
        let mut l = ProcessLauncher::new();
        assert!(line(&mut l, &["class-path", "${game}.jar"]).unwrap());
        assert!(line(&mut l, &["main-class", "demo.Main"]).unwrap());
        assert!(line(&mut l, &["heap-size", "512"]).unwrap());
        assert!(line(&mut l, &["property", "b", "2"]).unwrap());
        assert!(line(&mut l, &["property", "a", "1"]).unwrap());
        assert!(line(&mut l, &["jvm-arg", "-Xss1m", "-ea"]).unwrap());
        assert!(line(&mut l, &["arguments", "--user", "${game}"]).unwrap());
        assert!(line(&mut l, &["native-lib", "linux", "amd64", "natives.jar", "linux64/"]).unwrap());
        assert!(!line(&mut l, &["include", "x.hl"]).unwrap());

        assert_eq!(l.classpath[0].uri.as_str(), "http://h/app/haven.jar");
        assert_eq!(
            l.classpath[0].referrer.as_ref().map(Url::as_str),
            Some("http://h/app/launch.hl")
        );
        assert_eq!(l.main_class.as_deref(), Some("demo.Main"));
        assert_eq!(l.heap_size, Some(512));
        assert_eq!(l.properties.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(l.jvm_args, vec!["-Xss1m", "-ea"]);
        assert_eq!(l.arguments, vec!["--user", "haven"]);
        assert_eq!(l.libraries[0].prefix.as_deref(), Some("linux64/"));
    }

    #[test]
    fn test_usage_errors() {
        let mut l = ProcessLauncher::new();
        assert!(matches!(line(&mut l, &["main-class"]), Err(LaunchError::Usage(_))));
        assert!(matches!(line(&mut l, &["heap-size", "lots"]), Err(LaunchError::Usage(_))));
        assert!(matches!(line(&mut l, &["native-lib", "linux", "amd64"]), Err(LaunchError::Usage(_))));
        assert!(matches!(line(&mut l, &["arguments"]), Err(LaunchError::Usage(_))));
    }
}
