use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    process::{Child, Stdio},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    error::{Error, Result},
    utils::Command,
};

/// How long a VM gets to shut down after SIGTERM before it is killed.
#[cfg(unix)]
const TERM_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// A spawned VM process owned by the panel.
#[derive(Debug)]
pub struct RunningInstance {
    pub name: String,
    pub log_path: Option<PathBuf>,
    child: Child,
}

impl RunningInstance {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// `true` once the process is gone. Exit status is not inspected.
    pub fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM lets QEMU flush its disk images. A process still alive after
    /// [`TERM_GRACE`] is killed.
    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        use std::{thread, time::Instant};

        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        let pid = self.child.id() as libc::pid_t;
        if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let start = Instant::now();
        while start.elapsed() < TERM_GRACE {
            if self.child.try_wait()?.is_some() {
                return Ok(());
            }
            thread::sleep(std::time::Duration::from_millis(50));
        }

        debug!("`{}` ignored SIGTERM, killing it", self.name);
        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }
}

/// Tracks the VM processes started in this session.
#[derive(Debug)]
pub struct Supervisor {
    workdir: PathBuf,
    log_dir: Option<PathBuf>,
    instances: Vec<RunningInstance>,
}

impl Supervisor {
    /// Raw process output goes to a file under `log_dir`, or nowhere.
    pub fn new(workdir: impl Into<PathBuf>, log_dir: Option<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            log_dir,
            instances: vec![],
        }
    }

    pub fn instances(&self) -> &[RunningInstance] {
        &self.instances
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Starts `tokens[0]` with the remaining tokens as its arguments.
    pub fn launch(&mut self, name: &str, tokens: &[String]) -> Result<&RunningInstance> {
        let Some((program, args)) = tokens.split_first() else {
            return Err(Error::ExecutableNotFound(PathBuf::new()));
        };
        let launch_err = |source| Error::Launch {
            program: program.clone(),
            source,
        };

        let mut cmd = Command::new(program, &self.workdir);
        cmd.args(args);
        cmd.stdin(Stdio::null());

        let log_path = match &self.log_dir {
            Some(dir) => {
                let (path, out) = create_log_file(dir, name).map_err(launch_err)?;
                let err = out.try_clone().map_err(launch_err)?;
                cmd.stdout(out).stderr(err);
                Some(path)
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
                None
            }
        };

        cmd.print_cmd();
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                if let Some(path) = &log_path {
                    let _ = fs::remove_file(path);
                }
                return Err(launch_err(e));
            }
        };
        info!("started `{name}` as pid {}", child.id());

        self.instances.push(RunningInstance {
            name: name.to_string(),
            log_path,
            child,
        });
        Ok(&self.instances[self.instances.len() - 1])
    }

    /// Asks every tracked instance to stop and forgets all of them.
    ///
    /// A failing instance does not stop the others and its error is
    /// dropped. The list is cleared either way, so a process that refused to
    /// die is no longer tracked. Returns how many instances were attempted.
    pub fn terminate_all(&mut self) -> usize {
        let count = self.instances.len();
        for inst in &mut self.instances {
            if let Err(e) = inst.terminate() {
                debug!("terminate `{}` (pid {}) failed: {e}", inst.name, inst.pid());
            }
        }
        self.instances.clear();
        count
    }

    /// Drops instances whose process has already exited and returns them.
    pub fn reap(&mut self) -> Vec<RunningInstance> {
        let mut exited = vec![];
        let mut i = 0;
        while i < self.instances.len() {
            if self.instances[i].has_exited() {
                exited.push(self.instances.remove(i));
            } else {
                i += 1;
            }
        }
        exited
    }
}

/// `<name>-<millis>.log`, with a `-<n>` suffix when that file already exists.
fn create_log_file(dir: &Path, name: &str) -> io::Result<(PathBuf, File)> {
    fs::create_dir_all(dir)?;
    let stem = log_file_stem(name);
    let mut n = 0u32;
    loop {
        let path = if n == 0 {
            dir.join(format!("{stem}.log"))
        } else {
            dir.join(format!("{stem}-{n}.log"))
        };
        match File::options().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

fn log_file_stem(name: &str) -> String {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let safe: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{safe}-{stamp}")
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn log_files(dir: &Path) -> Vec<PathBuf> {
        match fs::read_dir(dir) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => vec![],
        }
    }

    #[test]
    fn missing_executable_is_a_launch_failure() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        let mut sup = Supervisor::new(dir.path(), Some(logs.clone()));
        let tokens = vec![
            dir.path().join("no-such-qemu").display().to_string(),
            "-m".to_string(),
            "128".to_string(),
        ];
        let err = sup.launch("vm", &tokens).unwrap_err();
        assert!(matches!(err, Error::Launch { .. }));
        assert!(sup.is_empty());
        assert!(log_files(&logs).is_empty());
    }

    #[test]
    fn empty_tokens_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mut sup = Supervisor::new(dir.path(), None);
        assert!(sup.launch("vm", &[]).is_err());
    }

    #[test]
    fn log_files_never_collide() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..3)
            .map(|_| create_log_file(dir.path(), "vm").unwrap().0)
            .collect();
        assert_eq!(log_files(dir.path()).len(), 3);
        assert_ne!(paths[0], paths[1]);
        assert_ne!(paths[1], paths[2]);
    }

    #[cfg(unix)]
    #[test]
    fn terminate_all_stops_and_clears() {
        let dir = TempDir::new().unwrap();
        let mut sup = Supervisor::new(dir.path(), Some(dir.path().join("logs")));
        let tokens = vec!["sleep".to_string(), "30".to_string()];
        sup.launch("first", &tokens).unwrap();
        sup.launch("second vm", &tokens).unwrap();
        assert_eq!(sup.instances().len(), 2);
        assert!(sup.instances().iter().all(|i| i.log_path.is_some()));

        assert_eq!(sup.terminate_all(), 2);
        assert!(sup.is_empty());
        assert_eq!(sup.terminate_all(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn terminate_sends_sigterm() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("got-term");
        let script = format!(
            "trap 'touch {}; exit 0' TERM; sleep 30 & wait",
            marker.display()
        );
        let mut sup = Supervisor::new(dir.path(), None);
        sup.launch("trap", &["sh".to_string(), "-c".to_string(), script]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(300));

        assert_eq!(sup.terminate_all(), 1);
        assert!(marker.exists());
    }

    #[cfg(unix)]
    #[test]
    fn terminate_all_tolerates_already_exited() {
        let dir = TempDir::new().unwrap();
        let mut sup = Supervisor::new(dir.path(), None);
        sup.launch("quick", &["true".to_string()]).unwrap();
        sup.launch("slow", &["sleep".to_string(), "30".to_string()]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(200));

        assert_eq!(sup.terminate_all(), 2);
        assert!(sup.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn reap_returns_exited_instances() {
        let dir = TempDir::new().unwrap();
        let mut sup = Supervisor::new(dir.path(), None);
        sup.launch("quick", &["true".to_string()]).unwrap();
        sup.launch("slow", &["sleep".to_string(), "30".to_string()]).unwrap();

        let mut exited = vec![];
        for _ in 0..50 {
            exited.extend(sup.reap());
            if !exited.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        assert_eq!(exited.len(), 1);
        assert_eq!(exited[0].name, "quick");
        assert_eq!(sup.instances().len(), 1);
        sup.terminate_all();
    }

    #[test]
    fn log_names_are_sanitized() {
        let stem = log_file_stem("my vm/1");
        assert!(stem.starts_with("my_vm_1-"));
        let dir = TempDir::new().unwrap();
        let (path, _) = create_log_file(dir.path(), "my vm/1").unwrap();
        assert!(path.to_string_lossy().ends_with(".log"));
    }
}
