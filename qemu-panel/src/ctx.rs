use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use colored::Colorize;

use crate::{
    config::{IsoSource, Settings},
    disk,
    download::{self, DownloadProgress},
    error::{Error, Result},
    library,
    profile::{NetworkMode, ProfileStore, UsbDeviceId, VmProfile},
    run::{self, RunningInstance, Supervisor, net},
    usb::{self, UsbDevice, UsbEnumerator},
};

/// Everything the panel works on: the profile collection, which profile is
/// selected, the VMs started so far and the optional USB capability.
pub struct AppContext {
    pub workdir: PathBuf,
    pub settings: Settings,
    store: ProfileStore,
    profiles: Vec<VmProfile>,
    current: usize,
    supervisor: Supervisor,
    usb: Option<Box<dyn UsbEnumerator>>,
}

impl AppContext {
    /// Loads the stored profiles, synthesizing a default one when there are
    /// none, and detects USB enumeration support.
    pub fn open(workdir: impl Into<PathBuf>, settings: Settings) -> Result<Self> {
        let workdir = workdir.into();
        let store = ProfileStore::new(settings.profiles_path(&workdir));
        let mut profiles = store.load()?;
        if profiles.is_empty() {
            debug!("no stored profiles, starting with a default one");
            profiles.push(VmProfile::default());
        }
        let supervisor = Supervisor::new(&workdir, Some(settings.instance_log_dir(&workdir)));

        Ok(Self {
            workdir,
            settings,
            store,
            profiles,
            current: 0,
            supervisor,
            usb: usb::detect(),
        })
    }

    /// Replaces the USB capability, `None` disables passthrough.
    pub fn with_usb(mut self, usb: Option<Box<dyn UsbEnumerator>>) -> Self {
        self.usb = usb;
        self
    }

    pub fn profiles(&self) -> &[VmProfile] {
        &self.profiles
    }

    pub fn store_path(&self) -> &Path {
        self.store.path()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &VmProfile {
        &self.profiles[self.current]
    }

    pub fn profile(&self, idx: usize) -> Result<&VmProfile> {
        self.profiles
            .get(idx)
            .ok_or_else(|| Error::ProfileNotFound(idx.to_string()))
    }

    /// Resolves a zero-based index or the first profile with that name.
    pub fn find(&self, query: &str) -> Result<usize> {
        if let Ok(idx) = query.parse::<usize>()
            && idx < self.profiles.len()
        {
            return Ok(idx);
        }
        self.profiles
            .iter()
            .position(|p| p.name == query)
            .ok_or_else(|| Error::ProfileNotFound(query.to_string()))
    }

    pub fn select(&mut self, query: &str) -> Result<usize> {
        self.current = self.find(query)?;
        Ok(self.current)
    }

    pub fn select_index(&mut self, idx: usize) -> Result<()> {
        self.profile(idx)?;
        self.current = idx;
        Ok(())
    }

    /// Appends a fresh profile, selects it and saves.
    pub fn new_profile(&mut self, name: Option<String>) -> Result<usize> {
        let profile = match name {
            Some(name) => VmProfile::named(name),
            None => VmProfile::default(),
        };
        self.append(profile)
    }

    /// Appends a copy of profile `idx` under a new name.
    pub fn duplicate(&mut self, idx: usize, name: String) -> Result<usize> {
        let mut copy = self.profile(idx)?.clone();
        copy.name = name;
        self.append(copy)
    }

    fn append(&mut self, profile: VmProfile) -> Result<usize> {
        let mut next = self.profiles.clone();
        next.push(profile);
        self.persist(next)?;
        self.current = self.profiles.len() - 1;
        Ok(self.current)
    }

    /// Stores `edited` in place of profile `idx` and saves the collection.
    ///
    /// If saving fails the in-memory collection is left as it was.
    pub fn commit(&mut self, idx: usize, edited: VmProfile) -> Result<()> {
        self.profile(idx)?;
        let mut next = self.profiles.clone();
        next[idx] = edited;
        self.persist(next)
    }

    /// Removes profile `idx`, the last remaining profile cannot be removed.
    pub fn delete(&mut self, idx: usize) -> Result<VmProfile> {
        self.profile(idx)?;
        if self.profiles.len() <= 1 {
            return Err(Error::LastProfile);
        }
        let mut next = self.profiles.clone();
        let removed = next.remove(idx);
        self.persist(next)?;
        self.current = idx.saturating_sub(1);
        Ok(removed)
    }

    pub fn save(&self) -> Result<()> {
        self.store.save(&self.profiles)
    }

    fn persist(&mut self, next: Vec<VmProfile>) -> Result<()> {
        self.store.save(&next)?;
        self.profiles = next;
        Ok(())
    }

    pub fn usb_available(&self) -> bool {
        self.usb.is_some()
    }

    pub fn usb_devices(&self) -> Vec<UsbDevice> {
        usb::list_devices(self.usb.as_deref())
    }

    /// Devices to pass through for `profile`. Without USB support the
    /// selection is ignored.
    pub fn passthrough_for(&self, profile: &VmProfile) -> BTreeSet<UsbDeviceId> {
        if self.usb.is_some() {
            return profile.usb_devices.clone();
        }
        if !profile.usb_devices.is_empty() {
            info!(
                "usb passthrough unavailable on this host, ignoring {} device(s)",
                profile.usb_devices.len()
            );
        }
        BTreeSet::new()
    }

    pub fn compile(&self, idx: usize) -> Result<Vec<String>> {
        let profile = self.profile(idx)?;
        Ok(run::compile(profile, &self.passthrough_for(profile)))
    }

    /// Compiles profile `idx` and starts it.
    pub fn start(&mut self, idx: usize) -> Result<&RunningInstance> {
        let profile = self.profile(idx)?;
        if !profile.executable_exists() {
            return Err(Error::ExecutableNotFound(profile.executable.clone()));
        }
        if profile.network_mode == NetworkMode::Bridged {
            net::warn_if_no_tap();
        }
        let name = profile.name.clone();
        let tokens = run::compile(profile, &self.passthrough_for(profile));

        let inst = self.supervisor.launch(&name, &tokens)?;
        println!(
            "{}",
            format!("Started VM `{name}` (pid {})", inst.pid()).green()
        );
        Ok(inst)
    }

    pub fn running(&self) -> &[RunningInstance] {
        self.supervisor.instances()
    }

    pub fn supervisor_mut(&mut self) -> &mut Supervisor {
        &mut self.supervisor
    }

    /// Stops every VM started in this session.
    pub fn stop_all(&mut self) -> usize {
        let n = self.supervisor.terminate_all();
        println!("{}", "Stopped all running VMs.".green());
        n
    }

    pub fn library(&self, idx: usize) -> Result<Vec<String>> {
        Ok(match &self.profile(idx)?.iso_library_dir {
            Some(dir) => library::scan(dir),
            None => vec![],
        })
    }

    /// Points the profile's ISO at `file` from its library directory.
    pub fn pick_library_iso(&mut self, idx: usize, file: &str) -> Result<PathBuf> {
        let mut edited = self.profile(idx)?.clone();
        let Some(dir) = edited.iso_library_dir.clone() else {
            return Err(Error::NoIsoLibrary(edited.name));
        };
        let path = library::entry_path(&dir, file);
        edited.iso = Some(path.clone());
        self.commit(idx, edited)?;
        Ok(path)
    }

    /// Creates a disk image and makes it the profile's disk.
    pub fn create_disk(&mut self, idx: usize, path: &Path, size_gb: u32) -> Result<()> {
        let mut edited = self.profile(idx)?.clone();
        disk::create(&self.workdir, &edited.executable, path, size_gb)?;
        edited.disk = Some(path.to_path_buf());
        self.commit(idx, edited)
    }

    pub fn default_download_path(&self, source: &IsoSource) -> PathBuf {
        self.settings
            .download_dir(&self.workdir)
            .join(&source.filename)
    }

    /// Downloads `source` and sets it as the ISO of profile `idx` once the
    /// transfer has finished.
    pub async fn download_iso(
        &mut self,
        idx: usize,
        source: &IsoSource,
        dest: Option<PathBuf>,
        progress: &DownloadProgress,
    ) -> Result<PathBuf> {
        self.profile(idx)?;
        let dest = dest.unwrap_or_else(|| self.default_download_path(source));
        println!("Downloading {} from {} ...", source.name, source.url);

        let (_task, rx) = download::spawn(source.url.clone(), dest);
        let path = download::follow(rx, progress).await?;
        println!(
            "{}",
            format!("Downloaded {} to {}", source.name, path.display()).green()
        );

        let mut edited = self.profile(idx)?.clone();
        edited.iso = Some(path.clone());
        self.commit(idx, edited)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::usb::SysfsUsb;

    fn open(dir: &TempDir) -> AppContext {
        AppContext::open(dir.path(), Settings::default())
            .unwrap()
            .with_usb(None)
    }

    #[test]
    fn empty_store_synthesizes_default() {
        let dir = TempDir::new().unwrap();
        let ctx = open(&dir);
        assert_eq!(ctx.profiles().len(), 1);
        assert_eq!(ctx.current().name, "Default VM");
        assert!(!ctx.store_path().exists());
    }

    #[test]
    fn lenient_load_keeps_every_profile() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("qemu-profiles.json"),
            r#"[{"name": "ok"}, {"name": "sparc-vm", "arch": "sparc64", "ram": 16, "usb_devices": ["garbage"]}]"#,
        )
        .unwrap();

        let ctx = open(&dir);
        assert_eq!(ctx.profiles().len(), 2);
        let p = ctx.profile(ctx.find("sparc-vm").unwrap()).unwrap();
        assert_eq!(p.arch.as_str(), "x86_64");
        assert_eq!(p.ram, 128);
        assert!(p.usb_devices.is_empty());

        let tokens = ctx.compile(1).unwrap();
        assert_eq!(&tokens[1..3], ["-m", "128"]);
    }

    #[test]
    fn new_duplicate_and_find() {
        let dir = TempDir::new().unwrap();
        let mut ctx = open(&dir);
        let idx = ctx.new_profile(Some("win11".into())).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(ctx.current_index(), 1);

        let mut edited = ctx.current().clone();
        edited.ram = 8192;
        ctx.commit(idx, edited).unwrap();
        let copy = ctx.duplicate(idx, "win11-b".into()).unwrap();
        assert_eq!(ctx.profile(copy).unwrap().ram, 8192);

        assert_eq!(ctx.find("win11-b").unwrap(), 2);
        assert_eq!(ctx.find("0").unwrap(), 0);
        assert!(matches!(ctx.find("nope"), Err(Error::ProfileNotFound(_))));

        let reopened = open(&dir);
        assert_eq!(reopened.profiles(), ctx.profiles());
    }

    #[test]
    fn delete_keeps_one_profile() {
        let dir = TempDir::new().unwrap();
        let mut ctx = open(&dir);
        assert!(matches!(ctx.delete(0), Err(Error::LastProfile)));

        ctx.new_profile(Some("b".into())).unwrap();
        ctx.new_profile(Some("c".into())).unwrap();
        ctx.delete(2).unwrap();
        assert_eq!(ctx.current_index(), 1);
        ctx.delete(0).unwrap();
        assert_eq!(ctx.current_index(), 0);
        assert_eq!(ctx.current().name, "b");
        assert_eq!(open(&dir).profiles().len(), 1);
    }

    #[test]
    fn failed_save_leaves_memory_unchanged() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "").unwrap();
        let settings = Settings {
            profiles_file: blocker.join("profiles.json"),
            ..Default::default()
        };
        let mut ctx = AppContext::open(dir.path(), settings)
            .unwrap()
            .with_usb(None);

        let mut edited = ctx.current().clone();
        edited.name = "renamed".into();
        assert!(matches!(
            ctx.commit(0, edited),
            Err(Error::Persistence { .. })
        ));
        assert_eq!(ctx.current().name, "Default VM");
        assert!(ctx.new_profile(None).is_err());
        assert_eq!(ctx.profiles().len(), 1);
    }

    #[test]
    fn passthrough_needs_usb_capability() {
        let dir = TempDir::new().unwrap();
        let mut ctx = open(&dir);
        let mut edited = ctx.current().clone();
        edited.usb_devices.insert(UsbDeviceId::new(0x46d, 0xc52b));
        ctx.commit(0, edited).unwrap();

        let tokens = ctx.compile(0).unwrap();
        assert!(!tokens.iter().any(|t| t.starts_with("usb-host")));

        let ctx = ctx.with_usb(Some(Box::new(SysfsUsb::new(dir.path()))));
        let tokens = ctx.compile(0).unwrap();
        assert!(tokens.contains(&"usb-host,hostdevice=0x46d:0xc52b".to_string()));
    }

    #[test]
    fn start_requires_existing_executable() {
        let dir = TempDir::new().unwrap();
        let mut ctx = open(&dir);
        assert!(matches!(ctx.start(0), Err(Error::ExecutableNotFound(_))));

        let mut edited = ctx.current().clone();
        edited.executable = dir.path().join("qemu-system-x86_64");
        ctx.commit(0, edited).unwrap();
        assert!(matches!(ctx.start(0), Err(Error::ExecutableNotFound(_))));
        assert!(ctx.running().is_empty());
    }

    #[test]
    fn library_pick_sets_iso() {
        let dir = TempDir::new().unwrap();
        let lib = dir.path().join("isos");
        fs::create_dir(&lib).unwrap();
        fs::write(lib.join("debian.iso"), "").unwrap();

        let mut ctx = open(&dir);
        assert!(ctx.library(0).unwrap().is_empty());

        let mut edited = ctx.current().clone();
        edited.iso_library_dir = Some(lib.clone());
        ctx.commit(0, edited).unwrap();

        assert_eq!(ctx.library(0).unwrap(), ["debian.iso"]);
        let picked = ctx.pick_library_iso(0, "debian.iso").unwrap();
        assert_eq!(picked, lib.join("debian.iso"));
        assert_eq!(ctx.current().iso.as_deref(), Some(picked.as_path()));
    }
}
