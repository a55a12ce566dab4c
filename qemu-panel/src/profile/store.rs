use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

use super::VmProfile;
use crate::error::{Error, Result};

/// The whole profile collection in one JSON file, rewritten on every save.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every stored profile. A missing file is an empty collection.
    pub fn load(&self) -> Result<Vec<VmProfile>> {
        if !self.path.exists() {
            debug!("no profile file at {}", self.path.display());
            return Ok(vec![]);
        }

        let content = fs::read_to_string(&self.path).map_err(|source| Error::Load {
            path: self.path.clone(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(vec![]);
        }

        let mut profiles: Vec<VmProfile> =
            serde_json::from_str(&content).map_err(|source| Error::Decode {
                path: self.path.clone(),
                source,
            })?;
        // hand edited files may carry out of range values
        for p in &mut profiles {
            p.clamp_resources();
        }
        debug!(
            "loaded {} profile(s) from {}",
            profiles.len(),
            self.path.display()
        );
        Ok(profiles)
    }

    /// Replaces the stored collection with `profiles`.
    ///
    /// The content goes to a temporary file in the same directory first and
    /// is renamed over the target, readers never see a half written file.
    pub fn save(&self, profiles: &[VmProfile]) -> Result<()> {
        self.write_atomic(profiles)
            .map_err(|source| Error::Persistence {
                path: self.path.clone(),
                source,
            })?;
        info!(
            "saved {} profile(s) to {}",
            profiles.len(),
            self.path.display()
        );
        Ok(())
    }

    fn write_atomic(&self, profiles: &[VmProfile]) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, profiles)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, path::PathBuf};

    use tempfile::TempDir;

    use super::*;
    use crate::profile::{Architecture, BootDevice, NetworkMode, UsbDeviceId};

    fn store_in(dir: &TempDir) -> ProfileStore {
        ProfileStore::new(dir.path().join("profiles.json"))
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        assert!(store_in(&dir).load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut usb = BTreeSet::new();
        usb.insert(UsbDeviceId::new(0x46d, 0xc52b));
        let profiles = vec![
            VmProfile::default(),
            VmProfile {
                name: "win11".into(),
                executable: PathBuf::from("/usr/bin/qemu-system-x86_64"),
                arch: Architecture::Aarch64,
                iso: Some("a.iso".into()),
                disk: Some("b.qcow2".into()),
                ram: 8192,
                cpus: 8,
                boot: BootDevice::Disk,
                extra: "-vga std".into(),
                network_mode: NetworkMode::Custom,
                network_options: "-net user,hostfwd=tcp::2222-:22".into(),
                usb_devices: usb,
                ovmf_enabled: true,
                ovmf_path: Some("OVMF_CODE.fd".into()),
                iso_library_dir: Some("/srv/isos".into()),
                ..Default::default()
            },
        ];

        store.save(&profiles).unwrap();
        assert_eq!(store.load().unwrap(), profiles);
    }

    #[test]
    fn save_overwrites_whole_collection() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store
            .save(&[VmProfile::named("a"), VmProfile::named("b")])
            .unwrap();
        store.save(&[VmProfile::named("c")]).unwrap();

        let names: Vec<_> = store.load().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, ["c"]);
    }

    #[test]
    fn absent_fields_take_defaults() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(
            store.path(),
            r#"[{"name": "old", "qemu_path": "qemu", "ram": 1024, "boot": "Disk image", "network_mode": "user"}]"#,
        )
        .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        let p = &loaded[0];
        assert_eq!(p.name, "old");
        assert_eq!(p.ram, 1024);
        assert_eq!(p.cpus, 2);
        assert_eq!(p.boot, BootDevice::Disk);
        assert_eq!(p.network_mode, NetworkMode::Nat);
        assert!(p.usb_devices.is_empty());
        assert!(p.snapshots.is_empty());
        assert_eq!(p.iso_library_dir, None);
    }

    #[test]
    fn unknown_arch_keeps_the_collection() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(
            store.path(),
            r#"[{"name": "ok"}, {"name": "sparc-vm", "arch": "sparc64"}]"#,
        )
        .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].name, "sparc-vm");
        assert_eq!(loaded[1].arch, Architecture::X86_64);
    }

    #[test]
    fn bad_usb_ids_are_dropped() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(
            store.path(),
            r#"[{"name": "lab", "usb_devices": ["garbage", "046d:c52b", "0x1:"]}]"#,
        )
        .unwrap();

        let p = &store.load().unwrap()[0];
        assert_eq!(p.usb_devices.len(), 1);
        assert!(p.usb_devices.contains(&UsbDeviceId::new(0x46d, 0xc52b)));
    }

    #[test]
    fn loaded_resources_are_clamped() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), r#"[{"ram": 16, "cpus": 0}, {"ram": 999999, "cpus": 500}]"#)
            .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!((loaded[0].ram, loaded[0].cpus), (128, 1));
        assert_eq!((loaded[1].ram, loaded[1].cpus), (131072, 64));
    }

    #[test]
    fn empty_strings_mean_unset_paths() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(
            store.path(),
            r#"[{"iso": "", "disk": "", "ovmf_path": "", "usb_devices": ["0x46d:0xc52b"]}]"#,
        )
        .unwrap();

        let p = &store.load().unwrap()[0];
        assert_eq!(p.iso, None);
        assert_eq!(p.disk, None);
        assert_eq!(p.ovmf_path, None);
        assert!(p.usb_devices.contains(&UsbDeviceId::new(0x46d, 0xc52b)));

        store.save(std::slice::from_ref(p)).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw[0]["iso"], "");
        assert_eq!(raw[0]["boot"], "ISO (cdrom)");
        assert_eq!(raw[0]["network_mode"], "user (NAT)");
        assert_eq!(raw[0]["usb_devices"][0], "0x46d:0xc52b");
    }

    #[test]
    fn malformed_file_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(store.load(), Err(Error::Decode { .. })));
    }

    #[test]
    fn unwritable_target_is_a_persistence_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();
        let store = ProfileStore::new(blocker.join("profiles.json"));

        let err = store.save(&[VmProfile::default()]).unwrap_err();
        assert!(matches!(err, Error::Persistence { .. }));
    }
}
