use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Installation media offered by the download helper.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct IsoSource {
    pub name: String,
    pub url: String,
    /// Suggested file name for the download
    pub filename: String,
}

impl IsoSource {
    fn new(name: &str, url: &str, filename: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            filename: filename.to_string(),
        }
    }
}

pub fn default_catalog() -> Vec<IsoSource> {
    vec![
        IsoSource::new(
            "Ubuntu 24.04 LTS Desktop",
            "https://releases.ubuntu.com/24.04/ubuntu-24.04-desktop-amd64.iso",
            "ubuntu-24.04-desktop-amd64.iso",
        ),
        IsoSource::new(
            "Fedora Workstation 40",
            "https://download.fedoraproject.org/pub/fedora/linux/releases/40/Workstation/x86_64/iso/Fedora-Workstation-Live-x86_64-40-1.14.iso",
            "Fedora-Workstation-Live-x86_64-40-1.14.iso",
        ),
        IsoSource::new(
            "Debian 12.5.0 netinst",
            "https://cdimage.debian.org/debian-cd/current/amd64/iso-cd/debian-12.5.0-amd64-netinst.iso",
            "debian-12.5.0-amd64-netinst.iso",
        ),
        IsoSource::new(
            "Windows 11 (Eval, English, x64)",
            "https://software-download.microsoft.com/download/pr/22621.1.220506-1250.ni_release_CLIENT_CONSUMER_x64FRE_en-us.iso",
            "Win11_English_x64.iso",
        ),
    ]
}
