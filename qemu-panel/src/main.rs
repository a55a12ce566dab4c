use std::{env::current_dir, path::PathBuf, process::ExitCode, time::Duration};

use anyhow::Result;
use clap::*;
use colored::Colorize;
use qemu_panel::{
    config::{SETTINGS_FILE, Settings},
    ctx::AppContext,
    download::DownloadProgress,
    panel,
    profile::{Architecture, BootDevice, NetworkMode, UsbDeviceId, VmProfile},
    ui::Prompt,
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Working directory, holds the settings and profile files
    #[arg(short, long, global = true)]
    workdir: Option<PathBuf>,
    /// Settings file, defaults to `.qemu-panel.toml` in the working directory
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: SubCommands,
}

#[derive(Subcommand)]
enum SubCommands {
    /// List profiles
    List,
    /// Print one profile
    Show { profile: String },
    /// Add a profile with default settings
    New {
        #[arg(long)]
        name: Option<String>,
    },
    /// Copy a profile under a new name
    Duplicate {
        profile: String,
        #[arg(long)]
        name: String,
    },
    /// Change fields of a profile
    Edit(EditArgs),
    Delete { profile: String },
    /// Print the QEMU command line of a profile, one token per line
    Args { profile: String },
    /// Start one or more VMs
    Start(StartArgs),
    /// List host USB devices
    Usb,
    /// List or pick ISO files from the profile's library directory
    Isos {
        profile: String,
        #[arg(long)]
        pick: Option<String>,
    },
    /// Download an ISO from the catalog and use it for a profile
    Download(DownloadArgs),
    /// Create a disk image with qemu-img and use it for a profile
    CreateDisk {
        profile: String,
        #[arg(long)]
        path: PathBuf,
        /// Size in GB
        #[arg(long, default_value_t = 20)]
        size: u32,
    },
    /// Print the JSON schema of the profile or settings file
    Schema {
        #[arg(value_enum, default_value_t = SchemaKind::Profiles)]
        kind: SchemaKind,
    },
    /// Interactive control panel
    Panel,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SchemaKind {
    Profiles,
    Settings,
}

#[derive(Args, Debug)]
struct EditArgs {
    profile: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    qemu: Option<PathBuf>,
    #[arg(long, value_enum)]
    arch: Option<Architecture>,
    /// ISO image, an empty value clears it
    #[arg(long)]
    iso: Option<PathBuf>,
    /// Disk image, an empty value clears it
    #[arg(long)]
    disk: Option<PathBuf>,
    /// Memory in MB
    #[arg(long, value_parser = value_parser!(u32).range(128..=131072))]
    ram: Option<u32>,
    #[arg(long, value_parser = value_parser!(u32).range(1..=64))]
    cpus: Option<u32>,
    #[arg(long, value_enum)]
    boot: Option<BootDevice>,
    #[arg(long, allow_hyphen_values = true)]
    extra: Option<String>,
    #[arg(long, overrides_with = "no_uefi")]
    uefi: bool,
    #[arg(long, overrides_with = "uefi")]
    no_uefi: bool,
    #[arg(long)]
    ovmf: Option<PathBuf>,
    #[arg(long, value_enum)]
    net: Option<NetworkMode>,
    #[arg(long, allow_hyphen_values = true)]
    net_options: Option<String>,
    /// `0xVVVV:0xPPPP`
    #[arg(long, num_args = 1..)]
    usb_add: Vec<UsbDeviceId>,
    #[arg(long, num_args = 1..)]
    usb_remove: Vec<UsbDeviceId>,
    #[arg(long)]
    iso_library: Option<PathBuf>,
}

impl EditArgs {
    fn apply(self, p: &mut VmProfile) {
        if let Some(name) = self.name {
            p.name = name;
        }
        if let Some(qemu) = self.qemu {
            p.executable = qemu;
        }
        if let Some(arch) = self.arch {
            p.arch = arch;
        }
        if let Some(iso) = self.iso {
            p.iso = non_empty(iso);
        }
        if let Some(disk) = self.disk {
            p.disk = non_empty(disk);
        }
        if let Some(ram) = self.ram {
            p.ram = ram;
        }
        if let Some(cpus) = self.cpus {
            p.cpus = cpus;
        }
        if let Some(boot) = self.boot {
            p.boot = boot;
        }
        if let Some(extra) = self.extra {
            p.extra = extra;
        }
        if self.uefi {
            p.ovmf_enabled = true;
        }
        if self.no_uefi {
            p.ovmf_enabled = false;
        }
        if let Some(ovmf) = self.ovmf {
            p.ovmf_path = non_empty(ovmf);
        }
        if let Some(net) = self.net {
            p.network_mode = net;
        }
        if let Some(opts) = self.net_options {
            p.network_options = opts;
        }
        p.usb_devices.extend(self.usb_add);
        for id in &self.usb_remove {
            p.usb_devices.remove(id);
        }
        if let Some(dir) = self.iso_library {
            p.iso_library_dir = non_empty(dir);
        }
    }
}

fn non_empty(path: PathBuf) -> Option<PathBuf> {
    (!path.as_os_str().is_empty()).then_some(path)
}

#[derive(Args, Debug)]
struct StartArgs {
    #[arg(required = true)]
    profiles: Vec<String>,
    /// Leave the VMs running and return immediately
    #[arg(long)]
    detach: bool,
}

#[derive(Args, Debug)]
struct DownloadArgs {
    /// Profile that gets the ISO, defaults to the first one
    #[arg(long)]
    profile: Option<String>,
    /// Catalog entry, by name or file name
    #[arg(long)]
    iso: Option<String>,
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", format!("error: {e:#}").red());
            ExitCode::FAILURE
        }
    }
}

fn init_logger(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(format!("warn,qemu_panel={level}")),
    )
    .init();
}

async fn run(cli: Cli) -> Result<()> {
    if let SubCommands::Schema { kind } = cli.command {
        let schema = match kind {
            SchemaKind::Profiles => schemars::schema_for!(Vec<VmProfile>),
            SchemaKind::Settings => schemars::schema_for!(Settings),
        };
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let workdir = match cli.workdir {
        Some(dir) => dir,
        None => current_dir()?,
    };
    let config = cli.config.unwrap_or_else(|| workdir.join(SETTINGS_FILE));
    let settings = Settings::load_or_init(&config)?;
    let mut ctx = AppContext::open(&workdir, settings)?;

    match cli.command {
        SubCommands::List => {
            for (i, p) in ctx.profiles().iter().enumerate() {
                println!(
                    "{i:>3}  {:<24} {:<8} {:>6} MB {:>3} cpu(s)",
                    p.name,
                    p.arch.as_str(),
                    p.ram,
                    p.cpus
                );
            }
        }
        SubCommands::Show { profile } => {
            let idx = ctx.find(&profile)?;
            println!("{}", serde_json::to_string_pretty(ctx.profile(idx)?)?);
        }
        SubCommands::New { name } => {
            let idx = ctx.new_profile(name)?;
            println!(
                "{}",
                format!("Created profile `{}` [{idx}]", ctx.current().name).green()
            );
        }
        SubCommands::Duplicate { profile, name } => {
            let idx = ctx.find(&profile)?;
            let copy = ctx.duplicate(idx, name)?;
            println!(
                "{}",
                format!("Created profile `{}` [{copy}]", ctx.current().name).green()
            );
        }
        SubCommands::Edit(args) => {
            let idx = ctx.find(&args.profile)?;
            let mut edited = ctx.profile(idx)?.clone();
            args.apply(&mut edited);
            ctx.commit(idx, edited)?;
            println!(
                "{}",
                format!("Saved profile `{}`", ctx.profile(idx)?.name).green()
            );
        }
        SubCommands::Delete { profile } => {
            let idx = ctx.find(&profile)?;
            let removed = ctx.delete(idx)?;
            println!("{}", format!("Deleted profile `{}`", removed.name).green());
        }
        SubCommands::Args { profile } => {
            let idx = ctx.find(&profile)?;
            for token in ctx.compile(idx)? {
                println!("{token}");
            }
        }
        SubCommands::Start(args) => start(&mut ctx, args).await?,
        SubCommands::Usb => {
            if !ctx.usb_available() {
                println!("USB enumeration is not available on this host.");
                return Ok(());
            }
            let devices = ctx.usb_devices();
            if devices.is_empty() {
                println!("No USB devices found.");
            }
            for dev in devices {
                println!("{dev}");
            }
        }
        SubCommands::Isos { profile, pick } => {
            let idx = ctx.find(&profile)?;
            match pick {
                Some(file) => {
                    let path = ctx.pick_library_iso(idx, &file)?;
                    println!("{}", format!("ISO set to {}", path.display()).green());
                }
                None => {
                    for iso in ctx.library(idx)? {
                        println!("{iso}");
                    }
                }
            }
        }
        SubCommands::Download(args) => {
            let idx = match &args.profile {
                Some(p) => ctx.find(p)?,
                None => ctx.current_index(),
            };
            let source = match &args.iso {
                Some(name) => ctx
                    .settings
                    .find_iso(name)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("no catalog entry named `{name}`"))?,
                None => {
                    let names: Vec<&str> = ctx
                        .settings
                        .iso_catalog
                        .iter()
                        .map(|s| s.name.as_str())
                        .collect();
                    let i = Prompt::stdin().select("Download:", &names)?;
                    ctx.settings.iso_catalog[i].clone()
                }
            };
            let progress = if cli.quiet {
                DownloadProgress::hidden()
            } else {
                DownloadProgress::new()
            };
            ctx.download_iso(idx, &source, args.output, &progress).await?;
        }
        SubCommands::CreateDisk {
            profile,
            path,
            size,
        } => {
            let idx = ctx.find(&profile)?;
            ctx.create_disk(idx, &path, size)?;
        }
        SubCommands::Panel => {
            panel::run(&mut ctx, &mut Prompt::stdin()).await?;
        }
        SubCommands::Schema { .. } => {}
    }

    Ok(())
}

/// Starts every requested profile. Unless detached, waits for all of them
/// to exit and stops them on Ctrl-C.
async fn start(ctx: &mut AppContext, args: StartArgs) -> Result<()> {
    for query in &args.profiles {
        let res = match ctx.find(query) {
            Ok(idx) => ctx.start(idx).map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = res {
            if !args.detach {
                ctx.stop_all();
            }
            return Err(e.into());
        }
    }

    if args.detach {
        return Ok(());
    }

    println!("Press Ctrl-C to stop all VMs.");
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                ctx.stop_all();
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                for inst in ctx.supervisor_mut().reap() {
                    println!("{}", format!("VM `{}` has exited", inst.name).yellow());
                }
                if ctx.running().is_empty() {
                    break;
                }
            }
        }
    }
    Ok(())
}
