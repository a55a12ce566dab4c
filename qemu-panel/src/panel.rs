//! Interactive line based control panel.
//!
//! Every action works on [`AppContext`] and returns to the main menu.
//! Domain errors are printed and the loop goes on, a closed input ends the
//! session. Leaving the panel stops every VM it started.

use std::path::PathBuf;

use clap::ValueEnum;
use colored::Colorize;

use crate::{
    ctx::AppContext,
    disk::MAX_DISK_GB,
    download::DownloadProgress,
    profile::{Architecture, BootDevice, CPU_RANGE, NetworkMode, RAM_RANGE, VmProfile},
    run,
    ui::Prompt,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Select,
    Show,
    New,
    Duplicate,
    Edit,
    Usb,
    Library,
    Download,
    CreateDisk,
    ShowCommand,
    Start,
    StopAll,
    Delete,
    Quit,
}

impl Action {
    const ALL: [Action; 14] = [
        Action::Select,
        Action::Show,
        Action::New,
        Action::Duplicate,
        Action::Edit,
        Action::Usb,
        Action::Library,
        Action::Download,
        Action::CreateDisk,
        Action::ShowCommand,
        Action::Start,
        Action::StopAll,
        Action::Delete,
        Action::Quit,
    ];

    fn label(&self) -> &'static str {
        match self {
            Action::Select => "Select profile",
            Action::Show => "Show profile",
            Action::New => "New profile",
            Action::Duplicate => "Duplicate profile",
            Action::Edit => "Edit profile",
            Action::Usb => "USB passthrough",
            Action::Library => "Pick ISO from library",
            Action::Download => "Download ISO",
            Action::CreateDisk => "Create disk image",
            Action::ShowCommand => "Show command line",
            Action::Start => "Start VM",
            Action::StopAll => "Stop all VMs",
            Action::Delete => "Delete profile",
            Action::Quit => "Quit",
        }
    }
}

pub async fn run(ctx: &mut AppContext, prompt: &mut Prompt) -> anyhow::Result<()> {
    let labels: Vec<&str> = Action::ALL.iter().map(|a| a.label()).collect();

    let res = loop {
        for inst in ctx.supervisor_mut().reap() {
            println!("{}", format!("VM `{}` has exited", inst.name).yellow());
        }
        header(ctx);

        let action = match prompt.select("Action:", &labels) {
            Ok(i) => Action::ALL[i],
            Err(e) => break Err(e),
        };
        if action == Action::Quit {
            match prompt.confirm("Quit and stop all running VMs?") {
                Ok(true) => break Ok(()),
                Ok(false) => continue,
                Err(e) => break Err(e),
            }
        }

        if let Err(e) = dispatch(ctx, prompt, action).await {
            if e.downcast_ref::<crate::Error>().is_some() {
                println!("{}", format!("{e}").red());
                continue;
            }
            break Err(e);
        }
    };

    if !ctx.running().is_empty() {
        ctx.stop_all();
    }
    res
}

fn header(ctx: &AppContext) {
    let p = ctx.current();
    println!();
    println!(
        "{} {} [{}] {} MB, {} cpu(s), {}",
        "Profile:".bold(),
        p.name.cyan(),
        ctx.current_index(),
        p.ram,
        p.cpus,
        p.network_mode
    );
    let running = ctx.running();
    if !running.is_empty() {
        let names: Vec<&str> = running.iter().map(|i| i.name.as_str()).collect();
        println!("{} {}", "Running:".bold(), names.join(", "));
    }
}

async fn dispatch(
    ctx: &mut AppContext,
    prompt: &mut Prompt,
    action: Action,
) -> anyhow::Result<()> {
    let idx = ctx.current_index();
    match action {
        Action::Select => {
            let names: Vec<String> = ctx.profiles().iter().map(|p| p.name.clone()).collect();
            let i = prompt.select("Profile:", &names)?;
            ctx.select_index(i)?;
        }
        Action::Show => println!("{}", describe(ctx.current())?),
        Action::New => {
            let name = prompt.input::<String>("Name of the new profile:")?;
            let name = (!name.is_empty()).then_some(name);
            ctx.new_profile(name)?;
        }
        Action::Duplicate => {
            let current = format!("{} (copy)", ctx.current().name);
            let name = prompt.edit("Name of the copy:", current)?;
            ctx.duplicate(idx, name)?;
        }
        Action::Edit => {
            let edited = edit_profile(prompt, ctx.current().clone())?;
            ctx.commit(idx, edited)?;
        }
        Action::Usb => usb(ctx, prompt)?,
        Action::Library => {
            let isos = ctx.library(idx)?;
            if isos.is_empty() {
                println!("No ISO files in the library directory.");
                return Ok(());
            }
            let i = prompt.select("ISO:", &isos)?;
            let path = ctx.pick_library_iso(idx, &isos[i])?;
            println!("ISO set to {}", path.display());
        }
        Action::Download => {
            let names: Vec<&str> = ctx
                .settings
                .iso_catalog
                .iter()
                .map(|s| s.name.as_str())
                .collect();
            let i = prompt.select("Download:", &names)?;
            let source = ctx.settings.iso_catalog[i].clone();
            let dest = ctx.default_download_path(&source);
            let dest = prompt.edit("Save to:", dest.display().to_string())?;
            ctx.download_iso(idx, &source, Some(dest.into()), &DownloadProgress::new()).await?;
        }
        Action::CreateDisk => {
            let path = prompt.input::<String>("Disk image path (.qcow2 or raw):")?;
            if path.is_empty() {
                return Ok(());
            }
            let size = prompt.edit(&format!("Size in GB (1-{MAX_DISK_GB}):"), 20u32)?;
            ctx.create_disk(idx, &PathBuf::from(path), size)?;
        }
        Action::ShowCommand => {
            println!("{}", run::command_line(&ctx.compile(idx)?));
        }
        Action::Start => {
            ctx.start(idx)?;
        }
        Action::StopAll => {
            ctx.stop_all();
        }
        Action::Delete => {
            let name = ctx.current().name.clone();
            if prompt.confirm(&format!("Delete profile `{name}`?"))? {
                ctx.delete(idx)?;
            }
        }
        Action::Quit => {}
    }
    Ok(())
}

/// Every field of `p`, as stored in the profile file.
fn describe(p: &VmProfile) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(p)?)
}

fn usb(ctx: &mut AppContext, prompt: &mut Prompt) -> anyhow::Result<()> {
    if !ctx.usb_available() {
        println!("USB passthrough is not available on this host.");
        return Ok(());
    }
    let devices = ctx.usb_devices();
    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    let idx = ctx.current_index();
    let mut edited = ctx.current().clone();
    let options: Vec<String> = devices
        .iter()
        .map(|d| {
            let mark = if edited.usb_devices.contains(&d.id) {
                "[x]"
            } else {
                "[ ]"
            };
            format!("{mark} {d}")
        })
        .collect();

    let i = prompt.select("Toggle device:", &options)?;
    let id = devices[i].id;
    if !edited.usb_devices.remove(&id) {
        edited.usb_devices.insert(id);
    }
    ctx.commit(idx, edited)?;
    Ok(())
}

/// Walks through every field, an empty answer keeps the value and `-`
/// clears an optional path.
fn edit_profile(prompt: &mut Prompt, mut p: VmProfile) -> anyhow::Result<VmProfile> {
    p.name = prompt.edit("Name:", p.name)?;
    p.executable = prompt
        .edit("QEMU executable:", p.executable.display().to_string())?
        .into();

    let archs = Architecture::value_variants();
    let labels: Vec<&str> = archs.iter().map(|a| a.as_str()).collect();
    p.arch = archs[prompt.select(&format!("Architecture [{}]:", p.arch), &labels)?];

    p.iso = edit_path(prompt, "ISO image:", p.iso)?;
    p.disk = edit_path(prompt, "Disk image:", p.disk)?;
    p.ram = prompt.edit(
        &format!("RAM in MB ({}-{}):", RAM_RANGE.start(), RAM_RANGE.end()),
        p.ram,
    )?;
    p.cpus = prompt.edit(
        &format!("CPUs ({}-{}):", CPU_RANGE.start(), CPU_RANGE.end()),
        p.cpus,
    )?;
    p.clamp_resources();

    let boots = BootDevice::value_variants();
    let labels: Vec<&str> = boots.iter().map(|b| b.label()).collect();
    p.boot = boots[prompt.select(&format!("Boot from [{}]:", p.boot), &labels)?];

    p.extra = prompt.edit("Extra QEMU options:", p.extra)?;
    p.ovmf_enabled = prompt.edit("UEFI (y/n):", p.ovmf_enabled)?;
    if p.ovmf_enabled {
        p.ovmf_path = edit_path(prompt, "OVMF firmware:", p.ovmf_path)?;
    }

    let modes = NetworkMode::value_variants();
    let labels: Vec<&str> = modes.iter().map(|m| m.label()).collect();
    p.network_mode = modes[prompt.select(&format!("Network [{}]:", p.network_mode), &labels)?];
    if p.network_mode == NetworkMode::Custom {
        p.network_options = prompt.edit("Network options:", p.network_options)?;
    }

    p.iso_library_dir = edit_path(prompt, "ISO library directory:", p.iso_library_dir)?;
    Ok(p)
}

fn edit_path(
    prompt: &mut Prompt,
    question: &str,
    current: Option<PathBuf>,
) -> anyhow::Result<Option<PathBuf>> {
    let shown = current
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let answer = prompt.edit(question, shown)?;
    Ok(match answer.as_str() {
        "-" | "" => None,
        _ => Some(answer.into()),
    })
}
