//! Device information command implementation.

use {
    anyhow::Result,
    console::style,
    samflash::{ChipProfile, Port},
};

use crate::config::Config;
use crate::{Cli, connect};

/// Info command implementation.
///
/// An unregistered chip id is reported rather than treated as a failure.
pub(crate) fn cmd_info(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let mut session = connect(cli, config)?;
    let chip_id = session.chip_id().unwrap_or_default();
    let version = session.version().unwrap_or_default().trim_end().to_string();
    let port = session.port().name().to_string();
    session.close()?;

    let profile = ChipProfile::from_chip_id(chip_id).ok();

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": info_json(&port, chip_id, &version, profile.as_ref()),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("\n{}", style("Device").bold().underlined());
    eprintln!("  Port:     {port}");
    eprintln!("  Chip id:  {chip_id:#010x}");
    eprintln!("  Monitor:  {version}");

    let Some(profile) = profile else {
        eprintln!("  Family:   {}", style("unknown").yellow());
        return Ok(());
    };

    eprintln!("\n{}", style("Flash").bold().underlined());
    eprintln!("  Family:   {}", style(profile.family).cyan().bold());
    eprintln!("  Base:     {:#010x}", profile.flash_base);
    eprintln!("  Size:     {} KiB", profile.flash_size() / 1024);
    eprintln!(
        "  Pages:    {} x {} bytes",
        profile.page_count, profile.page_size
    );
    eprintln!("  Planes:   {}", profile.planes);
    eprintln!("  Locks:    {}", profile.lock_regions);
    Ok(())
}

fn info_json(
    port: &str,
    chip_id: u32,
    version: &str,
    profile: Option<&ChipProfile>,
) -> serde_json::Value {
    let flash = profile.map(|p| {
        serde_json::json!({
            "family": p.family.to_string(),
            "base": format!("0x{:08X}", p.flash_base),
            "size": p.flash_size(),
            "page_size": p.page_size,
            "page_count": p.page_count,
            "planes": p.planes,
            "lock_regions": p.lock_regions,
        })
    });

    serde_json::json!({
        "port": port,
        "chip_id": format!("0x{chip_id:08X}"),
        "version": version,
        "flash": flash,
    })
}
