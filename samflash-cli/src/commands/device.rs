//! Boot source and reset command implementations.

use anyhow::{Context, Result};
use console::style;
use samflash::EefcFlash;

use crate::config::Config;
use crate::{Cli, connect};

/// Boot command implementation.
pub(crate) fn cmd_boot(cli: &Cli, config: &Config, to_flash: bool) -> Result<()> {
    let mut session = connect(cli, config)?;
    let mut flash = EefcFlash::from_session(&mut session).context("unsupported device")?;
    flash.set_boot(to_flash)?;
    drop(flash);
    session.close()?;

    if !cli.quiet {
        let source = if to_flash { "flash" } else { "ROM" };
        eprintln!("{} Boot source set to {source}", style("✓").green().bold());
    }
    Ok(())
}

/// Reset command implementation.
pub(crate) fn cmd_reset(cli: &Cli, config: &Config) -> Result<()> {
    let mut session = connect(cli, config)?;
    let mut flash = EefcFlash::from_session(&mut session).context("unsupported device")?;
    flash.reset()?;
    drop(flash);
    session.close()?;

    if !cli.quiet {
        eprintln!("{} Device reset", style("✓").green().bold());
    }
    Ok(())
}
