//! Flash and erase command implementations.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use samflash::{
    CancelToken, ChipFamily, ChipProfile, EefcFlash, NativePort, ProgramOptions, SAM3X_ASSIST,
    SambaSession, WriteStrategy,
};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::{Cli, CliError, connect, use_fancy_output};

/// Resolved options for the flash command.
#[derive(Debug, Clone)]
pub(crate) struct FlashOptions {
    pub(crate) verify: bool,
    pub(crate) boot: bool,
    pub(crate) reset: bool,
    pub(crate) assist_blob: Option<PathBuf>,
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &Config,
    cancel: &CancelToken,
    image_path: &Path,
    options: &FlashOptions,
) -> Result<()> {
    let image = fs::read(image_path)
        .with_context(|| format!("failed to read image {}", image_path.display()))?;
    if image.is_empty() {
        return Err(CliError::Usage(format!("{} is empty", image_path.display())).into());
    }
    let assist = options
        .assist_blob
        .as_deref()
        .map(|path| {
            fs::read(path)
                .with_context(|| format!("failed to read assist routine {}", path.display()))
        })
        .transpose()?;

    if !cli.quiet {
        eprintln!(
            "{} Loaded {} ({} bytes)",
            style("•").cyan(),
            image_path.display(),
            image.len()
        );
    }

    let mut session = connect(cli, config)?;
    let mut flash = flash_controller(&mut session, cancel, assist.is_some())?;
    if !cli.quiet {
        eprintln!("{} {}", style("✓").green(), flash.profile());
    }

    flash.init()?;
    if let Some(code) = &assist {
        flash.load_assist_routine(code)?;
    }

    let pb = progress_bar(cli, image.len());
    let program_options = ProgramOptions {
        erase: true,
        verify: options.verify,
    };
    flash.program(&image, program_options, |done, _total| {
        pb.set_position(done as u64);
    })?;
    pb.finish_and_clear();

    if options.boot {
        flash.set_boot(true)?;
    }
    if options.reset {
        flash.reset()?;
    }
    drop(flash);
    session.close()?;

    if !cli.quiet {
        let verified = if options.verify { ", verified" } else { "" };
        eprintln!(
            "{} Programmed {} bytes{verified}",
            style("✓").green().bold(),
            image.len()
        );
    }
    Ok(())
}

/// Erase command implementation.
pub(crate) fn cmd_erase(cli: &Cli, config: &Config, cancel: &CancelToken) -> Result<()> {
    let mut session = connect(cli, config)?;
    let mut flash = flash_controller(&mut session, cancel, false)?;

    if !cli.quiet {
        eprintln!(
            "{} Erasing {} plane(s) of {}",
            style("•").red(),
            flash.profile().planes,
            flash.profile().family
        );
    }
    flash.init()?;
    flash.erase()?;
    drop(flash);
    session.close()?;

    if !cli.quiet {
        eprintln!("{} Flash erased", style("✓").green().bold());
    }
    Ok(())
}

/// Build the controller for the connected chip.
///
/// With `assisted`, page writes are staged through the RAM routine.
fn flash_controller<'s>(
    session: &'s mut SambaSession<NativePort>,
    cancel: &CancelToken,
    assisted: bool,
) -> Result<EefcFlash<'s, NativePort>> {
    let chip_id = session.chip_id().context("chip id not read")?;
    let mut profile = ChipProfile::from_chip_id(chip_id).context("unsupported device")?;

    if assisted {
        if profile.family != ChipFamily::Sam3x8 {
            return Err(CliError::Usage(format!(
                "--assist-blob is only supported on {}, found {}",
                ChipFamily::Sam3x8,
                profile.family
            ))
            .into());
        }
        profile = profile.with_strategy(WriteStrategy::Assisted(SAM3X_ASSIST));
    }
    Ok(EefcFlash::new(session, profile).with_cancel(cancel.clone()))
}

fn progress_bar(cli: &Cli, total: usize) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total as u64);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}
