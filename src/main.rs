use anyhow::Result;

use media_dedups::commands;
use media_dedups::Cli;

fn main() -> Result<()> {
    let cli = Cli::with_config()?;
    let options = cli.to_options()?;

    let report = commands::run_app(&options)?;
    if report.summary.failed_extractions > 0 || report.summary.failed_removals > 0 {
        log::warn!(
            "Finished with {} extraction failures and {} removal failures",
            report.summary.failed_extractions,
            report.summary.failed_removals
        );
    }
    Ok(())
}
