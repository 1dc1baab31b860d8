//! Output formatting for CLI responses

use anyhow::Error;
use colored::*;
use serde_json::json;
use streamota::{InstallReport, UpdateCheck, UpdateError};

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Failed to format output as JSON: {e}"),
    }
}

/// Stable kind name of an error, for machine output
pub fn error_kind(error: &Error) -> &'static str {
    error
        .downcast_ref::<UpdateError>()
        .map_or("other", UpdateError::kind)
}

fn error_json(error: &Error) -> serde_json::Value {
    let safe = error
        .downcast_ref::<UpdateError>()
        .is_none_or(UpdateError::is_safe_failure);
    json!({
        "success": false,
        "error": {
            "message": format!("{error:#}"),
            "kind": error_kind(error),
            "firmware_intact": safe,
        }
    })
}

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    print_json(&error_json(error));
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }

    if let Some(update_error) = error.downcast_ref::<UpdateError>() {
        if !update_error.is_safe_failure() {
            eprintln!(
                "  {}",
                "The firmware tree may be partially updated; reinstall before restarting."
                    .red()
            );
        }
    }
}

/// Print the outcome of `check`
pub fn print_check(check: &UpdateCheck, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "check": check,
        }));
        return;
    }

    println!(
        "{} {}",
        "Installed:".bold(),
        check.installed_version.as_deref().unwrap_or("unknown")
    );
    println!(
        "{} {} ({})",
        "Published:".bold(),
        check.manifest.version,
        check.manifest.archive_filename.dimmed()
    );
    if check.manifest.required_free_kb > 0 {
        println!("  Requires {} kB free", check.manifest.required_free_kb);
    }
    match check.manifest.expected_hash_hex() {
        Some(hash) => println!("  SHA-256 {}", hash.dimmed()),
        None => println!("  {}", "No hash declared".yellow()),
    }

    if check.update_available {
        println!("{}", "Update available".green().bold());
    } else {
        println!("{}", "Up to date".green());
    }
}

/// Print the outcome of `update`
pub fn print_update(report: Option<&InstallReport>, json: bool) {
    if json {
        print_json(&json!({
            "success": true,
            "installed": report.is_some(),
            "report": report,
        }));
        return;
    }

    let Some(report) = report else {
        println!("{}", "Up to date, nothing installed".green());
        return;
    };

    println!(
        "{} {}",
        "Installed firmware".green().bold(),
        report.version.bold()
    );
    let extract = &report.extract;
    println!(
        "  {} files ({} B), {} directories created",
        extract.files_written, extract.bytes_written, extract.directories_created
    );
    if extract.excluded > 0 {
        println!("  {} excluded entries kept", extract.excluded);
    }
    if extract.unsupported > 0 {
        println!(
            "  {} {}",
            "Skipped unsupported entries:".yellow(),
            extract.unsupported
        );
    }
    for path in &report.deleted {
        println!("  Removed {}", path.dimmed());
    }
    for warning in &report.warnings {
        println!("  {} {}", "Warning:".yellow(), warning);
    }
    println!("  Took {:.1?}", report.duration);
    println!("{}", "Restart the device to run the new firmware.".bold());
}
