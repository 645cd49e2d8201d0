use std::path::Path;

use crate::errors::Result;
use crate::models::is_directory_entry;
use crate::services::app_data::AppData;
use crate::services::control::PatchControl;
use crate::services::status::GeneralStatusReporter;

/// Removes every file the ledger knows about. Files the patcher never installed are
/// left alone, as are directories that still hold any of them.
pub fn uninstall(
    app_data: &mut AppData,
    control: &PatchControl,
    reporter: Option<&GeneralStatusReporter>,
) -> Result<usize> {
    let names = app_data.metadata.get_file_names();
    let total = names.len() as u64;
    if total > 0 {
        tracing::info!("uninstalling {} files", total);
    }
    let (mut directories, files): (Vec<&String>, Vec<&String>) =
        names.iter().partition(|name| is_directory_entry(name));

    let mut done = 0u64;
    for name in files {
        control.check()?;
        app_data.local.delete_file(name)?;
        if let Some(parent) = parent_entry(name) {
            remove_if_empty(app_data, &parent)?;
        }
        app_data.metadata.remove_file(name)?;
        done += 1;
        if let Some(reporter) = reporter {
            reporter.set_fraction(done, total);
        }
    }
    directories.sort_by_key(|name| std::cmp::Reverse(name.matches('/').count()));
    for name in directories {
        control.check()?;
        remove_if_empty(app_data, name)?;
        app_data.metadata.remove_file(name)?;
        done += 1;
        if let Some(reporter) = reporter {
            reporter.set_fraction(done, total);
        }
    }
    Ok(names.len())
}

fn remove_if_empty(app_data: &AppData, name: &str) -> Result<()> {
    if app_data.local.directory_exists(name)? && app_data.local.is_directory_empty(name)? {
        app_data.local.delete_directory(name)?;
    }
    Ok(())
}

fn parent_entry(name: &str) -> Option<String> {
    let parent = Path::new(name).parent()?;
    let parent = parent.to_string_lossy();
    if parent.is_empty() {
        None
    } else {
        Some(parent.into_owned())
    }
}
