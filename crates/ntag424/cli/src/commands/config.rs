//! Configuration check and URL mirror preview

use std::error::Error;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use ntagkit_ntag424::{MirrorSettings, Ntag424Config, Uid};
use tracing::{debug, info};

use super::SIMULATOR_UID;
use crate::utils::display::{self, Tone};

/// Load a front end configuration from `path`
pub fn load_config(path: &PathBuf) -> Result<Ntag424Config, Box<dyn Error>> {
    let config = Ntag424Config::from_json(&std::fs::read_to_string(path)?)?;
    debug!(?config, "configuration loaded");
    Ok(config)
}

/// Validate a configuration and show the resulting write plan
pub fn check_command(path: &PathBuf, uid: Option<&str>) -> Result<(), Box<dyn Error>> {
    let config = load_config(path)?;
    let plan = config.plan()?;
    println!("{}", display::line(Tone::Done, "Configuration is valid"));

    let access = plan.settings.access;
    let keys = if plan.key_changes.is_empty() {
        "none".to_string()
    } else {
        plan.key_changes
            .iter()
            .map(|change| change.no.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    println!(
        "{}",
        display::fields(
            "Write plan",
            &[
                ("File", plan.file_no.to_string()),
                ("Select", format!("{:?}", plan.select_mode)),
                ("Authenticate with", plan.auth_slot.to_string()),
                ("Comm mode", plan.settings.comm_mode.to_string()),
                (
                    "Access (R/W/RW/Change)",
                    format!(
                        "{}/{}/{}/{}",
                        access.read, access.write, access.read_write, access.change
                    ),
                ),
                ("Key changes", keys),
                ("Commands", plan.command_count().to_string()),
            ],
        )
    );

    if let Some(sdm) = &plan.settings.sdm {
        let windows: Vec<_> = sdm
            .windows()
            .into_iter()
            .map(|(name, offset, len)| (name, format!("{offset}..{}", offset + len)))
            .collect();
        println!("{}", display::fields("Mirror windows (file offsets)", &windows));
    }

    let uid = Uid::from_hex(uid.unwrap_or(SIMULATOR_UID))?;
    match plan.preview(&uid)? {
        Some(preview) => println!("{}", display::fields("Preview", &[("Tap", preview)])),
        None => println!(
            "{}",
            display::line(Tone::Note, "SUN and SDM are disabled, nothing is mirrored")
        ),
    }
    Ok(())
}

/// Fill the empty key fields of a configuration file with random keys
pub fn keygen_command(path: &PathBuf) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(path)?;
    let filled = config.generate_missing_keys();
    if filled.is_empty() {
        println!(
            "{}",
            display::line(Tone::Note, "Every key the configuration needs is already set")
        );
        return Ok(());
    }

    std::fs::write(path, serde_json::to_string_pretty(&config)?)?;
    info!(fields = filled.len(), path = %path.display(), "keys generated");
    for field in filled {
        println!("{}", display::line(Tone::Done, &format!("Generated {field}")));
    }
    Ok(())
}

/// Print the backend URL for a tap
pub fn preview_command(
    path: Option<&PathBuf>,
    uid: &str,
    counter: u32,
) -> Result<(), Box<dyn Error>> {
    let settings: MirrorSettings = match path {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => MirrorSettings::default(),
    };
    let uid = Uid::from_hex(uid)?;
    let timestamp = u64::try_from(SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis())?;

    if !settings.enabled {
        info!("URL mirroring is disabled in these settings");
    }
    println!(
        "{}",
        display::fields(
            "Mirror",
            &[
                ("Preview", settings.preview(&uid, counter, timestamp)),
                ("Dynamic", settings.render_dynamic(&uid, counter)),
            ],
        )
    );
    Ok(())
}
