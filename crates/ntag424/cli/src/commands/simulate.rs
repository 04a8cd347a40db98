//! End-to-end run against the simulated tag

use std::error::Error;
use std::path::PathBuf;

use ntagkit_ntag424::simulator::SimulatedTag;
use ntagkit_ntag424::{NdefImage, Ntag424Service, SessionConfig, sdm};
use tracing::info;

use super::load_config;
use crate::utils::display::{self, Tone};

/// Scan, configure and tap a factory-fresh simulated tag
pub async fn simulate_command(path: &PathBuf, taps: u32) -> Result<(), Box<dyn Error>> {
    let config = load_config(path)?;
    let plan = config.plan()?;

    let tag = SimulatedTag::new();
    let service = Ntag424Service::new(tag.transport(), SessionConfig::default());

    println!("{}", display::heading("Scan"));
    let tag_info = service.scan().await?;
    println!("{}", serde_json::to_string_pretty(&tag_info)?);

    println!("{}", display::heading("Write"));
    let ack = service.write_configuration(&config).await?;
    println!("{}", display::ack(&ack));
    service.disconnect().await?;
    info!(apdus = tag.apdu_count(), "simulated session closed");

    println!("{}", display::heading("Taps"));
    for _ in 0..taps {
        let file = tag.tap()?;
        let Some(url) = NdefImage::parse_uri(&file) else {
            println!("{}", display::line(Tone::Warn, "NDEF file holds no URI record"));
            break;
        };
        let Some(template) = &plan.template else {
            println!("  {url}");
            continue;
        };
        println!("  {}", display::mirrored_url(&url, template.layout()));
        let reading = sdm::verify(template, url.as_bytes(), &plan.sdm_keys)?;
        let mac = if reading.authenticated { "valid" } else { "absent" };
        println!(
            "{}",
            display::fields(
                "  Verified",
                &[
                    ("UID", reading.uid.to_string()),
                    ("Counter", reading.counter.to_string()),
                    ("MAC", mac.to_string()),
                ],
            )
        );
    }
    Ok(())
}
