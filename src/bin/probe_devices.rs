//! probe_devices - report which capture devices are usable.
//!
//! Each index is opened and read once. The outcome per device is one of:
//! unavailable, opens but yields no frame, or readable at some resolution.

use anyhow::Result;
use clap::Parser;

use vigil::{BackendKind, CaptureSettings, DeviceId, DeviceOpener, SystemDevices};

#[derive(Parser, Debug)]
#[command(author, version, about = "Probe capture devices and report which ones deliver frames")]
struct Args {
    /// Number of device indices to scan, starting at 0.
    #[arg(long, env = "VIGIL_PROBE_COUNT", default_value = "10")]
    count: u32,

    /// Backend to open indices with.
    #[arg(long, default_value = "v4l2")]
    backend: BackendKind,

    /// Extra device ids (paths or URLs) to probe after the indices.
    #[arg(long = "device")]
    devices: Vec<DeviceId>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let opener = SystemDevices::new(CaptureSettings::default());

    let mut targets: Vec<(DeviceId, BackendKind)> = (0..args.count)
        .map(|index| (DeviceId::Index(index), args.backend))
        .collect();
    targets.extend(
        args.devices
            .into_iter()
            .map(|id| {
                let backend = BackendKind::infer(&id);
                (id, backend)
            }),
    );

    let mut usable = Vec::new();
    for (id, backend) in targets {
        let mut device = match opener.open(&id, backend) {
            Ok(device) => device,
            Err(err) => {
                log::debug!("{} ({}): {:#}", id, backend, err);
                println!("{:<24} unavailable", id.to_string());
                continue;
            }
        };
        match device.read_frame() {
            Ok(frame) if !frame.is_empty() => {
                println!(
                    "{:<24} readable {}x{} ({})",
                    id.to_string(),
                    frame.width,
                    frame.height,
                    backend
                );
                usable.push(id);
            }
            Ok(_) => println!("{:<24} opens, empty frame", id.to_string()),
            Err(err) => println!("{:<24} opens, read failed: {:#}", id.to_string(), err),
        }
    }

    if usable.is_empty() {
        println!("no readable capture device found");
    } else {
        let list: Vec<String> = usable.iter().map(ToString::to_string).collect();
        println!("suggested VIGIL_DEVICES={}", list.join(","));
    }
    Ok(())
}
