//! Hang-trap demo
//!
//! Runs a simulated GPU with a simulated monitor process through one hang
//! session, one manual-dump session and a final stop.
//!
//! # Environment Variables
//!
//! - `HANGTRAP_LOG=debug` - log filter (default `info`)
//! - `HANGTRAP_HANGDUMP_TIMEOUT_MS=3000` - untrap timeout

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use hangtrap_core::{Bdf, DeviceHandle, StaticBackend, TrapEventKind, TrapStatus, VfIndex};
use hangtrap_runtime::{ControlChannel, DebugControl, SimProcessTable, TrapConfig};
use tracing_subscriber::EnvFilter;

const DEV: DeviceHandle = DeviceHandle::new(1);
const PF: Bdf = Bdf::from_parts(0x03, 0x00, 0x0);
const VF2: Bdf = Bdf::from_parts(0x03, 0x02, 0x1);

// HANGTRAP_LOG=debug cargo run -p trapdemo
fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env("HANGTRAP_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("=== Hang-trap Demo ===\n");

    let config = TrapConfig::from_env();
    config.validate()?;
    config.log();

    let procs = Arc::new(SimProcessTable::new());
    let backend = Arc::new(StaticBackend::new().with_vf(DEV, VfIndex::new(2), VF2));
    backend.set_diag_data(PF, b"ring timeout on gfx, vf2 wptr stuck".to_vec());

    let control = DebugControl::new(config, procs.clone(), backend.clone());
    control.attach_device(DEV, PF, 0);

    let monitor = procs.spawn("gpu-monitor");
    procs.enter(monitor);
    let channel = Arc::new(control.open_channel());

    let ch = Arc::clone(&channel);
    let p = procs.clone();
    let mon = thread::spawn(move || -> anyhow::Result<usize> {
        p.enter(monitor);
        run_monitor(&ch)
    });

    // Hang on VF2
    wait_for_status(&control, TrapStatus::Waiting)?;
    let handshake = control.signal_hang_detected(DEV, VfIndex::new(2))?;
    println!("core: hang handshake {:?}", handshake);
    control.signal_diag_data_ready(DEV);

    // Operator-requested dump on the PF
    wait_for_status(&control, TrapStatus::Waiting)?;
    backend.set_diag_data(PF, b"manual capture".to_vec());
    let handshake = control.signal_manual_dump_requested(DEV, VfIndex::PF)?;
    println!("core: manual dump handshake {:?}", handshake);
    control.signal_diag_data_ready(DEV);

    wait_for_status(&control, TrapStatus::Waiting)?;
    channel.stop_trap(PF)?;

    let sessions = mon
        .join()
        .map_err(|_| anyhow::anyhow!("monitor thread panicked"))??;
    println!("\nmonitor handled {} session(s)", sessions);

    control.shutdown();
    println!("\n=== Demo Complete ===");
    Ok(())
}

fn run_monitor(channel: &ControlChannel) -> anyhow::Result<usize> {
    let mut sessions = 0;
    loop {
        let outcome = channel.start_trap(PF).context("start trap")?;
        if outcome.event == TrapEventKind::Exit {
            println!("monitor: trap stopped");
            return Ok(sessions);
        }
        println!(
            "monitor: {} on {} (vf {}), cookie {:#010x}",
            outcome.event, outcome.bdf, outcome.vf_index, outcome.cookie
        );

        channel.notify_dump_done(PF).context("notify dump done")?;
        let data = channel.get_diagnostic_data(PF, 4096).context("read diagnosis data")?;
        println!(
            "monitor: {} bytes, cookie {:#010x}: {:?}",
            data.len(),
            data.cookie,
            String::from_utf8_lossy(&data.bytes)
        );
        sessions += 1;
    }
}

fn wait_for_status(control: &DebugControl, status: TrapStatus) -> anyhow::Result<()> {
    let ctx = control
        .registry()
        .find_by_bdf(PF)
        .context("device not attached")?;
    let deadline = Instant::now() + Duration::from_secs(5);
    while ctx.status() != status {
        if Instant::now() >= deadline {
            bail!("{} stuck in {}, expected {}", PF, ctx.status(), status);
        }
        thread::sleep(Duration::from_millis(5));
    }
    Ok(())
}
