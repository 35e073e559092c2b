use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tokio::sync::mpsc;

use wifi_warden::display::{self, display_error};
use wifi_warden::driver::linux::PcapRadio;
use wifi_warden::driver::blocking;
use wifi_warden::{Config, Error, MacAddress, OperatingMode, RadioDriver, WifiContext};

#[cfg(unix)]
extern crate libc;

#[derive(Parser)]
#[command(name = "wifi-warden")]
#[command(version)]
#[command(about = "802.11 station inventory and deauthentication tester", long_about = None)]
struct Args {
    /// Wireless interface (must support monitor mode and injection)
    #[arg(short, long)]
    interface: Option<String>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Catalog stations heard on one channel, or on all 14 when omitted
    Sniff {
        #[arg(long, default_value_t = 0)]
        channel: u8,

        #[arg(long)]
        json: bool,
    },

    /// Scan for access points
    Scan {
        #[arg(long)]
        json: bool,
    },

    /// Disconnect one station from one access point (authorized testing only)
    Deauth {
        /// BSSID of the access point
        #[arg(long)]
        ap: MacAddress,

        /// Station to disconnect
        #[arg(long)]
        target: MacAddress,

        /// Seconds to run; runs until Ctrl+C when omitted
        #[arg(long)]
        duration: Option<u64>,
    },
}

fn check_root_privileges() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(unix))]
    {
        false
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        display_error(&e.to_string());
        process::exit(1);
    }
}

async fn run(args: Args) -> wifi_warden::Result<()> {
    if !check_root_privileges() {
        eprintln!("Error: This application requires root privileges.");
        eprintln!("Please run with sudo or as root.");
        process::exit(1);
    }

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if args.interface.is_some() {
        config.interface = args.interface.clone();
    }

    let interface_name = match config.interface.clone().or_else(PcapRadio::detect) {
        Some(name) => name,
        None => {
            eprintln!("Error: No Wi-Fi interface found. Please specify one with --interface.");
            process::exit(1);
        }
    };
    info!("Using interface: {}", interface_name);

    let radio = Arc::new(PcapRadio::new(&interface_name));

    // A Ctrl+C during deauth stops the session gracefully through `stop_tx`.
    // Anywhere else the receiver is gone, so the handler restores the
    // interface itself and exits.
    let (stop_tx, stop_rx) = mpsc::unbounded_channel();
    let cleanup_radio = radio.clone();
    let stop_rx = match ctrlc::set_handler(move || {
        if stop_tx.send(()).is_ok() {
            return;
        }
        println!("\nReceived Ctrl+C, shutting down...");
        restore_managed_mode(cleanup_radio.as_ref());
        process::exit(130);
    }) {
        Ok(()) => Some(stop_rx),
        Err(e) => {
            error!("Error setting Ctrl+C handler: {}", e);
            None
        }
    };

    let mut ctx = WifiContext::new(radio.clone(), config);

    let result = match args.command {
        Command::Sniff { channel, json } => {
            drop(stop_rx);
            sniff(&mut ctx, channel, json).await
        }
        Command::Scan { json } => {
            drop(stop_rx);
            scan(&mut ctx, json)
        }
        Command::Deauth {
            ap,
            target,
            duration,
        } => deauth(&mut ctx, ap, target, duration, stop_rx).await,
    };

    blocking(|| restore_managed_mode(radio.as_ref()));

    result
}

fn restore_managed_mode(radio: &dyn RadioDriver) {
    if let Err(e) = radio.disable_promiscuous() {
        warn!("Failed to stop capture: {}", e);
    }
    if let Err(e) = radio.set_operating_mode(OperatingMode::Station) {
        warn!("Failed to restore managed mode: {}", e);
    } else {
        info!("Interface restored to managed mode");
    }
}

async fn sniff(ctx: &mut WifiContext, channel: u8, json: bool) -> wifi_warden::Result<()> {
    let summary = ctx.start_sniffer(channel).await?;
    info!(
        "Recorded {} frames on {} channel(s), {} skipped, {} dropped",
        summary.frames_recorded,
        summary.channels.len(),
        summary.frames_skipped,
        summary.frames_dropped
    );

    if json {
        println!("{}", display::devices_json(ctx.catalogs())?);
    } else {
        print!("{}", ctx.display_devices(channel)?);
    }
    Ok(())
}

fn scan(ctx: &mut WifiContext, json: bool) -> wifi_warden::Result<()> {
    blocking(|| ctx.scan_access_points())?;
    if json {
        println!("{}", display::inventory_json(ctx.inventory())?);
    } else {
        print!("{}", ctx.list_access_points());
    }
    Ok(())
}

async fn deauth(
    ctx: &mut WifiContext,
    ap: MacAddress,
    target: MacAddress,
    duration: Option<u64>,
    mut stop_rx: Option<mpsc::UnboundedReceiver<()>>,
) -> wifi_warden::Result<()> {
    if duration.is_none() && stop_rx.is_none() {
        return Err(Error::Config(
            "Ctrl+C cannot be caught; pass --duration to bound the attack".to_string(),
        ));
    }

    blocking(|| ctx.scan_access_points())?;
    blocking(|| ctx.driver().set_operating_mode(OperatingMode::Disconnected))?;
    blocking(|| ctx.start_deauth(ap, target))?;

    if duration.is_none() {
        println!("Running until Ctrl+C...");
    }
    if wait_for_stop(duration, stop_rx.as_mut()).await {
        println!("\nReceived Ctrl+C, shutting down...");
    }

    let stats = ctx.stop_deauth().await?;
    println!(
        "Sent {} frames in {} bursts ({} failed)",
        stats.frames_sent, stats.ticks, stats.frames_failed
    );
    Ok(())
}

/// Waits for `duration` seconds or Ctrl+C, whichever comes first. Returns
/// `true` when Ctrl+C ended the wait.
async fn wait_for_stop(
    duration: Option<u64>,
    stop_rx: Option<&mut mpsc::UnboundedReceiver<()>>,
) -> bool {
    let elapsed = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    let interrupted = async {
        if let Some(rx) = stop_rx {
            if rx.recv().await.is_some() {
                return;
            }
        }
        std::future::pending::<()>().await
    };

    tokio::select! {
        _ = elapsed => false,
        _ = interrupted => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wifi_warden::driver::sim::SimulatedRadio;

    #[tokio::test(start_paused = true)]
    async fn closed_interrupt_channel_waits_out_the_duration() {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        drop(tx);

        let started = tokio::time::Instant::now();
        assert!(!wait_for_stop(Some(3), Some(&mut rx)).await);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn ctrl_c_ends_the_wait_early() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(()).unwrap();

        let started = tokio::time::Instant::now();
        assert!(wait_for_stop(Some(60), Some(&mut rx)).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn duration_alone_bounds_the_wait() {
        assert!(!wait_for_stop(Some(2), None).await);
    }

    #[tokio::test]
    async fn unbounded_deauth_needs_ctrl_c() {
        let radio = Arc::new(SimulatedRadio::new());
        let mut ctx = WifiContext::new(radio.clone(), Config::default());
        let ap = MacAddress::new([0x34, 0x2c, 0xc4, 0xad, 0xb2, 0xd5]);
        let target = MacAddress::new([0x28, 0x7f, 0xcf, 0xba, 0x0f, 0x59]);

        let err = deauth(&mut ctx, ap, target, None, None).await;
        assert!(matches!(err, Err(Error::Config(_))));
        assert!(ctx.deauth_session().is_none());
        assert!(radio.mode().is_none());
    }
}
