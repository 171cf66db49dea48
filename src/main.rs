#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use indicatif::ProgressBar;

use avr_spi_bootloader::protocol::FRAME_LEN;
use avr_spi_bootloader::sim::{self, SimApplication, SimError, SimMemory, SimPeripheral};
use avr_spi_bootloader::{Bootloader, Options, Status};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Transaction script to replay, one host frame per line
    #[structopt(long)]
    script: PathBuf,

    /// Flash image loaded before and saved after the session
    #[structopt(long)]
    flash: Option<PathBuf>,

    /// File to write device response frames to
    #[structopt(long, default_value = "bootloader_sim_output.txt")]
    output: PathBuf,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() -> anyhow::Result<()> {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    let text = fs::read_to_string(&o.script)
        .with_context(|| format!("reading script {}", o.script.display()))?;
    let script = sim::parse_script(&text)?;

    info!("Loaded {} transactions", script.len());

    let mut memory = SimMemory::new(o.options.chip);
    if let Some(path) = o.flash.as_ref().filter(|p| p.exists()) {
        let image = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        memory.load_flash(&image)?;
        info!("Loaded {} flash image", bytefmt::format(image.len() as u64));
    }

    let port = SimPeripheral::from_script(&script);
    let mut bootloader: Bootloader<_, _, _, SimError> =
        Bootloader::new(port, memory, SimApplication, o.options.clone());

    let bar = ProgressBar::new(script.len() as u64);

    let mut done = 0;

    // The firmware would start the application here, the simulation stops instead
    let reason = loop {
        let r = bootloader.poll();

        let frames = bootloader.port().exchanged() / FRAME_LEN;
        for (i, t) in script.iter().enumerate().take(frames).skip(done) {
            match t.cycle {
                Some(c) => trace!("Frame {} clocked from cycle {}", i, c),
                None => trace!("Frame {} clocked", i),
            }
            if t.raise_cs {
                debug!("Chip select raised after frame {}", i);
            }
        }
        done = frames;
        bar.set_position(frames as u64);

        match r {
            Ok(Status::Continue) => (),
            Ok(Status::Leave) => break "leave command".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    bar.finish();
    info!(
        "Bootloader exited: {} ({} of {} frames, chip select raised {} times)",
        reason,
        done,
        script.len(),
        bootloader.port().cs_raised()
    );

    let (port, memory, _) = bootloader.release();

    let mut out = fs::File::create(&o.output)
        .with_context(|| format!("creating {}", o.output.display()))?;
    for f in port.output_frames() {
        writeln!(out, "{}", sim::format_frame(&f))?;
    }

    if let Some(path) = &o.flash {
        fs::write(path, memory.flash()).with_context(|| format!("writing {}", path.display()))?;
        info!("Saved flash image to {}", path.display());
    }

    Ok(())
}
