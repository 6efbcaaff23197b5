//! Command-line driver for the CAPP emulator.
//!
//! Typical uses:
//!
//! ```text
//! cappsim -c program.uc                     # assemble and run from ROM
//! cappsim -c program.uc -D depot -x         # save to ring, then execute
//! cappsim -c program.uc -D depot -d 1 -s    # save to drum 1, ring 0
//! cappsim -D depot -d 1 -r 2                # boot a pre-positioned ring
//! ```

mod depot_fs;

use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{event, Level};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

use assembler::Assembler;
use base::prelude::*;
use cpu::io::wordio::send_as_u32;
use cpu::io::{DEPOT_OP_DRUM, DEPOT_OP_SELECT, DRUM_OP_RING, DRUM_OP_SELECT, RING_OP_REWIND_WRITE};
use cpu::Emulator;

/// Assemble and run programs for the CAPP machine.
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// Assembly source file to compile
    #[clap(short = 'c', long = "compile", value_name = "FILE")]
    compile: Option<PathBuf>,

    /// Depot directory holding persistent drums
    #[clap(short = 'D', long = "depot", value_name = "DIR")]
    depot: Option<PathBuf>,

    /// Drum to use
    #[clap(short = 'd', long = "drum", default_value_t = 0)]
    drum: u32,

    /// Ring to use
    #[clap(short = 'r', long = "ring", default_value_t = 0)]
    ring: u8,

    /// Save the compiled program to the ring, do not execute
    #[clap(short = 's', long = "save")]
    save: bool,

    /// Save the compiled program to the ring, then execute
    #[clap(short = 'x', long = "execute")]
    execute: bool,

    /// Tape input ("-" for stdin)
    #[clap(short = 'i', long = "input", default_value = "-")]
    input: String,

    /// Tape output ("-" for stdout)
    #[clap(short = 'o', long = "output", default_value = "-")]
    output: String,

    /// Verbose logging
    #[clap(short = 'v', long = "verbose")]
    verbose: bool,
}

/// A depot, drum or ring the command line asked for is not usable.
#[derive(Debug)]
struct DepotUnavailable(String);

impl Display for DepotUnavailable {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "depot: {}", self.0)
    }
}

impl std::error::Error for DepotUnavailable {}

/// Send an alert through the depot channel slot and collect its reply.
fn depot_alert(emulator: &mut Emulator, request: u32) -> Option<u32> {
    let slot = emulator.cpu.channel_mut(ChannelId::DEPOT)?;
    let (channel, response) = (&mut slot.channel, &mut slot.response);
    channel.alert(request, response);
    response.take()
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut emulator = Emulator::new();
    let mut boot = ChannelId::TEMP;
    let mut depot_changed = false;

    if let Some(depot_path) = &cli.depot {
        let depot = emulator
            .depot_mut()
            .expect("the emulator binds a depot channel");
        depot_fs::load_depot(depot, depot_path)?;
        depot.drum_mut(cli.drum);

        if cli.verbose {
            for (drum_id, drum) in depot.drums() {
                event!(Level::INFO, "drum {:06x}:", drum_id);
                for (ring_id, ring) in drum.rings() {
                    event!(Level::INFO, "  ring {:02x}: {} bytes", ring_id, ring.byte_len());
                }
            }
        }

        if depot_alert(&mut emulator, DEPOT_OP_SELECT | cli.drum) != Some(0) {
            return Err(Box::new(DepotUnavailable(format!(
                "{}/{:06x}.drum missing",
                depot_path.display(),
                cli.drum
            ))));
        }
        if depot_alert(
            &mut emulator,
            DEPOT_OP_DRUM | DRUM_OP_SELECT | u32::from(cli.ring),
        )
        .is_none()
        {
            return Err(Box::new(DepotUnavailable(format!(
                "{}/{:06x}.drum/{:02x}.ring missing",
                depot_path.display(),
                cli.drum,
                cli.ring
            ))));
        }

        event!(Level::DEBUG, "depot: drum {:06x}, ring {:02x}", cli.drum, cli.ring);
        boot = ChannelId::DEPOT;
    }

    if let Some(source_path) = &cli.compile {
        let source = fs::read_to_string(source_path)?;
        let mut asm = Assembler::default();
        for (name, value) in emulator.defines() {
            asm.predefine(&name, &value);
        }
        emulator.program = asm.parse(&source)?;

        if cli.save || cli.execute {
            // Rewrite the selected ring with the compiled image.
            if depot_alert(
                &mut emulator,
                DEPOT_OP_DRUM | DRUM_OP_RING | RING_OP_REWIND_WRITE,
            ) != Some(0)
            {
                return Err(Box::new(DepotUnavailable(format!(
                    "drum {:06x} ring {:02x} not selected",
                    cli.drum, cli.ring
                ))));
            }
            let image = emulator.program.binary();
            let slot = emulator
                .cpu
                .channel_mut(ChannelId::DEPOT)
                .expect("the emulator binds a depot channel");
            for word in image {
                send_as_u32(&mut slot.channel, word)?;
            }
            depot_changed = true;
        } else {
            boot = ChannelId::MONITOR;
        }
    }

    if !cli.save {
        let input: Box<dyn Read> = if cli.input == "-" {
            Box::new(io::stdin())
        } else {
            Box::new(fs::File::open(&cli.input)?)
        };
        let output: Box<dyn Write> = if cli.output == "-" {
            Box::new(io::stdout())
        } else {
            Box::new(fs::File::create(&cli.output)?)
        };
        let tape = emulator
            .tape_mut()
            .expect("the emulator binds a tape channel");
        tape.set_input(input);
        tape.set_output(output);

        event!(Level::DEBUG, "reset, boot from {boot}");
        emulator.reset(boot)?;
        depot_changed = true;

        loop {
            match emulator.tick() {
                Ok(true) => break,
                Ok(false) => {
                    if cli.verbose {
                        event!(Level::TRACE, "state:\n{}", emulator.cpu);
                    }
                }
                Err(fault) => return Err(Box::new(fault)),
            }
        }

        event!(
            Level::DEBUG,
            "done: {} ticks, {} power",
            emulator.ticks(),
            emulator.power()
        );
    }

    if let Some(depot_path) = &cli.depot {
        if depot_changed {
            event!(Level::DEBUG, "saving depot state");
            let depot = emulator
                .depot_mut()
                .expect("the emulator binds a depot channel");
            depot_fs::save_depot(depot, depot_path)?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{error}");
            ExitCode::FAILURE
        }
    }
}
