//! stflash - command-line ST-Link flash tool
//!
//! One invocation performs exactly one read, write, or mass-erase against
//! a target reached through an ST-Link probe. The probe is walked through
//! the mode transitions that make the transfer safe, and is put back into
//! a safe mode on the way out - including when the process is killed
//! mid-transfer.

mod cli;
mod commands;

use clap::Parser;
use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use stflash_core::{rescue, Error, Session};

use cli::{Cli, OpKind, Operation, Verbosity};

fn main() {
    let cli = Cli::parse();

    let op = match cli.normalize() {
        Ok(op) => op,
        Err(e) => {
            eprintln!("{e}");
            cli::print_usage();
            std::process::exit(1);
        }
    };

    let default_level = match op.verbosity {
        Verbosity::Standard => "info",
        Verbosity::Debug => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(e) = run(&op) {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run(op: &Operation) -> Result<(), Error> {
    let probe = stflash_stlink::open(&op.probe)?;
    let mut session = Session::new(probe);

    // From here on a signal may tear the session down at any point.
    rescue::install(&mut session);
    install_signal_rescue();

    session.prepare(op.reset)?;

    match &op.kind {
        OpKind::Write { file, addr } => commands::write::run(&mut session, file, *addr)?,
        OpKind::Read { file, addr, size } => {
            commands::read::run(&mut session, file, *addr, *size)?
        }
        OpKind::Erase => commands::erase::run(&mut session)?,
    }

    // Best-effort: the transfer already succeeded.
    if op.reset {
        if let Err(e) = session.reset_target() {
            log::warn!("post-transfer reset failed: {e}");
        }
    }

    session.close();
    Ok(())
}

/// Register the rescue handler for the termination signals, right after
/// the session became reachable through the rescue slot.
fn install_signal_rescue() {
    for sig in [SIGINT, SIGTERM, SIGQUIT] {
        // SAFETY: the handler only touches the lock-free rescue slot and
        // the probe's close primitives, then _exits.
        let registered = unsafe {
            signal_hook::low_level::register(sig, || {
                rescue::fire();
                signal_hook::low_level::exit(1);
            })
        };
        if let Err(e) = registered {
            log::warn!("failed to register the cleanup handler for signal {sig}: {e}");
        }
    }
}
