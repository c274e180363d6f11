//! Process-wide rescue slot for the signal path.
//!
//! One session exists per process run. Its address is published here so a
//! signal handler can reach it without taking ownership or a lock. The
//! slot is written on the main thread at open and close; the handler
//! *swaps* it, which also guarantees at most one rescuer runs when several
//! signals arrive. A signal landing exactly on the close path may observe
//! the session while the main thread is tearing it down; the probe
//! primitives are not reentrant and that race is accepted as a bounded
//! risk - the process is exiting either way.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::session::Session;

static ACTIVE: AtomicPtr<Session> = AtomicPtr::new(ptr::null_mut());

/// Publish the open session. Called once, right after open; the session
/// must stay where it is until [`retract`] runs.
pub fn install(session: &mut Session) {
    ACTIVE.store(session as *mut Session, Ordering::SeqCst);
}

/// Retract `session` from the slot if it is the one published there.
pub fn retract(session: &mut Session) {
    let ptr = session as *mut Session;
    let _ = ACTIVE.compare_exchange(ptr, ptr::null_mut(), Ordering::SeqCst, Ordering::SeqCst);
}

/// Claim the published session, if any, and force it back to a safe mode.
/// Returns whether there was one to rescue.
///
/// Runs in signal context: no allocation and no buffered I/O of its own,
/// beyond whatever the probe's exit/close primitives already do.
pub fn fire() -> bool {
    let session = ACTIVE.swap(ptr::null_mut(), Ordering::SeqCst);
    if session.is_null() {
        return false;
    }
    // SAFETY: the slot only ever holds a pointer published by `install`
    // for a session that `retract` removes before it is dropped. The main
    // thread may still be mid-operation on the same probe when a signal
    // lands; that concurrent access is the documented, accepted race.
    unsafe { (*session).emergency_shutdown() };
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{
        CoreState, DebugProbe, FlashProgress, ProbeError, ProbeMode, ProbeResult, TargetParams,
    };
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    // The slot is process-global; keep the tests that touch it serial.
    static SLOT_LOCK: Mutex<()> = Mutex::new(());

    struct CountingProbe {
        closes: Arc<AtomicUsize>,
        runs: Arc<AtomicUsize>,
    }

    impl DebugProbe for CountingProbe {
        fn current_mode(&mut self) -> ProbeResult<ProbeMode> {
            Ok(ProbeMode::Debug)
        }
        fn exit_dfu_mode(&mut self) -> ProbeResult<()> {
            Ok(())
        }
        fn enter_swd_mode(&mut self) -> ProbeResult<()> {
            Ok(())
        }
        fn nrst_pulse(&mut self) -> ProbeResult<()> {
            Ok(())
        }
        fn target_reset(&mut self) -> ProbeResult<()> {
            Ok(())
        }
        fn run(&mut self) -> ProbeResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn force_halt(&mut self) -> ProbeResult<()> {
            Ok(())
        }
        fn core_status(&mut self) -> ProbeResult<CoreState> {
            Ok(CoreState::Halted)
        }
        fn read_target_params(&mut self) -> ProbeResult<TargetParams> {
            Err(ProbeError::new("unused"))
        }
        fn write_reg32(&mut self, _addr: u32, _value: u32) -> ProbeResult<()> {
            Ok(())
        }
        fn read_mem(&mut self, _addr: u32, _buf: &mut [u8]) -> ProbeResult<()> {
            Ok(())
        }
        fn write_sram(&mut self, _addr: u32, _data: &[u8]) -> ProbeResult<()> {
            Ok(())
        }
        fn write_flash(
            &mut self,
            _addr: u32,
            _data: &[u8],
            _progress: &mut dyn FlashProgress,
        ) -> ProbeResult<()> {
            Ok(())
        }
        fn mass_erase(&mut self) -> ProbeResult<()> {
            Ok(())
        }
        fn exit_debug_mode(&mut self) -> ProbeResult<()> {
            Ok(())
        }
        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn fire_claims_and_tears_down_exactly_once() {
        let _guard = SLOT_LOCK.lock().unwrap();
        let closes = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let mut session = Session::new(Box::new(CountingProbe {
            closes: closes.clone(),
            runs: runs.clone(),
        }));

        install(&mut session);
        assert!(fire());
        // The slot was swapped out, so a second signal finds nothing.
        assert!(!fire());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // Drop retracts (a no-op here) and must not close again.
        drop(session);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retract_makes_fire_a_no_op() {
        let _guard = SLOT_LOCK.lock().unwrap();
        let closes = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let mut session = Session::new(Box::new(CountingProbe {
            closes: closes.clone(),
            runs: runs.clone(),
        }));

        install(&mut session);
        retract(&mut session);
        assert!(!fire());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
