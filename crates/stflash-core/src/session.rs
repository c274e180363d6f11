//! The device session: one open probe, a strict preparation sequence, and
//! explicit teardown on both the normal and the emergency path.

use crate::error::{Error, Result};
use crate::probe::{DebugProbe, FlashProgress, ProbeMode, TargetParams};
use crate::{quirks, rescue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Opened,
    ModeReady,
    Closed,
}

/// One open probe connection and the state it has been walked into.
///
/// Exactly one session exists per process run. Its address may be
/// published in the [rescue slot](crate::rescue) so the signal handler can
/// tear it down; the session retracts itself from the slot on close and on
/// drop.
pub struct Session {
    probe: Box<dyn DebugProbe>,
    target: Option<TargetParams>,
    state: State,
}

impl Session {
    /// Wrap a freshly opened probe.
    pub fn new(probe: Box<dyn DebugProbe>) -> Self {
        Self {
            probe,
            target: None,
            state: State::Opened,
        }
    }

    /// Run the transition sequence that makes transfers safe: bootloader
    /// exit, SWD entry, optional reset, target identification, chip
    /// quirks, core halt, and a status read-back. Each step is a hard
    /// precondition for the next; the first failure aborts the sequence.
    pub fn prepare(&mut self, reset: bool) -> Result<()> {
        let mode = self
            .probe
            .current_mode()
            .map_err(|e| Error::ModeTransitionFailed(format!("mode query failed: {e}")))?;
        if mode == ProbeMode::Dfu {
            log::debug!("probe reports DFU mode, leaving it");
            self.probe
                .exit_dfu_mode()
                .map_err(|e| Error::ModeTransitionFailed(format!("DFU exit rejected: {e}")))?;
        }

        let mode = self
            .probe
            .current_mode()
            .map_err(|e| Error::ModeTransitionFailed(format!("mode query failed: {e}")))?;
        if mode != ProbeMode::Debug {
            self.probe
                .enter_swd_mode()
                .map_err(|e| Error::ModeTransitionFailed(format!("SWD entry rejected: {e}")))?;
        }

        if reset {
            self.reset_target()?;
        }

        let target = self
            .probe
            .read_target_params()
            .map_err(|e| Error::DeviceOpenFailed(format!("target identification failed: {e}")))?;
        log::info!(
            "target: {} (chip id 0x{:03x}), flash {} KiB @ 0x{:08x}, sram {} KiB @ 0x{:08x}",
            target.description,
            target.chip_id,
            target.flash_size / 1024,
            target.flash_base,
            target.sram_size / 1024,
            target.sram_base,
        );

        quirks::apply(target.family, self.probe.as_mut())?;
        self.target = Some(target);

        // RAM-resident flash machinery needs the core stopped first.
        self.probe
            .force_halt()
            .map_err(|e| Error::HaltFailed(e.to_string()))?;
        let state = self
            .probe
            .core_status()
            .map_err(|e| Error::StatusCheckFailed(e.to_string()))?;
        log::debug!("core status after halt: {state:?}");

        self.state = State::ModeReady;
        Ok(())
    }

    /// Parameters of the identified target. Only valid once [`prepare`]
    /// has succeeded.
    ///
    /// [`prepare`]: Session::prepare
    pub fn target(&self) -> &TargetParams {
        self.target.as_ref().expect("session not prepared")
    }

    /// NRST pulse followed by a system reset through the debug port.
    pub fn reset_target(&mut self) -> Result<()> {
        self.probe
            .nrst_pulse()
            .map_err(|e| Error::ResetFailed(format!("NRST pulse rejected: {e}")))?;
        self.probe
            .target_reset()
            .map_err(|e| Error::ResetFailed(format!("system reset rejected: {e}")))?;
        Ok(())
    }

    /// Read target memory into `buf`, starting at `addr`.
    pub fn read_mem(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(self.state, State::ModeReady);
        self.probe
            .read_mem(addr, buf)
            .map_err(|e| Error::TransferFailed(e.to_string()))
    }

    /// Write `data` into SRAM starting at `addr`.
    pub fn write_sram(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        debug_assert_eq!(self.state, State::ModeReady);
        self.probe
            .write_sram(addr, data)
            .map_err(|e| Error::TransferFailed(e.to_string()))
    }

    /// Program `data` into flash starting at `addr`.
    pub fn write_flash(
        &mut self,
        addr: u32,
        data: &[u8],
        progress: &mut dyn FlashProgress,
    ) -> Result<()> {
        debug_assert_eq!(self.state, State::ModeReady);
        self.probe
            .write_flash(addr, data, progress)
            .map_err(|e| Error::TransferFailed(e.to_string()))
    }

    /// Erase the whole flash array.
    pub fn mass_erase(&mut self) -> Result<()> {
        debug_assert_eq!(self.state, State::ModeReady);
        self.probe
            .mass_erase()
            .map_err(|e| Error::TransferFailed(e.to_string()))
    }

    /// Normal-path teardown: leave debug mode and release the handle.
    pub fn close(&mut self) {
        rescue::retract(self);
        self.shutdown(false);
    }

    /// Emergency teardown, reached from the signal handler through the
    /// rescue slot. Additionally lets the core run again first, which is
    /// what puts a V1 bridge back into a mass-storage-compatible state.
    /// Every step is best-effort and nothing is logged - the caller is a
    /// signal handler.
    pub(crate) fn emergency_shutdown(&mut self) {
        if self.state == State::Closed {
            return;
        }
        let _ = self.probe.run();
        let _ = self.probe.exit_debug_mode();
        self.probe.close();
        self.state = State::Closed;
    }

    fn shutdown(&mut self, to_run: bool) {
        if self.state == State::Closed {
            return;
        }
        if to_run {
            let _ = self.probe.run();
        }
        if let Err(e) = self.probe.exit_debug_mode() {
            log::warn!("debug mode exit failed during teardown: {e}");
        }
        self.probe.close();
        self.state = State::Closed;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        rescue::retract(self);
        self.shutdown(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{CoreState, ProbeError, ProbeResult};
    use crate::ChipFamily;
    use std::cell::RefCell;
    use std::rc::Rc;

    type CallLog = Rc<RefCell<Vec<&'static str>>>;

    struct MockProbe {
        calls: CallLog,
        mode: ProbeMode,
        family: ChipFamily,
        fail_swd_entry: bool,
        fail_halt: bool,
        fail_status: bool,
    }

    impl MockProbe {
        fn new(calls: CallLog, mode: ProbeMode) -> Self {
            Self {
                calls,
                mode,
                family: ChipFamily::F1,
                fail_swd_entry: false,
                fail_halt: false,
                fail_status: false,
            }
        }
    }

    impl DebugProbe for MockProbe {
        fn current_mode(&mut self) -> ProbeResult<ProbeMode> {
            self.calls.borrow_mut().push("current_mode");
            Ok(self.mode)
        }
        fn exit_dfu_mode(&mut self) -> ProbeResult<()> {
            self.calls.borrow_mut().push("exit_dfu");
            self.mode = ProbeMode::MassStorage;
            Ok(())
        }
        fn enter_swd_mode(&mut self) -> ProbeResult<()> {
            self.calls.borrow_mut().push("enter_swd");
            if self.fail_swd_entry {
                return Err(ProbeError::new("no target attached"));
            }
            self.mode = ProbeMode::Debug;
            Ok(())
        }
        fn nrst_pulse(&mut self) -> ProbeResult<()> {
            self.calls.borrow_mut().push("nrst_pulse");
            Ok(())
        }
        fn target_reset(&mut self) -> ProbeResult<()> {
            self.calls.borrow_mut().push("target_reset");
            Ok(())
        }
        fn run(&mut self) -> ProbeResult<()> {
            self.calls.borrow_mut().push("run");
            Ok(())
        }
        fn force_halt(&mut self) -> ProbeResult<()> {
            self.calls.borrow_mut().push("force_halt");
            if self.fail_halt {
                return Err(ProbeError::new("halt refused"));
            }
            Ok(())
        }
        fn core_status(&mut self) -> ProbeResult<CoreState> {
            self.calls.borrow_mut().push("core_status");
            if self.fail_status {
                return Err(ProbeError::new("status unreadable"));
            }
            Ok(CoreState::Halted)
        }
        fn read_target_params(&mut self) -> ProbeResult<TargetParams> {
            self.calls.borrow_mut().push("read_target_params");
            Ok(TargetParams {
                chip_id: 0x410,
                family: self.family,
                description: "mock",
                flash_base: 0x0800_0000,
                flash_size: 0x2_0000,
                sram_base: 0x2000_0000,
                sram_size: 0x5000,
            })
        }
        fn write_reg32(&mut self, _addr: u32, _value: u32) -> ProbeResult<()> {
            self.calls.borrow_mut().push("write_reg32");
            Ok(())
        }
        fn read_mem(&mut self, _addr: u32, _buf: &mut [u8]) -> ProbeResult<()> {
            self.calls.borrow_mut().push("read_mem");
            Ok(())
        }
        fn write_sram(&mut self, _addr: u32, _data: &[u8]) -> ProbeResult<()> {
            self.calls.borrow_mut().push("write_sram");
            Ok(())
        }
        fn write_flash(
            &mut self,
            _addr: u32,
            _data: &[u8],
            _progress: &mut dyn FlashProgress,
        ) -> ProbeResult<()> {
            self.calls.borrow_mut().push("write_flash");
            Ok(())
        }
        fn mass_erase(&mut self) -> ProbeResult<()> {
            self.calls.borrow_mut().push("mass_erase");
            Ok(())
        }
        fn exit_debug_mode(&mut self) -> ProbeResult<()> {
            self.calls.borrow_mut().push("exit_debug");
            Ok(())
        }
        fn close(&mut self) {
            self.calls.borrow_mut().push("close");
        }
    }

    fn log() -> CallLog {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn prepare_walks_the_full_sequence_from_dfu() {
        let calls = log();
        let mut session = Session::new(Box::new(MockProbe::new(calls.clone(), ProbeMode::Dfu)));
        session.prepare(false).unwrap();

        assert_eq!(
            *calls.borrow(),
            vec![
                "current_mode",
                "exit_dfu",
                "current_mode",
                "enter_swd",
                "read_target_params",
                "force_halt",
                "core_status",
            ]
        );
    }

    #[test]
    fn dfu_exit_is_skipped_outside_dfu() {
        let calls = log();
        let mut session = Session::new(Box::new(MockProbe::new(
            calls.clone(),
            ProbeMode::MassStorage,
        )));
        session.prepare(false).unwrap();
        assert!(!calls.borrow().contains(&"exit_dfu"));
    }

    #[test]
    fn swd_entry_is_skipped_when_already_in_debug_mode() {
        let calls = log();
        let mut session = Session::new(Box::new(MockProbe::new(calls.clone(), ProbeMode::Debug)));
        session.prepare(false).unwrap();
        assert!(!calls.borrow().contains(&"enter_swd"));
    }

    #[test]
    fn reset_runs_before_target_identification() {
        let calls = log();
        let mut session = Session::new(Box::new(MockProbe::new(
            calls.clone(),
            ProbeMode::MassStorage,
        )));
        session.prepare(true).unwrap();

        let calls = calls.borrow();
        let nrst = calls.iter().position(|&c| c == "nrst_pulse").unwrap();
        let reset = calls.iter().position(|&c| c == "target_reset").unwrap();
        let ident = calls.iter().position(|&c| c == "read_target_params").unwrap();
        let halt = calls.iter().position(|&c| c == "force_halt").unwrap();
        assert!(nrst < reset && reset < ident && ident < halt);
    }

    #[test]
    fn f4_targets_get_the_dma_quirk_before_halt() {
        let calls = log();
        let mut probe = MockProbe::new(calls.clone(), ProbeMode::MassStorage);
        probe.family = ChipFamily::F4;
        let mut session = Session::new(Box::new(probe));
        session.prepare(false).unwrap();

        let calls = calls.borrow();
        let pokes = calls.iter().filter(|&&c| c == "write_reg32").count();
        assert_eq!(pokes, 32);
        let last_poke = calls.iter().rposition(|&c| c == "write_reg32").unwrap();
        let halt = calls.iter().position(|&c| c == "force_halt").unwrap();
        assert!(last_poke < halt);
    }

    #[test]
    fn swd_entry_failure_aborts_the_sequence() {
        let calls = log();
        let mut probe = MockProbe::new(calls.clone(), ProbeMode::MassStorage);
        probe.fail_swd_entry = true;
        let mut session = Session::new(Box::new(probe));

        let err = session.prepare(false).unwrap_err();
        assert!(matches!(err, Error::ModeTransitionFailed(_)));
        assert!(!calls.borrow().contains(&"force_halt"));
    }

    #[test]
    fn halt_failure_maps_to_halt_failed() {
        let calls = log();
        let mut probe = MockProbe::new(calls.clone(), ProbeMode::Debug);
        probe.fail_halt = true;
        let mut session = Session::new(Box::new(probe));
        assert!(matches!(session.prepare(false), Err(Error::HaltFailed(_))));
    }

    #[test]
    fn status_failure_maps_to_status_check_failed() {
        let calls = log();
        let mut probe = MockProbe::new(calls.clone(), ProbeMode::Debug);
        probe.fail_status = true;
        let mut session = Session::new(Box::new(probe));
        assert!(matches!(
            session.prepare(false),
            Err(Error::StatusCheckFailed(_))
        ));
    }

    #[test]
    fn normal_close_exits_debug_without_running_the_core() {
        let calls = log();
        let mut session = Session::new(Box::new(MockProbe::new(calls.clone(), ProbeMode::Debug)));
        session.prepare(false).unwrap();
        session.close();

        let calls = calls.borrow();
        assert!(!calls.contains(&"run"));
        let exit = calls.iter().position(|&c| c == "exit_debug").unwrap();
        let close = calls.iter().position(|&c| c == "close").unwrap();
        assert!(exit < close);
    }

    #[test]
    fn emergency_shutdown_runs_the_core_first() {
        let calls = log();
        let mut session = Session::new(Box::new(MockProbe::new(calls.clone(), ProbeMode::Debug)));
        session.prepare(false).unwrap();
        session.emergency_shutdown();

        let calls = calls.borrow();
        let run = calls.iter().position(|&c| c == "run").unwrap();
        let exit = calls.iter().position(|&c| c == "exit_debug").unwrap();
        let close = calls.iter().position(|&c| c == "close").unwrap();
        assert!(run < exit && exit < close);
    }

    #[test]
    fn drop_after_close_does_not_tear_down_twice() {
        let calls = log();
        {
            let mut session =
                Session::new(Box::new(MockProbe::new(calls.clone(), ProbeMode::Debug)));
            session.prepare(false).unwrap();
            session.close();
        }
        let closes = calls.borrow().iter().filter(|&&c| c == "close").count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn error_path_drop_still_releases_the_probe() {
        let calls = log();
        {
            let mut probe = MockProbe::new(calls.clone(), ProbeMode::MassStorage);
            probe.fail_swd_entry = true;
            let mut session = Session::new(Box::new(probe));
            let _ = session.prepare(false);
        }
        assert!(calls.borrow().contains(&"exit_debug"));
        assert!(calls.borrow().contains(&"close"));
    }
}
