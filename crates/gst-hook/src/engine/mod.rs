//! Trampoline hook engine.
//!
//! Installing a hook writes a jump to the detour over the target's prologue;
//! the displaced prologue bytes are relocated into a trampoline that ends
//! with a jump back to the remainder of the original function. Detours call
//! the trampoline to invoke the original.

pub mod backend;
pub mod x64;

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info, warn};

pub use backend::HookBackend;

#[cfg(target_os = "windows")]
pub use backend::PlatformBackend;

/// Prologue bytes fetched per target; enough for any displaced sequence.
const PROLOGUE_FETCH: usize = 32;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is {0:?}, operation not allowed")]
    WrongState(EngineState),

    #[error("target {0:#x} is already hooked")]
    AlreadyHooked(u64),

    #[error("target {0:#x} is not hooked")]
    NotHooked(u64),

    #[error("cannot measure a relocatable prologue at {0:#x}")]
    UnrelocatableProlog(u64),

    #[error("{0}")]
    Backend(String),
}

/// Engine lifecycle. Hooks can be created and toggled from `Ready` onward;
/// nothing works after teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Ready,
    Armed,
    TornDown,
}

/// One installed hook.
#[derive(Debug)]
pub struct HookRecord {
    pub target: u64,
    pub trampoline: u64,
    pub detour: u64,
    pub enabled: bool,
    trampoline_size: usize,
    original_prologue: Vec<u8>,
    patched_prologue: Vec<u8>,
}

/// The capability set over a backend: create, enable, disable, disable-all,
/// teardown. A target address is hooked at most once per engine lifetime.
pub struct HookEngine<B: HookBackend> {
    backend: B,
    state: EngineState,
    hooks: HashMap<u64, HookRecord>,
}

impl<B: HookBackend> HookEngine<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: EngineState::Uninitialized,
            hooks: HashMap::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_hooked(&self, target: u64) -> bool {
        self.hooks.contains_key(&target)
    }

    /// Address a detour calls to reach the original function.
    pub fn trampoline(&self, target: u64) -> Option<u64> {
        self.hooks.get(&target).map(|hook| hook.trampoline)
    }

    /// Global initialization; must precede the first `create`.
    pub fn initialize(&mut self) -> Result<(), EngineError> {
        match self.state {
            EngineState::Uninitialized => {
                self.state = EngineState::Ready;
                Ok(())
            }
            EngineState::Ready | EngineState::Armed => Ok(()),
            EngineState::TornDown => Err(EngineError::WrongState(self.state)),
        }
    }

    /// Build the trampoline for `target` and prepare (but do not write) the
    /// detour jump. Returns the trampoline address.
    pub fn create(&mut self, target: u64, detour: u64) -> Result<u64, EngineError> {
        if !matches!(self.state, EngineState::Ready | EngineState::Armed) {
            return Err(EngineError::WrongState(self.state));
        }
        if self.hooks.contains_key(&target) {
            return Err(EngineError::AlreadyHooked(target));
        }

        let mut prologue = [0u8; PROLOGUE_FETCH];
        self.backend.read_code(target, &mut prologue)?;

        // Prefer the short jump; fall back to the absolute form when the
        // detour is out of rel32 range.
        let jump: Vec<u8> = match x64::jmp_rel32(target, detour) {
            Some(code) => code.to_vec(),
            None => x64::jmp_abs(detour).to_vec(),
        };

        let displaced = x64::displaced_length(&prologue, jump.len())
            .ok_or(EngineError::UnrelocatableProlog(target))?;

        // Trampoline: displaced prologue, then an absolute jump to the rest
        // of the original.
        let trampoline_size = displaced + x64::JMP_ABS_LEN;
        let trampoline = self.backend.alloc_executable(trampoline_size)?;

        let mut trampoline_code = Vec::with_capacity(trampoline_size);
        trampoline_code.extend_from_slice(&prologue[..displaced]);
        trampoline_code.extend_from_slice(&x64::jmp_abs(target + displaced as u64));
        if let Err(e) = self.backend.write_code(trampoline, &trampoline_code) {
            self.backend.free_executable(trampoline, trampoline_size);
            return Err(e);
        }

        // The patch covers every displaced instruction; the tail is padded
        // with int3 so a mid-prologue jump lands somewhere loud.
        let mut patched = jump;
        patched.resize(displaced, 0xCC);

        debug!(
            "hook created: target={:#x} detour={:#x} trampoline={:#x} displaced={}",
            target, detour, trampoline, displaced
        );

        self.hooks.insert(
            target,
            HookRecord {
                target,
                trampoline,
                detour,
                enabled: false,
                trampoline_size,
                original_prologue: prologue[..displaced].to_vec(),
                patched_prologue: patched,
            },
        );

        Ok(trampoline)
    }

    /// Write the detour jump over the target's prologue.
    pub fn enable(&mut self, target: u64) -> Result<(), EngineError> {
        if !matches!(self.state, EngineState::Ready | EngineState::Armed) {
            return Err(EngineError::WrongState(self.state));
        }
        let hook = self
            .hooks
            .get_mut(&target)
            .ok_or(EngineError::NotHooked(target))?;
        if hook.enabled {
            return Ok(());
        }

        self.backend.write_code(target, &hook.patched_prologue)?;
        hook.enabled = true;
        self.state = EngineState::Armed;
        info!("hook enabled at {:#x}", target);
        Ok(())
    }

    /// Restore the original prologue bytes at the target.
    pub fn disable(&mut self, target: u64) -> Result<(), EngineError> {
        let hook = self
            .hooks
            .get_mut(&target)
            .ok_or(EngineError::NotHooked(target))?;
        if !hook.enabled {
            return Ok(());
        }

        self.backend.write_code(target, &hook.original_prologue)?;
        hook.enabled = false;
        info!("hook disabled at {:#x}", target);
        Ok(())
    }

    /// Disable every enabled hook; failures are logged and do not stop the
    /// sweep.
    pub fn disable_all(&mut self) {
        let targets: Vec<u64> = self.hooks.keys().copied().collect();
        for target in targets {
            if let Err(e) = self.disable(target) {
                warn!("failed to disable hook at {:#x}: {}", target, e);
            }
        }
    }

    /// Disable everything, release the trampolines and retire the engine.
    pub fn teardown(&mut self) {
        if self.state == EngineState::TornDown {
            return;
        }
        self.disable_all();
        for hook in self.hooks.values() {
            self.backend
                .free_executable(hook.trampoline, hook.trampoline_size);
        }
        self.hooks.clear();
        self.state = EngineState::TornDown;
        info!("hook engine torn down");
    }
}

impl<B: HookBackend> Drop for HookEngine<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::backend::testing::{ArenaBackend, ARENA_BASE};
    use super::x64::{JMP_ABS_LEN, JMP_REL32_LEN};
    use super::*;

    /// mov [rsp+8],rbx; mov [rsp+10],rsi; push rdi; sub rsp,20; ...
    const PROLOGUE: [u8; 20] = [
        0x48, 0x89, 0x5C, 0x24, 0x08, //
        0x48, 0x89, 0x74, 0x24, 0x10, //
        0x57, //
        0x48, 0x83, 0xEC, 0x20, //
        0x48, 0x8B, 0xF1, //
        0x90, 0x90,
    ];

    fn engine_with_prologue() -> HookEngine<ArenaBackend> {
        let mut engine = HookEngine::new(ArenaBackend::with_code(&PROLOGUE));
        engine.initialize().unwrap();
        engine
    }

    #[test]
    fn test_state_machine() {
        let mut engine = HookEngine::new(ArenaBackend::with_code(&PROLOGUE));
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert!(matches!(
            engine.create(ARENA_BASE, ARENA_BASE + 0x500),
            Err(EngineError::WrongState(EngineState::Uninitialized))
        ));

        engine.initialize().unwrap();
        assert_eq!(engine.state(), EngineState::Ready);

        engine.create(ARENA_BASE, ARENA_BASE + 0x500).unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        engine.enable(ARENA_BASE).unwrap();
        assert_eq!(engine.state(), EngineState::Armed);

        engine.teardown();
        assert_eq!(engine.state(), EngineState::TornDown);
        assert!(matches!(
            engine.create(ARENA_BASE, ARENA_BASE + 0x500),
            Err(EngineError::WrongState(EngineState::TornDown))
        ));
        assert!(engine.initialize().is_err());
    }

    #[test]
    fn test_enable_writes_rel32_jump_and_pads() {
        let detour = ARENA_BASE + 0x800;
        let mut engine = engine_with_prologue();
        engine.create(ARENA_BASE, detour).unwrap();
        engine.enable(ARENA_BASE).unwrap();

        let patched = engine.backend.bytes_at(ARENA_BASE, 10);
        assert_eq!(patched[0], 0xE9);
        let disp = i32::from_le_bytes(patched[1..5].try_into().unwrap());
        assert_eq!(
            (ARENA_BASE as i64 + JMP_REL32_LEN as i64 + disp as i64) as u64,
            detour
        );
        // Displaced length for a 5-byte jump over this prologue is 5, so no
        // padding is needed and the next instruction is intact.
        assert_eq!(&patched[5..10], &PROLOGUE[5..10]);
    }

    #[test]
    fn test_far_detour_uses_absolute_jump() {
        let detour = 0x7FFF_0000_0000;
        let mut engine = engine_with_prologue();
        engine.create(ARENA_BASE, detour).unwrap();
        engine.enable(ARENA_BASE).unwrap();

        let patched = engine.backend.bytes_at(ARENA_BASE, 15);
        assert_eq!(&patched[..2], &[0xFF, 0x25]);
        assert_eq!(
            u64::from_le_bytes(patched[6..14].try_into().unwrap()),
            detour
        );
        // 14 jump bytes displace 15 bytes of instructions; the one-byte tail
        // is int3 padding.
        assert_eq!(patched[14], 0xCC);
    }

    #[test]
    fn test_trampoline_holds_prologue_then_jump_back() {
        let detour = ARENA_BASE + 0x800;
        let mut engine = engine_with_prologue();
        let trampoline = engine.create(ARENA_BASE, detour).unwrap();

        let code = engine.backend.bytes_at(trampoline, 5 + JMP_ABS_LEN).to_vec();
        assert_eq!(&code[..5], &PROLOGUE[..5]);
        assert_eq!(&code[5..7], &[0xFF, 0x25]);
        assert_eq!(
            u64::from_le_bytes(code[11..19].try_into().unwrap()),
            ARENA_BASE + 5
        );
    }

    #[test]
    fn test_disable_restores_original_bytes() {
        let mut engine = engine_with_prologue();
        engine.create(ARENA_BASE, ARENA_BASE + 0x800).unwrap();
        engine.enable(ARENA_BASE).unwrap();
        assert_ne!(engine.backend.bytes_at(ARENA_BASE, 5), &PROLOGUE[..5]);

        engine.disable(ARENA_BASE).unwrap();
        assert_eq!(engine.backend.bytes_at(ARENA_BASE, 20), &PROLOGUE[..]);
    }

    #[test]
    fn test_teardown_restores_every_target() {
        let second_target = ARENA_BASE + 5;
        let mut engine = engine_with_prologue();
        engine.create(ARENA_BASE, ARENA_BASE + 0x800).unwrap();
        engine.create(second_target, ARENA_BASE + 0x900).unwrap();
        engine.enable(ARENA_BASE).unwrap();
        engine.enable(second_target).unwrap();

        engine.teardown();
        assert_eq!(engine.backend.bytes_at(ARENA_BASE, 20), &PROLOGUE[..]);
        assert!(!engine.is_hooked(ARENA_BASE));
    }

    #[test]
    fn test_target_hooked_at_most_once() {
        let mut engine = engine_with_prologue();
        engine.create(ARENA_BASE, ARENA_BASE + 0x800).unwrap();
        assert!(matches!(
            engine.create(ARENA_BASE, ARENA_BASE + 0x900),
            Err(EngineError::AlreadyHooked(_))
        ));
    }

    #[test]
    fn test_unrelocatable_prologue_fails_install() {
        // push rdi; jmp rel32 ...
        let code = [0x57, 0xE9, 0x00, 0x00, 0x00, 0x00, 0x90, 0x90];
        let mut engine = HookEngine::new(ArenaBackend::with_code(&code));
        engine.initialize().unwrap();
        assert!(matches!(
            engine.create(ARENA_BASE, ARENA_BASE + 0x800),
            Err(EngineError::UnrelocatableProlog(_))
        ));
        assert!(!engine.is_hooked(ARENA_BASE));
    }

    #[test]
    fn test_enable_disable_are_idempotent() {
        let mut engine = engine_with_prologue();
        engine.create(ARENA_BASE, ARENA_BASE + 0x800).unwrap();
        engine.enable(ARENA_BASE).unwrap();
        engine.enable(ARENA_BASE).unwrap();
        engine.disable(ARENA_BASE).unwrap();
        engine.disable(ARENA_BASE).unwrap();
        assert_eq!(engine.backend.bytes_at(ARENA_BASE, 20), &PROLOGUE[..]);
    }
}
