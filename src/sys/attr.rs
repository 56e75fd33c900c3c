//! Attribute-object plumbing around process-shared and priority-protocol
//! mutex attributes (spec.md §6, supplemented per SPEC_FULL.md §4.7 from
//! `original_source/include/mutexgear/mutexgear.h`).
//!
//! On a hosted, single-process build none of these fields change observable
//! behavior; they exist so every public constructor keeps the same shape the
//! original gives it (`mutexgear_*attr_t`), and so a future pshared-memory
//! backend has somewhere to read the request from.

/// Whether an object may be shared across process boundaries.
///
/// This crate does not itself implement process-shared placement (spec.md
/// §1 treats the attribute plumbing as an external collaborator); the value
/// is accepted and stored only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pshared {
    #[default]
    Private,
    Shared,
}

/// Priority-inheritance protocol requested for the underlying mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    None,
    Inherit,
    Protect,
}

/// The single shared attribute shape every `mutexgear_*attr_t` family wraps
/// in the original (`_mutexgear_lockattr_t`): pshared + priority ceiling +
/// protocol. Re-exported under per-object names below so call sites read
/// naturally (`WheelAttr::default()`, `RwLockAttr::default()`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockAttr {
    pshared: Pshared,
    protocol: Protocol,
    /// `None` means "no priority ceiling defined", mirroring the original's
    /// comment that a literal 0 ceiling is rejected by some platforms and is
    /// therefore treated as "missing" rather than as a real ceiling of 0.
    prioceiling: Option<i32>,
}

impl LockAttr {
    pub const fn new() -> Self {
        Self {
            pshared: Pshared::Private,
            protocol: Protocol::None,
            prioceiling: None,
        }
    }

    pub fn pshared(&self) -> Pshared {
        self.pshared
    }

    pub fn set_pshared(&mut self, pshared: Pshared) {
        self.pshared = pshared;
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn set_protocol(&mut self, protocol: Protocol) {
        self.protocol = protocol;
    }

    pub fn prioceiling(&self) -> Option<i32> {
        self.prioceiling
    }

    pub fn set_prioceiling(&mut self, ceiling: i32) {
        self.prioceiling = Some(ceiling);
    }

    /// Equivalent of `_mutexgear_wheelattr_setmutexattr`/
    /// `_mutexgear_completion_genattr_setmutexattr`: copy pshared, priority
    /// ceiling (if any) and protocol from an existing attribute object.
    pub fn copy_from(&mut self, other: &LockAttr) {
        self.pshared = other.pshared;
        self.protocol = other.protocol;
        if let Some(ceiling) = other.prioceiling {
            self.prioceiling = Some(ceiling);
        }
    }
}

pub type WheelAttr = LockAttr;
pub type CompletionAttr = LockAttr;
pub type RwLockAttr = LockAttr;
