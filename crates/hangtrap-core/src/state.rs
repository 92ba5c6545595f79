//! Trap status and event kinds

use core::fmt;

/// Status of a per-device trap context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TrapStatus {
    /// No session armed; initial state and the end of every session
    Disabled = 0,

    /// A monitor is blocked in StartTrap waiting for a hang
    Waiting = 1,

    /// A hang/manual dump was delivered; the core waits for the monitor
    Dumping = 2,

    /// Session is being torn down
    Exit = 3,
}

impl TrapStatus {
    /// Whether `self -> to` is one of the protocol's edges
    ///
    /// `Dumping -> Dumping` is the NotifyDumpDone self-loop.
    pub const fn can_transition(self, to: TrapStatus) -> bool {
        use TrapStatus::*;
        matches!(
            (self, to),
            (Disabled, Waiting)
                | (Waiting, Dumping)
                | (Waiting, Exit)
                | (Dumping, Dumping)
                | (Dumping, Disabled)
                | (Dumping, Exit)
                | (Exit, Disabled)
        )
    }

    /// A session is armed or in flight
    #[inline]
    pub const fn is_trapping(self) -> bool {
        matches!(self, TrapStatus::Waiting | TrapStatus::Dumping)
    }
}

impl From<TrapStatus> for u8 {
    fn from(s: TrapStatus) -> u8 {
        s as u8
    }
}

impl fmt::Display for TrapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrapStatus::Disabled => write!(f, "DISABLED"),
            TrapStatus::Waiting => write!(f, "WAITING"),
            TrapStatus::Dumping => write!(f, "DUMPING"),
            TrapStatus::Exit => write!(f, "EXIT"),
        }
    }
}

/// What woke a StartTrap caller
///
/// Wire values are fixed: 0=Error, 1=Reset, 2=ManualDump, 3=Exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TrapEventKind {
    Error = 0,
    Reset = 1,
    ManualDump = 2,
    Exit = 3,
}

impl TrapEventKind {
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Decode a wire value
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(TrapEventKind::Error),
            1 => Some(TrapEventKind::Reset),
            2 => Some(TrapEventKind::ManualDump),
            3 => Some(TrapEventKind::Exit),
            _ => None,
        }
    }
}

impl fmt::Display for TrapEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrapEventKind::Error => write!(f, "error"),
            TrapEventKind::Reset => write!(f, "reset"),
            TrapEventKind::ManualDump => write!(f, "manual-dump"),
            TrapEventKind::Exit => write!(f, "exit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_edges() {
        use TrapStatus::*;
        assert!(Disabled.can_transition(Waiting));
        assert!(Waiting.can_transition(Dumping));
        assert!(Waiting.can_transition(Exit));
        assert!(Dumping.can_transition(Disabled));
        assert!(Exit.can_transition(Disabled));

        assert!(!Disabled.can_transition(Dumping));
        assert!(!Waiting.can_transition(Disabled));
        assert!(!Exit.can_transition(Waiting));
    }

    #[test]
    fn test_is_trapping() {
        assert!(TrapStatus::Waiting.is_trapping());
        assert!(TrapStatus::Dumping.is_trapping());
        assert!(!TrapStatus::Disabled.is_trapping());
        assert!(!TrapStatus::Exit.is_trapping());
    }

    #[test]
    fn test_event_wire_values() {
        assert_eq!(TrapEventKind::Error.as_u32(), 0);
        assert_eq!(TrapEventKind::Reset.as_u32(), 1);
        assert_eq!(TrapEventKind::ManualDump.as_u32(), 2);
        assert_eq!(TrapEventKind::Exit.as_u32(), 3);
        assert_eq!(TrapEventKind::from_u32(2), Some(TrapEventKind::ManualDump));
        assert_eq!(TrapEventKind::from_u32(9), None);
    }
}
