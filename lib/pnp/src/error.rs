//! Error types of the PnP core and the fatal-stop descriptor.

use core::fmt::{Debug, Display, Write};

/// An error that can be printed to a string device
pub trait MessageError: Debug {
    /// Print the error message to a writer
    fn print_to_writer(&self, f: &mut dyn Write) -> core::fmt::Result {
        f.write_fmt(format_args!("{:?}", self))
    }
}

impl Display for dyn MessageError + '_ {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.print_to_writer(f)
    }
}

/// Recoverable failures, reported to the submitter or to a request's completion slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PnpError {
    /// The target device node is gone or cannot be processed.
    Unsuccessful,
    /// The request kind exists but has no implementation.
    NotImplemented,
    /// No request record could be allocated.
    InsufficientResources,
    /// The manager no longer accepts or dispatches requests.
    ShuttingDown,
    /// The tree enumerator failed; carries its reason.
    Enumeration(&'static str),
}

pub type PnpResult<T = ()> = Result<T, PnpError>;

impl MessageError for PnpError {
    fn print_to_writer(&self, f: &mut dyn Write) -> core::fmt::Result {
        match self {
            PnpError::Unsuccessful => f.write_str("operation unsuccessful"),
            PnpError::NotImplemented => f.write_str("not implemented"),
            PnpError::InsufficientResources => f.write_str("insufficient resources"),
            PnpError::ShuttingDown => f.write_str("PnP manager is shutting down"),
            PnpError::Enumeration(reason) => write!(f, "device enumeration failed: {}", reason),
        }
    }
}

impl Display for PnpError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.print_to_writer(f)
    }
}

// region: Bug checks

/// Stop code raised when the PnP manager finds the device tree beyond repair.
pub const PNP_DETECTED_FATAL_ERROR: u32 = 0xCA;

/// First parameter of [PNP_DETECTED_FATAL_ERROR]: invalid device object handed to an
/// invalidation routine.
pub const INVALID_DEVICE_OBJECT: usize = 0x2;

/// First parameter of [PNP_DETECTED_FATAL_ERROR]: the engine lock was requested while the
/// tree-shape lock was already held by the same thread.
pub const TREE_LOCK_ORDER_VIOLATION: usize = 0x100;

/// First parameter of [PNP_DETECTED_FATAL_ERROR]: an escalation was attempted without the
/// level-1 hold it converts.
pub const TREE_LOCK_BAD_ESCALATION: usize = 0x101;

/// Everything the kernel needs to halt with a meaningful stop screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BugCheck {
    pub code: u32,
    pub parameters: [usize; 4],
}

impl BugCheck {
    pub const fn invalid_device_object(device: usize) -> BugCheck {
        BugCheck {
            code: PNP_DETECTED_FATAL_ERROR,
            parameters: [INVALID_DEVICE_OBJECT, device, 0, 0],
        }
    }

    pub const fn lock_order_violation(thread: usize, level: u8) -> BugCheck {
        BugCheck {
            code: PNP_DETECTED_FATAL_ERROR,
            parameters: [TREE_LOCK_ORDER_VIOLATION, thread, level as usize, 0],
        }
    }

    pub const fn bad_escalation(thread: usize, tree_shared: usize) -> BugCheck {
        BugCheck {
            code: PNP_DETECTED_FATAL_ERROR,
            parameters: [TREE_LOCK_BAD_ESCALATION, thread, tree_shared, 0],
        }
    }
}

impl Display for BugCheck {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let [p1, p2, p3, p4] = self.parameters;
        write!(
            f,
            "*** STOP: {:#010X} ({:#x}, {:#x}, {:#x}, {:#x})",
            self.code, p1, p2, p3, p4
        )
    }
}

// endregion

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn errors_render_through_message_trait() {
        let err: &dyn MessageError = &PnpError::Enumeration("bus timeout");
        assert_eq!(err.to_string(), "device enumeration failed: bus timeout");
        assert_eq!(PnpError::NotImplemented.to_string(), "not implemented");
    }

    #[test]
    fn stop_screen_format() {
        let check = BugCheck::invalid_device_object(0x1000);
        assert_eq!(check.to_string(), "*** STOP: 0x000000CA (0x2, 0x1000, 0x0, 0x0)");
    }
}
