//! Deoptimization descriptors.
//!
//! A deoptimization is not an error: it is a designed control transfer from
//! compiled code back to the interpreter, replayed at a captured frame
//! state. The descriptor records why (the [`DeoptReason`]), what the
//! recompilation policy should do about it (the [`DeoptAction`]), and which
//! speculation, if any, must be invalidated in the speculation log
//! (the [`SpeculationToken`]).

// =============================================================================
// Deopt Reason
// =============================================================================

/// Why compiled code bailed out.
///
/// Reasons are telemetry for the recompilation policy: a site that keeps
/// deopting for the same reason gets compiled less optimistically next
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeoptReason {
    /// A null check failed.
    NullCheck = 0,
    /// An array index was out of bounds.
    BoundsCheck = 1,
    /// A checked cast failed.
    ClassCast = 2,
    /// A speculated receiver type did not match.
    TypeGuard = 3,
    /// Integer arithmetic overflowed a speculated range.
    Overflow = 4,
    /// Division by zero.
    DivisionByZero = 5,
    /// Execution reached code the compiler treated as unreachable.
    UnreachedCode = 6,
    /// A symbolic reference was not resolved at compile time.
    Unresolved = 7,
    /// A counted-loop limit speculation failed.
    LoopLimitCheck = 8,
    /// A miscellaneous runtime constraint was violated.
    RuntimeConstraint = 9,
    /// A memory aliasing speculation failed.
    Aliasing = 10,
}

impl DeoptReason {
    /// Decode from the wire representation.
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::NullCheck),
            1 => Some(Self::BoundsCheck),
            2 => Some(Self::ClassCast),
            3 => Some(Self::TypeGuard),
            4 => Some(Self::Overflow),
            5 => Some(Self::DivisionByZero),
            6 => Some(Self::UnreachedCode),
            7 => Some(Self::Unresolved),
            8 => Some(Self::LoopLimitCheck),
            9 => Some(Self::RuntimeConstraint),
            10 => Some(Self::Aliasing),
            _ => None,
        }
    }

    /// Whether guards with this reason come from an optimistic speculation
    /// (as opposed to a semantics-mandated check).
    pub const fn is_speculative(&self) -> bool {
        matches!(
            self,
            Self::TypeGuard | Self::Overflow | Self::LoopLimitCheck | Self::Aliasing
        )
    }
}

impl std::fmt::Display for DeoptReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NullCheck => "null_check",
            Self::BoundsCheck => "bounds_check",
            Self::ClassCast => "class_cast",
            Self::TypeGuard => "type_guard",
            Self::Overflow => "overflow",
            Self::DivisionByZero => "division_by_zero",
            Self::UnreachedCode => "unreached_code",
            Self::Unresolved => "unresolved",
            Self::LoopLimitCheck => "loop_limit_check",
            Self::RuntimeConstraint => "runtime_constraint",
            Self::Aliasing => "aliasing",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Deopt Action
// =============================================================================

/// What the runtime should do to the compiled code after the deopt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeoptAction {
    /// Keep the code; just interpret this one execution.
    None = 0,
    /// Keep the code until this site has deopted too often.
    RecompileIfTooManyDeopts = 1,
    /// Throw the code away and gather a fresh profile before recompiling.
    InvalidateReprofile = 2,
    /// Throw the code away and recompile immediately.
    InvalidateRecompile = 3,
    /// Throw the code away and never compile this method again.
    InvalidateStopCompiling = 4,
}

impl DeoptAction {
    /// Decode from the wire representation.
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::RecompileIfTooManyDeopts),
            2 => Some(Self::InvalidateReprofile),
            3 => Some(Self::InvalidateRecompile),
            4 => Some(Self::InvalidateStopCompiling),
            _ => None,
        }
    }

    /// Whether two actions may be merged into one descriptor.
    pub const fn can_merge(self, other: Self) -> bool {
        (self as u8 == other as u8)
            || matches!(
                (self, other),
                (Self::InvalidateRecompile, Self::InvalidateReprofile)
                    | (Self::InvalidateReprofile, Self::InvalidateRecompile)
            )
    }

    /// Merge two actions.
    ///
    /// Identical actions merge to themselves; the symmetric
    /// recompile/reprofile pair collapses to the reprofile variant (the
    /// weaker promise). Every other combination is a compiler bug.
    pub fn merge(self, other: Self) -> Self {
        if self == other {
            return self;
        }
        match (self, other) {
            (Self::InvalidateRecompile, Self::InvalidateReprofile)
            | (Self::InvalidateReprofile, Self::InvalidateRecompile) => Self::InvalidateReprofile,
            _ => unreachable!(
                "irreconcilable deoptimization actions: {:?} and {:?}",
                self, other
            ),
        }
    }
}

// =============================================================================
// Speculation Token
// =============================================================================

/// An opaque handle for a committed speculation, issued by the speculation
/// log. A failing deopt with a token attached marks that speculation as
/// failed for all future compilations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpeculationToken(u64);

impl SpeculationToken {
    /// "No speculation attached."
    pub const NONE: SpeculationToken = SpeculationToken(0);

    pub(crate) const fn from_raw(raw: u64) -> Self {
        SpeculationToken(raw)
    }

    /// The wire representation.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Whether a speculation is attached.
    pub const fn is_some(self) -> bool {
        self.0 != 0
    }
}

impl Default for SpeculationToken {
    fn default() -> Self {
        Self::NONE
    }
}

// =============================================================================
// Descriptor
// =============================================================================

/// The full deoptimization descriptor carried by guards and deoptimize
/// nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeoptDescriptor {
    pub reason: DeoptReason,
    pub action: DeoptAction,
    pub speculation: SpeculationToken,
}

impl DeoptDescriptor {
    /// Descriptor without an attached speculation.
    pub const fn new(reason: DeoptReason, action: DeoptAction) -> Self {
        DeoptDescriptor {
            reason,
            action,
            speculation: SpeculationToken::NONE,
        }
    }

    /// Descriptor invalidating `speculation` on failure.
    pub const fn with_speculation(
        reason: DeoptReason,
        action: DeoptAction,
        speculation: SpeculationToken,
    ) -> Self {
        DeoptDescriptor {
            reason,
            action,
            speculation,
        }
    }
}

impl std::fmt::Display for DeoptDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{:?}", self.reason, self.action)?;
        if self.speculation.is_some() {
            write!(f, "+spec{}", self.speculation.raw())?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_actions_merge_to_themselves() {
        assert_eq!(
            DeoptAction::None.merge(DeoptAction::None),
            DeoptAction::None
        );
    }

    #[test]
    fn test_recompile_reprofile_collapses_to_reprofile_both_ways() {
        assert_eq!(
            DeoptAction::InvalidateRecompile.merge(DeoptAction::InvalidateReprofile),
            DeoptAction::InvalidateReprofile
        );
        assert_eq!(
            DeoptAction::InvalidateReprofile.merge(DeoptAction::InvalidateRecompile),
            DeoptAction::InvalidateReprofile
        );
    }

    #[test]
    fn test_other_combinations_are_not_mergeable() {
        assert!(!DeoptAction::None.can_merge(DeoptAction::InvalidateRecompile));
        assert!(!DeoptAction::InvalidateStopCompiling.can_merge(DeoptAction::InvalidateReprofile));
        assert!(DeoptAction::InvalidateRecompile.can_merge(DeoptAction::InvalidateReprofile));
    }

    #[test]
    #[should_panic(expected = "irreconcilable")]
    fn test_irreconcilable_merge_is_fatal() {
        let _ = DeoptAction::None.merge(DeoptAction::InvalidateRecompile);
    }

    #[test]
    fn test_reasons_round_trip_through_u8() {
        for raw in 0..=10u8 {
            let reason = DeoptReason::from_u8(raw).unwrap();
            assert_eq!(reason as u8, raw);
        }
        assert_eq!(DeoptReason::from_u8(11), None);
    }

    #[test]
    fn test_none_token_is_falsy() {
        assert!(!SpeculationToken::NONE.is_some());
        assert!(SpeculationToken::from_raw(3).is_some());
    }
}
