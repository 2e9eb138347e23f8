//! Value stamps: abstract descriptions of the values a node may produce.
//!
//! A stamp bounds the runtime values of a value-producing node — its kind,
//! nullability, and (for integers) its numeric range. Stamps form a small
//! lattice:
//!
//! ```text
//!            ⊤  (kind known, nothing else)
//!           /|\
//!     narrower stamps (tighter range, non-null, exact type)
//!           \|/
//!          Empty  (no value possible — unreachable)
//! ```
//!
//! The full type lattice (subtype queries, type hierarchy) lives outside
//! this crate; the IR core only carries what local canonicalization needs.
//! Refinement is monotonic: a node's stamp may only become more precise over
//! its lifetime (`Graph::refine_stamp` enforces this).

use crate::node::TypeRef;

// =============================================================================
// Stamp
// =============================================================================

/// Abstract description of a node's possible runtime values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stamp {
    /// No value is produced (pure control nodes, frame states).
    Void,
    /// A 64-bit integer within `[min, max]`.
    Int(IntStamp),
    /// A 64-bit float. `non_nan` records that NaN has been excluded.
    Float(FloatStamp),
    /// A boolean value.
    Boolean,
    /// A heap reference.
    Object(ObjectStamp),
    /// A condition value (logic nodes); consumed through Condition edges.
    Condition,
    /// The memory token produced by kill points.
    Memory,
    /// No value is possible: the producing path is unreachable.
    Empty,
}

/// Integer range stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntStamp {
    pub min: i64,
    pub max: i64,
}

/// Float stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FloatStamp {
    pub non_nan: bool,
}

/// Object reference stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectStamp {
    /// Null has been proven impossible.
    pub non_null: bool,
    /// Known exact or upper-bound type, if the front-end supplied one.
    pub ty: Option<TypeRef>,
    /// Whether `ty` is exact (no subtypes possible).
    pub exact: bool,
}

impl IntStamp {
    /// The unrestricted 64-bit integer stamp.
    pub const FULL: IntStamp = IntStamp {
        min: i64::MIN,
        max: i64::MAX,
    };

    /// A single-value range.
    #[inline]
    pub const fn constant(value: i64) -> Self {
        IntStamp {
            min: value,
            max: value,
        }
    }

    /// Whether the range holds exactly one value.
    #[inline]
    pub const fn is_constant(&self) -> bool {
        self.min == self.max
    }

    /// Whether `other` describes a subset of this range.
    #[inline]
    pub const fn contains(&self, other: &IntStamp) -> bool {
        self.min <= other.min && other.max <= self.max
    }
}

impl Stamp {
    /// The unrestricted integer stamp.
    pub const INT: Stamp = Stamp::Int(IntStamp::FULL);

    /// The unrestricted float stamp.
    pub const FLOAT: Stamp = Stamp::Float(FloatStamp { non_nan: false });

    /// A nullable, untyped object stamp.
    pub const OBJECT: Stamp = Stamp::Object(ObjectStamp {
        non_null: false,
        ty: None,
        exact: false,
    });

    /// Stamp of an integer constant.
    pub fn int_constant(value: i64) -> Stamp {
        Stamp::Int(IntStamp::constant(value))
    }

    /// Whether this stamp admits no value at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Stamp::Empty)
    }

    /// Whether this stamp describes a single known integer.
    pub fn as_int_constant(&self) -> Option<i64> {
        match self {
            Stamp::Int(s) if s.is_constant() => Some(s.min),
            _ => None,
        }
    }

    /// Whether a node carrying this stamp produces a consumable value.
    #[inline]
    pub fn produces_value(&self) -> bool {
        !matches!(self, Stamp::Void)
    }

    /// Lattice meet: the weakest stamp admitting every value of both.
    ///
    /// Used for phi construction, where the result may be any input.
    pub fn meet(&self, other: &Stamp) -> Stamp {
        use Stamp::*;
        match (self, other) {
            (Empty, s) | (s, Empty) => *s,
            (Int(a), Int(b)) => Int(IntStamp {
                min: a.min.min(b.min),
                max: a.max.max(b.max),
            }),
            (Float(a), Float(b)) => Float(FloatStamp {
                non_nan: a.non_nan && b.non_nan,
            }),
            (Boolean, Boolean) => Boolean,
            (Condition, Condition) => Condition,
            (Memory, Memory) => Memory,
            (Object(a), Object(b)) => Object(ObjectStamp {
                non_null: a.non_null && b.non_null,
                ty: if a.ty == b.ty { a.ty } else { None },
                exact: a.exact && b.exact && a.ty == b.ty,
            }),
            (Void, Void) => Void,
            // Kind mismatch across value kinds: a type-mismatched phi.
            // Verification reports it; meet degrades to the left kind
            // widened, which keeps local inference total.
            (a, _) => a.widened(),
        }
    }

    /// Lattice join: the strongest stamp admitted by both.
    ///
    /// Used for refinement; an uninhabited intersection yields `Empty`.
    pub fn join(&self, other: &Stamp) -> Stamp {
        use Stamp::*;
        match (self, other) {
            (Empty, _) | (_, Empty) => Empty,
            (Int(a), Int(b)) => {
                let min = a.min.max(b.min);
                let max = a.max.min(b.max);
                if min > max {
                    Empty
                } else {
                    Int(IntStamp { min, max })
                }
            }
            (Float(a), Float(b)) => Float(FloatStamp {
                non_nan: a.non_nan || b.non_nan,
            }),
            (Boolean, Boolean) => Boolean,
            (Condition, Condition) => Condition,
            (Memory, Memory) => Memory,
            (Object(a), Object(b)) => {
                let ty = match (a.ty, b.ty) {
                    (Some(t), None) | (None, Some(t)) => Some(t),
                    (Some(ta), Some(tb)) if ta == tb => Some(ta),
                    // Distinct named types: without the external hierarchy
                    // the intersection cannot be named. Keep the left bound.
                    (Some(ta), Some(_)) => Some(ta),
                    (None, None) => None,
                };
                Object(ObjectStamp {
                    non_null: a.non_null || b.non_null,
                    ty,
                    exact: a.exact || b.exact,
                })
            }
            (Void, Void) => Void,
            _ => Empty,
        }
    }

    /// Whether this stamp is at least as precise as `other` (admits no
    /// value `other` excludes). The monotonic-refinement check.
    pub fn refines(&self, other: &Stamp) -> bool {
        use Stamp::*;
        match (self, other) {
            (Empty, _) => true,
            (Int(a), Int(b)) => b.contains(a),
            (Float(a), Float(b)) => a.non_nan || !b.non_nan,
            (Object(a), Object(b)) => {
                (a.non_null || !b.non_null)
                    && (b.ty.is_none() || a.ty == b.ty)
                    && (a.exact || !b.exact)
            }
            (a, b) => a == b,
        }
    }

    /// This stamp with all per-kind precision dropped.
    fn widened(&self) -> Stamp {
        match self {
            Stamp::Int(_) => Stamp::INT,
            Stamp::Float(_) => Stamp::FLOAT,
            Stamp::Object(_) => Stamp::OBJECT,
            other => *other,
        }
    }
}

impl std::fmt::Display for Stamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stamp::Void => write!(f, "void"),
            Stamp::Int(s) if s.is_constant() => write!(f, "i64 {{{}}}", s.min),
            Stamp::Int(s) if *s == IntStamp::FULL => write!(f, "i64"),
            Stamp::Int(s) => write!(f, "i64 [{}, {}]", s.min, s.max),
            Stamp::Float(s) if s.non_nan => write!(f, "f64!nan"),
            Stamp::Float(_) => write!(f, "f64"),
            Stamp::Boolean => write!(f, "bool"),
            Stamp::Object(s) => {
                write!(f, "obj")?;
                if let Some(ty) = s.ty {
                    write!(f, ":t{}", ty)?;
                }
                if s.exact {
                    write!(f, "!")?;
                }
                if s.non_null {
                    write!(f, " nn")?;
                }
                Ok(())
            }
            Stamp::Condition => write!(f, "cond"),
            Stamp::Memory => write!(f, "mem"),
            Stamp::Empty => write!(f, "empty"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meet_widens_int_ranges() {
        let a = Stamp::Int(IntStamp { min: 0, max: 10 });
        let b = Stamp::Int(IntStamp { min: 5, max: 20 });
        assert_eq!(a.meet(&b), Stamp::Int(IntStamp { min: 0, max: 20 }));
    }

    #[test]
    fn test_join_narrows_int_ranges() {
        let a = Stamp::Int(IntStamp { min: 0, max: 10 });
        let b = Stamp::Int(IntStamp { min: 5, max: 20 });
        assert_eq!(a.join(&b), Stamp::Int(IntStamp { min: 5, max: 10 }));
    }

    #[test]
    fn test_join_of_disjoint_ranges_is_empty() {
        let a = Stamp::Int(IntStamp { min: 0, max: 1 });
        let b = Stamp::Int(IntStamp { min: 5, max: 6 });
        assert_eq!(a.join(&b), Stamp::Empty);
    }

    #[test]
    fn test_refinement_is_a_partial_order() {
        let full = Stamp::INT;
        let narrow = Stamp::Int(IntStamp { min: 1, max: 2 });
        let constant = Stamp::int_constant(1);

        assert!(narrow.refines(&full));
        assert!(constant.refines(&narrow));
        assert!(constant.refines(&full));
        assert!(!full.refines(&narrow));
        assert!(full.refines(&full));
    }

    #[test]
    fn test_nonnull_object_refines_nullable() {
        let nullable = Stamp::OBJECT;
        let non_null = Stamp::Object(ObjectStamp {
            non_null: true,
            ty: None,
            exact: false,
        });
        assert!(non_null.refines(&nullable));
        assert!(!nullable.refines(&non_null));
    }

    #[test]
    fn test_int_constant_round_trips() {
        assert_eq!(Stamp::int_constant(42).as_int_constant(), Some(42));
        assert_eq!(Stamp::INT.as_int_constant(), None);
    }
}
