use std::fmt;
use std::hint::unreachable_unchecked;

use crate::Violation;
use crate::check::violation;

/// A closed set of alternatives, represented as an `enum` with one single-field variant per
/// alternative type.
///
/// Implemented by [`define_variant!`][crate::define_variant], which also implements
/// [`Alternative`] for every alternative type. Implementing it by hand is possible but requires
/// the tags to agree with the [`Alternative::TAG`] constants.
pub trait VariantSet: Sized {
    /// Number of alternatives in the set.
    const ALTERNATIVES: usize;

    /// Zero-based position of the live alternative in the set definition.
    fn tag(&self) -> usize;

    /// Name of the live alternative, for diagnostics.
    fn alternative_name(&self) -> &'static str;
}

/// A type that is one of the alternatives of the set `E`.
pub trait Alternative<E: VariantSet>: Sized {
    /// Zero-based position of this alternative in the set definition.
    const TAG: usize;

    /// Name of this alternative, for diagnostics.
    const NAME: &'static str;

    /// Wraps the value into the set.
    fn into_set(self) -> E;

    /// Unwraps the value from the set, or gives the set back if it holds another alternative.
    ///
    /// # Errors
    ///
    /// Returns the set unchanged if it holds a different alternative.
    fn from_set(set: E) -> Result<Self, E>;

    /// Borrows the value from the set if it holds this alternative.
    fn from_set_ref(set: &E) -> Option<&Self>;

    /// Mutably borrows the value from the set if it holds this alternative.
    fn from_set_mut(set: &mut E) -> Option<&mut Self>;
}

/// Declares an `enum` as a closed set of alternatives for use with [`Variant`].
///
/// Each enum variant wraps exactly one alternative type and every alternative type must be
/// distinct. The macro implements [`VariantSet`] for the enum, [`Alternative`] for every
/// alternative type and `From<Alternative>` for the enum. Tags follow the declaration order,
/// starting from zero.
///
/// # Example
///
/// ```
/// use holdfast::{Variant, define_variant};
///
/// #[derive(Clone, Debug, PartialEq)]
/// struct Circle {
///     radius: f32,
/// }
///
/// #[derive(Clone, Debug, PartialEq)]
/// struct Square {
///     side: f32,
/// }
///
/// define_variant! {
///     #[derive(Clone, Debug, PartialEq)]
///     pub enum Shape {
///         Circle(Circle),
///         Square(Square),
///     }
/// }
///
/// let shape = Variant::<Shape>::new(Square { side: 2.0 });
///
/// assert!(shape.is::<Square>());
/// assert!(!shape.is::<Circle>());
/// assert_eq!(Variant::<Shape>::index_of::<Square>(), 1);
/// assert_eq!(shape.get::<Square>().side, 2.0);
///
/// let area = shape.visit(|shape| match shape {
///     Shape::Circle(circle) => 3.0 * circle.radius * circle.radius,
///     Shape::Square(square) => square.side * square.side,
/// });
/// assert_eq!(area, 4.0);
/// ```
///
/// Types outside the set are rejected at compile time:
///
/// ```compile_fail
/// use holdfast::{Variant, define_variant};
///
/// define_variant! {
///     enum Number {
///         Integer(i64),
///         Float(f64),
///     }
/// }
///
/// let text = Variant::<Number>::new("not a number");
/// ```
#[macro_export]
macro_rules! define_variant {
    (@alternatives $name:ident; $tag:expr;) => {};
    (
        @alternatives $name:ident; $tag:expr;
        $variant:ident($ty:ty) $(, $rest_variant:ident($rest_ty:ty))*
    ) => {
        impl $crate::Alternative<$name> for $ty {
            const TAG: usize = $tag;
            const NAME: &'static str = ::core::stringify!($variant);

            fn into_set(self) -> $name {
                $name::$variant(self)
            }

            #[allow(unreachable_patterns, reason = "a set may have a single alternative")]
            fn from_set(set: $name) -> ::core::result::Result<Self, $name> {
                match set {
                    $name::$variant(value) => ::core::result::Result::Ok(value),
                    other => ::core::result::Result::Err(other),
                }
            }

            #[allow(unreachable_patterns, reason = "a set may have a single alternative")]
            fn from_set_ref(set: &$name) -> ::core::option::Option<&Self> {
                match set {
                    $name::$variant(value) => ::core::option::Option::Some(value),
                    _ => ::core::option::Option::None,
                }
            }

            #[allow(unreachable_patterns, reason = "a set may have a single alternative")]
            fn from_set_mut(set: &mut $name) -> ::core::option::Option<&mut Self> {
                match set {
                    $name::$variant(value) => ::core::option::Option::Some(value),
                    _ => ::core::option::Option::None,
                }
            }
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                $name::$variant(value)
            }
        }

        $crate::define_variant!(@alternatives $name; $tag + 1; $($rest_variant($rest_ty)),*);
    };
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident($ty:ty)
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant($ty),
            )+
        }

        impl $crate::VariantSet for $name {
            const ALTERNATIVES: usize = [$(::core::stringify!($variant)),+].len();

            fn tag(&self) -> usize {
                match self {
                    $($name::$variant(_) => <$ty as $crate::Alternative<$name>>::TAG,)+
                }
            }

            fn alternative_name(&self) -> &'static str {
                match self {
                    $($name::$variant(_) => ::core::stringify!($variant),)+
                }
            }
        }

        $crate::define_variant!(@alternatives $name; 0_usize; $($variant($ty)),+);
    };
}

/// A value that holds one alternative of the closed set `E`, or nothing at all.
///
/// The "nothing" state is called invalid. A variant is invalid when created by
/// [`invalid()`][Self::invalid] or [`Default`], after [`reset()`][Self::reset] and after its
/// value has been moved out by [`take()`][Self::take].
///
/// Checked accessors treat access to an invalid variant, or access as an alternative other than
/// the live one, as a contract violation. The `try_` accessors return `None` instead.
///
/// See [`define_variant!`][crate::define_variant] for an example.
pub struct Variant<E: VariantSet> {
    value: Option<E>,
}

impl<E: VariantSet> Variant<E> {
    /// Creates a variant holding `value`.
    #[must_use]
    pub fn new<X: Alternative<E>>(value: X) -> Self {
        Self {
            value: Some(value.into_set()),
        }
    }

    /// Creates a variant holding the alternative that `set` holds.
    #[must_use]
    pub fn from_set(set: E) -> Self {
        Self { value: Some(set) }
    }

    /// Creates a variant that holds no alternative.
    #[must_use]
    pub const fn invalid() -> Self {
        Self { value: None }
    }

    /// Whether the variant holds an alternative.
    #[must_use]
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.value.is_some()
    }

    /// Tag of the live alternative, or `None` if the variant is invalid.
    #[must_use]
    #[inline]
    pub fn tag(&self) -> Option<usize> {
        self.value.as_ref().map(VariantSet::tag)
    }

    /// Tag of the alternative `X` within the set.
    #[must_use]
    pub const fn index_of<X: Alternative<E>>() -> usize {
        X::TAG
    }

    /// Whether the live alternative is `X`.
    #[must_use]
    #[inline]
    pub fn is<X: Alternative<E>>(&self) -> bool {
        self.tag() == Some(X::TAG)
    }

    /// The live alternative as `X`.
    ///
    /// # Panics
    ///
    /// Panics if the variant is invalid or holds a different alternative.
    #[must_use]
    #[track_caller]
    pub fn get<X: Alternative<E>>(&self) -> &X {
        let set = self.as_set();

        match X::from_set_ref(set) {
            Some(value) => value,
            None => violation(Violation::WrongAlternative {
                requested: X::NAME,
                actual: set.alternative_name(),
            }),
        }
    }

    /// The live alternative as `X`, mutably.
    ///
    /// # Panics
    ///
    /// Panics if the variant is invalid or holds a different alternative.
    #[must_use]
    #[track_caller]
    pub fn get_mut<X: Alternative<E>>(&mut self) -> &mut X {
        let Some(set) = &mut self.value else {
            violation(Violation::InvalidVariant);
        };

        let actual = set.alternative_name();

        match X::from_set_mut(set) {
            Some(value) => value,
            None => violation(Violation::WrongAlternative {
                requested: X::NAME,
                actual,
            }),
        }
    }

    /// The live alternative as `X`, or `None` if the variant is invalid or holds a different
    /// alternative.
    #[must_use]
    #[inline]
    pub fn try_get<X: Alternative<E>>(&self) -> Option<&X> {
        self.value.as_ref().and_then(X::from_set_ref)
    }

    /// The live alternative as `X` mutably, or `None` if the variant is invalid or holds a
    /// different alternative.
    #[must_use]
    #[inline]
    pub fn try_get_mut<X: Alternative<E>>(&mut self) -> Option<&mut X> {
        self.value.as_mut().and_then(X::from_set_mut)
    }

    /// The live alternative as `X`, without any checks.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the variant holds the alternative `X`.
    #[must_use]
    #[inline]
    pub unsafe fn get_unchecked<X: Alternative<E>>(&self) -> &X {
        match self.value.as_ref().and_then(X::from_set_ref) {
            Some(value) => value,
            // SAFETY: The caller guarantees that the variant holds `X`.
            None => unsafe { unreachable_unchecked() },
        }
    }

    /// Drops the live alternative (if any), then stores `value`.
    pub fn set<X: Alternative<E>>(&mut self, value: X) {
        self.reset();
        self.value = Some(value.into_set());
    }

    /// Drops the live alternative (if any), leaving the variant invalid.
    pub fn reset(&mut self) {
        self.value = None;
    }

    /// Moves the live alternative into a new variant, leaving this one invalid.
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            value: self.value.take(),
        }
    }

    /// The set holding the live alternative.
    ///
    /// # Panics
    ///
    /// Panics if the variant is invalid.
    #[must_use]
    #[track_caller]
    pub fn as_set(&self) -> &E {
        match &self.value {
            Some(set) => set,
            None => violation(Violation::InvalidVariant),
        }
    }

    /// The set holding the live alternative, mutably.
    ///
    /// # Panics
    ///
    /// Panics if the variant is invalid.
    #[must_use]
    #[track_caller]
    pub fn as_set_mut(&mut self) -> &mut E {
        match &mut self.value {
            Some(set) => set,
            None => violation(Violation::InvalidVariant),
        }
    }

    /// Passes the set holding the live alternative to `visitor` and returns its result.
    ///
    /// # Panics
    ///
    /// Panics if the variant is invalid.
    #[track_caller]
    pub fn visit<R>(&self, visitor: impl FnOnce(&E) -> R) -> R {
        visitor(self.as_set())
    }

    /// Passes the set holding the live alternative to `visitor` mutably and returns its result.
    ///
    /// # Panics
    ///
    /// Panics if the variant is invalid.
    #[track_caller]
    pub fn visit_mut<R>(&mut self, visitor: impl FnOnce(&mut E) -> R) -> R {
        visitor(self.as_set_mut())
    }

    /// Like [`visit()`][Self::visit] but does nothing and returns `None` if the variant is
    /// invalid.
    pub fn try_visit<R>(&self, visitor: impl FnOnce(&E) -> R) -> Option<R> {
        self.value.as_ref().map(visitor)
    }

    /// Like [`visit_mut()`][Self::visit_mut] but does nothing and returns `None` if the variant is
    /// invalid.
    pub fn try_visit_mut<R>(&mut self, visitor: impl FnOnce(&mut E) -> R) -> Option<R> {
        self.value.as_mut().map(visitor)
    }

    /// The set holding the live alternative, or `None` if the variant is invalid.
    #[must_use]
    pub fn into_inner(self) -> Option<E> {
        self.value
    }

    /// Moves the live alternative out as `X`.
    ///
    /// # Errors
    ///
    /// Returns the variant unchanged if it is invalid or holds a different alternative.
    pub fn into_alternative<X: Alternative<E>>(self) -> Result<X, Self> {
        match self.value {
            Some(set) => X::from_set(set).map_err(Self::from_set),
            None => Err(self),
        }
    }
}

impl<E: VariantSet> Default for Variant<E> {
    fn default() -> Self {
        Self::invalid()
    }
}

impl<E: VariantSet + Clone> Clone for Variant<E> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
        }
    }
}

impl<E: VariantSet + PartialEq> PartialEq for Variant<E> {
    /// Variants are equal if both are invalid or both hold equal alternatives.
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<E: VariantSet + Eq> Eq for Variant<E> {}

impl<E: VariantSet> From<E> for Variant<E> {
    fn from(set: E) -> Self {
        Self::from_set(set)
    }
}

impl<E: VariantSet + fmt::Debug> fmt::Debug for Variant<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(set) => f.debug_tuple("Variant").field(set).finish(),
            None => f.write_str("Variant(<invalid>)"),
        }
    }
}
