//! Logging facade for the kestrel crates.
//!
//! Everything funnels through `tracing`, but only when the `KESTREL_LOG`
//! environment variable was present at compile time; otherwise every macro
//! expands to a no-op and the optimizer erases the call sites. Engine crates
//! depend on this facade instead of a logging crate so the backend can be
//! swapped in one place.

#[doc(hidden)]
pub use tracing as __tracing;

#[doc(hidden)]
pub const ENABLED: bool = option_env!("KESTREL_LOG").is_some();

pub use tracing::Level;

#[macro_export]
macro_rules! debug {
    ($($tok:tt)*) => {
        if $crate::ENABLED {
            $crate::__tracing::debug!($($tok)*)
        }
    };
}

#[macro_export]
macro_rules! warn {
    ($($tok:tt)*) => {
        if $crate::ENABLED {
            $crate::__tracing::warn!($($tok)*)
        }
    };
}

#[macro_export]
macro_rules! error {
    ($($tok:tt)*) => {
        if $crate::ENABLED {
            $crate::__tracing::error!($($tok)*)
        }
    };
}

#[macro_export]
macro_rules! span {
    ($($tok:tt)*) => {
        if $crate::ENABLED {
            $crate::Span(Some($crate::__tracing::span!($($tok)*)))
        } else {
            $crate::Span(None)
        }
    };
}

/// A span that may be disabled at compile time.
pub struct Span(#[doc(hidden)] pub Option<tracing::Span>);

impl Span {
    pub fn enter(&self) -> Entered<'_> {
        Entered(self.0.as_ref().map(|span| span.enter()))
    }

    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        match &self.0 {
            Some(span) => span.in_scope(f),
            None => f(),
        }
    }
}

pub struct Entered<'a>(Option<tracing::span::Entered<'a>>);
