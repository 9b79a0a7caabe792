#[cfg(feature = "tracing")]
#[allow(unused_imports)]
mod inner {
    pub(crate) use tracing::debug;
    pub(crate) use tracing::info;
    pub(crate) use tracing::instrument;
    pub(crate) use tracing::trace;
    pub(crate) use tracing::warn;
}

#[cfg(not(feature = "tracing"))]
#[allow(unused_imports)]
mod inner {
    macro_rules! noop {
        ($($args:tt)*) => {{
            if false {
                // Reference the arguments so that they do not trigger
                // unused variable warnings.
                let _args = format_args!($($args)*);
            }
        }};
    }

    pub(crate) use noop as debug;
    pub(crate) use noop as info;
    pub(crate) use noop as trace;
    pub(crate) use noop as warn;
}

#[allow(unused_imports)]
pub(crate) use inner::*;
