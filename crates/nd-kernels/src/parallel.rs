/// Runs the closure inside a rayon scope when `std` is enabled, inline otherwise.
macro_rules! run_par {
    (
        $func:expr
    ) => {{
        #[cfg(feature = "std")]
        use rayon::prelude::*;

        #[cfg(feature = "std")]
        #[allow(clippy::redundant_closure_call)]
        let output = rayon::scope(|_| $func());

        #[cfg(not(feature = "std"))]
        #[allow(clippy::redundant_closure_call)]
        let output = $func();

        output
    }};
}

/// Iterates over `start..end`, in parallel when `std` is enabled.
macro_rules! iter_range_par {
    (
        $start:expr, $end:expr
    ) => {{
        #[cfg(feature = "std")]
        let output = rayon::iter::IntoParallelIterator::into_par_iter($start..$end);

        #[cfg(not(feature = "std"))]
        let output = ($start..$end);

        output
    }};
}
