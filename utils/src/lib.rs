pub mod input;

use std::fmt::{Display, Formatter};

/// Wrap a closure into a `Display` object, so that formatting code can be
/// written once and used both for `format!` and incremental writers.
pub struct Fmt<F>(pub F)
where
    F: Fn(&mut Formatter) -> std::fmt::Result;

impl<F> Display for Fmt<F>
where
    F: Fn(&mut Formatter) -> std::fmt::Result,
{
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        (self.0)(f)
    }
}

/// Print all elements of the iterator, separated by `sep`.
pub fn disp_iter<T: Display>(f: &mut Formatter<'_>, iterable: &[T], sep: &str) -> std::fmt::Result {
    let mut i = iterable.iter();
    if let Some(first) = i.next() {
        write!(f, "{first}")?;
        for other in i {
            write!(f, "{sep}")?;
            write!(f, "{other}")?;
        }
    }
    std::fmt::Result::Ok(())
}
