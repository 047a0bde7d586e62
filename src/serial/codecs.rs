/// Newline delimited frames.
pub(crate) mod lines;
