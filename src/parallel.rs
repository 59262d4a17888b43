use rayon::prelude::*;

/// Maps `items` in place order, optionally on the rayon pool. Indexed parallel iterators collect
/// into `Vec` in input order, so both paths return identical output.
pub(crate) fn map_ordered<T, R, F>(items: &[T], parallel: bool, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    if parallel {
        items.par_iter().map(f).collect()
    } else {
        items.iter().map(f).collect()
    }
}
