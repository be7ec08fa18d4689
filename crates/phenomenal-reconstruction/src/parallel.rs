//! Order-preserving evaluation helpers.
//!
//! With the `parallel` feature the work is spread over rayon's pool;
//! results are collected in input order either way, so output does not
//! depend on the feature.

use phenomenal_core::Result;

/// Keeps the items for which `keep` returns `Ok(true)`, in input order.
pub(crate) fn retain<T, F>(items: Vec<T>, keep: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&T) -> Result<bool> + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        let kept: Vec<Option<T>> = items
            .into_par_iter()
            .map(|item| keep(&item).map(|k| k.then_some(item)))
            .collect::<Result<_>>()?;
        Ok(kept.into_iter().flatten().collect())
    }

    #[cfg(not(feature = "parallel"))]
    {
        let mut kept = Vec::with_capacity(items.len());
        for item in items {
            if keep(&item)? {
                kept.push(item);
            }
        }
        Ok(kept)
    }
}

/// Maps every item through `f`, in input order, stopping at the first error.
pub(crate) fn map<T, U, F>(items: &[T], f: F) -> Result<Vec<U>>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> Result<U> + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        items.par_iter().map(f).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        items.iter().map(f).collect()
    }
}
