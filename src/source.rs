use async_trait::async_trait;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;

use crate::traits::DataSource;
use crate::types::Fetched;

/// Turns an async closure into a [`DataSource`].
///
/// ```ignore
/// let source = FnSource::new(|tag: String| async move {
///     Ok::<_, std::io::Error>(catalog.lookup(&tag).await?.into())
/// });
/// ```
pub struct FnSource<K, V, E, F> {
    fetch:   F,
    _marker: PhantomData<fn(K) -> (V, E)>,
}

impl<K, V, E, F> FnSource<K, V, E, F> {
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            _marker: PhantomData,
        }
    }
}

impl<K, V, E, F> Debug for FnSource<K, V, E, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSource").finish_non_exhaustive()
    }
}

#[async_trait]
impl<K, V, E, F, Fut> DataSource for FnSource<K, V, E, F>
where
    K: Debug + Display + Hash + Clone + Eq + Send + Sync + 'static,
    V: Debug + Clone + Send + Sync + 'static,
    E: Display + Debug + Send + Sync + 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Fetched<V>, E>> + Send + 'static,
{
    type Error = E;
    type Key = K;
    type Value = V;

    async fn fetch(&self, key: &K) -> Result<Fetched<V>, E> {
        (self.fetch)(key.clone()).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_closure_becomes_a_source() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = FnSource::<String, usize, String, _>::new({
            let calls = calls.clone();
            move |tag: String| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    match tag.as_str() {
                        "" => Err("empty tag".to_string()),
                        t if t.starts_with("meta:") => Ok(Fetched::NotFound),
                        t => Ok(Fetched::Found(t.len())),
                    }
                }
            }
        });

        assert_eq!(source.fetch(&"species:fox".to_string()).await.unwrap(), Fetched::Found(11));
        assert_eq!(source.fetch(&"meta:hidden".to_string()).await.unwrap(), Fetched::NotFound);
        assert!(source.fetch(&String::new()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
