/*
 * Copyright 2023-2025 the ocfl-store authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::error::Result;

/// A cooperative cancellation signal.
///
/// Worker loops check the token between files; cancelling does not interrupt
/// an in-flight transfer.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a new, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A bounded pool that runs one closure per work item on `size` threads.
///
/// The pool runs on plain OS threads scoped to each call; it holds no
/// background state. The first error cancels the remaining work and is
/// returned once every in-flight item has finished. Items skipped due to
/// cancellation are never started.
#[derive(Debug, Clone)]
pub struct ParallelPool {
    size: usize,
}

impl ParallelPool {
    /// Create a pool that runs up to `size` items concurrently.
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    /// Create a pool sized to the host's available parallelism.
    pub fn with_default_size() -> Self {
        let size = thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self::new(size)
    }

    /// The number of worker threads used per call.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `task` over every item, in parallel, honoring `cancel`.
    ///
    /// # Errors
    /// Returns the first error produced by `task`. Remaining items are
    /// skipped once an error occurs or `cancel` fires.
    pub fn run<T, F>(&self, items: Vec<T>, cancel: &CancelToken, task: F) -> Result<()>
    where
        T: Send,
        F: Fn(T) -> Result<()> + Sync,
    {
        if items.is_empty() {
            return Ok(());
        }

        let queue = Mutex::new(items.into_iter());
        let first_error: Mutex<Option<crate::Error>> = Mutex::new(None);

        thread::scope(|scope| {
            for _ in 0..self.size {
                scope.spawn(|| loop {
                    if cancel.is_cancelled() {
                        return;
                    }

                    let item = match queue.lock().unwrap().next() {
                        Some(item) => item,
                        None => return,
                    };

                    if let Err(error) = task(item) {
                        let mut slot = first_error.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(error);
                        }
                        cancel.cancel();
                        return;
                    }
                });
            }
        });

        match first_error.into_inner().unwrap() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    use crate::error::Error;

    #[test]
    fn runs_every_item() -> anyhow::Result<()> {
        let pool = ParallelPool::new(4);
        let seen = Mutex::new(HashSet::new());

        pool.run((0..100).collect(), &CancelToken::new(), |i| {
            seen.lock().unwrap().insert(i);
            Ok(())
        })?;

        assert_eq!(seen.lock().unwrap().len(), 100);
        Ok(())
    }

    #[test]
    fn first_error_cancels_remaining_work() {
        let pool = ParallelPool::new(2);
        let started = AtomicUsize::new(0);

        let result = pool.run((0..1000).collect::<Vec<u32>>(), &CancelToken::new(), |i| {
            started.fetch_add(1, Ordering::SeqCst);
            if i == 0 {
                Err(Error::State("boom".to_owned()))
            } else {
                Ok(())
            }
        });

        assert!(matches!(result, Err(Error::State(_))));
        assert!(started.load(Ordering::SeqCst) < 1000);
    }

    #[test]
    fn pre_cancelled_token_skips_all_work() -> anyhow::Result<()> {
        let pool = ParallelPool::new(2);
        let cancel = CancelToken::new();
        cancel.cancel();
        let started = AtomicUsize::new(0);

        pool.run((0..50).collect::<Vec<u32>>(), &cancel, |_| {
            started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })?;

        assert_eq!(started.load(Ordering::SeqCst), 0);
        Ok(())
    }
}
