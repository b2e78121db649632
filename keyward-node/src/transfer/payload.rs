// Copyright 2025 Keyward Project Contributors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bytes::{Bytes, BytesMut};
use keyward_common::{err_box, NodeError, NodeResult};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Progress {
    received: usize,
    aborted: bool,
}

struct Inner {
    data: BytesMut,
    frozen: Option<Bytes>,
    total: usize,
    abort_reason: Option<String>,
}

/// Payload source shared between every fan-out leg of one insert.
///
/// The upstream receiver appends chunks while any number of transfer tasks
/// independently wait for full assembly; an abort on the producing side is
/// observed by every waiter. Once assembled the content is immutable.
#[derive(Clone)]
pub struct PayloadBuffer {
    inner: Arc<Mutex<Inner>>,
    progress: Arc<watch::Sender<Progress>>,
}

impl PayloadBuffer {
    /// Empty buffer expecting `total` bytes from the upstream receiver.
    pub fn with_capacity(total: usize) -> Self {
        let frozen = if total == 0 {
            Some(Bytes::new())
        } else {
            None
        };
        let (tx, _) = watch::channel(Progress {
            received: 0,
            aborted: false,
        });
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data: BytesMut::with_capacity(total),
                frozen,
                total,
                abort_reason: None,
            })),
            progress: Arc::new(tx),
        }
    }

    /// Fully assembled buffer, for payloads sourced from the local store.
    pub fn from_bytes(data: Bytes) -> Self {
        let total = data.len();
        let (tx, _) = watch::channel(Progress {
            received: total,
            aborted: false,
        });
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data: BytesMut::new(),
                frozen: Some(data),
                total,
                abort_reason: None,
            })),
            progress: Arc::new(tx),
        }
    }

    pub fn append(&self, chunk: &[u8]) -> NodeResult<()> {
        let progress = {
            let mut inner = self.lock();
            if let Some(reason) = &inner.abort_reason {
                return Err(NodeError::aborted(reason.clone()));
            }
            if inner.frozen.is_some() {
                return err_box!("payload already assembled");
            }
            if inner.data.len() + chunk.len() > inner.total {
                return err_box!(
                    "payload overflow: {} + {} exceeds {}",
                    inner.data.len(),
                    chunk.len(),
                    inner.total
                );
            }
            inner.data.extend_from_slice(chunk);
            if inner.data.len() == inner.total {
                let assembled = std::mem::take(&mut inner.data).freeze();
                inner.frozen = Some(assembled);
            }
            Progress {
                received: inner.frozen.as_ref().map(Bytes::len).unwrap_or(inner.data.len()),
                aborted: false,
            }
        };
        self.progress.send_replace(progress);
        Ok(())
    }

    /// Kill the buffer; waiters see the abort. A no-op once assembled.
    pub fn abort(&self, reason: impl Into<String>) {
        let aborted = {
            let mut inner = self.lock();
            if inner.frozen.is_some() || inner.abort_reason.is_some() {
                false
            } else {
                inner.abort_reason = Some(reason.into());
                true
            }
        };
        if aborted {
            let received = self.lock().data.len();
            self.progress.send_replace(Progress {
                received,
                aborted: true,
            });
        }
    }

    pub fn all_received(&self) -> bool {
        self.lock().frozen.is_some()
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().abort_reason.is_some()
    }

    pub fn abort_reason(&self) -> Option<String> {
        self.lock().abort_reason.clone()
    }

    pub fn total(&self) -> usize {
        self.lock().total
    }

    /// The assembled content, if complete.
    pub fn try_bytes(&self) -> Option<Bytes> {
        self.lock().frozen.clone()
    }

    /// Block until the payload is fully assembled or aborted.
    pub async fn await_assembled(&self) -> NodeResult<Bytes> {
        let mut rx = self.progress.subscribe();
        loop {
            {
                let inner = self.lock();
                if let Some(reason) = &inner.abort_reason {
                    return Err(NodeError::aborted(reason.clone()));
                }
                if let Some(bytes) = &inner.frozen {
                    return Ok(bytes.clone());
                }
            }
            if rx.changed().await.is_err() {
                return Err(NodeError::aborted("payload buffer dropped"));
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Inner operations never panic while holding the lock.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assembly_wakes_every_waiter() {
        let buffer = PayloadBuffer::with_capacity(6);
        let a = buffer.clone();
        let b = buffer.clone();
        let wait_a = tokio::spawn(async move { a.await_assembled().await });
        let wait_b = tokio::spawn(async move { b.await_assembled().await });

        buffer.append(b"foo").unwrap();
        assert!(!buffer.all_received());
        buffer.append(b"bar").unwrap();

        assert_eq!(wait_a.await.unwrap().unwrap(), Bytes::from_static(b"foobar"));
        assert_eq!(wait_b.await.unwrap().unwrap(), Bytes::from_static(b"foobar"));
    }

    #[tokio::test]
    async fn abort_is_visible_to_every_reader() {
        let buffer = PayloadBuffer::with_capacity(10);
        let reader = buffer.clone();
        let wait = tokio::spawn(async move { reader.await_assembled().await });

        buffer.append(b"part").unwrap();
        buffer.abort("upstream send died");

        let err = wait.await.unwrap().unwrap_err();
        assert!(err.is_aborted());
        assert!(buffer.is_aborted());
        assert_eq!(buffer.abort_reason().unwrap(), "upstream send died");
        assert!(buffer.append(b"more").is_err());
    }

    #[tokio::test]
    async fn from_bytes_is_immediately_assembled() {
        let buffer = PayloadBuffer::from_bytes(Bytes::from_static(b"block"));
        assert!(buffer.all_received());
        assert_eq!(buffer.await_assembled().await.unwrap(), Bytes::from_static(b"block"));
    }

    #[tokio::test]
    async fn abort_after_assembly_is_ignored() {
        let buffer = PayloadBuffer::from_bytes(Bytes::from_static(b"block"));
        buffer.abort("too late");
        assert!(!buffer.is_aborted());
        assert!(buffer.await_assembled().await.is_ok());
    }

    #[test]
    fn overflow_is_rejected() {
        let buffer = PayloadBuffer::with_capacity(4);
        assert!(buffer.append(b"12345").is_err());
    }
}
