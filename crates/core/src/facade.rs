//! Read interface over a projection and the hot-swap facade.
//!
//! Re-ingest builds a fresh store off to the side; [`HotSwap::swap`]
//! publishes it atomically. A reader that began before the swap sees a
//! consistent old-store view; no reader observes a partial swap.

use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::node::Node;

/// Graph-reading interface shared by the in-memory store, the table
/// projection, and the combined projection view. Network filesystem
/// adapters program against this trait.
pub trait GraphReader: Send + Sync {
    /// Shared view of a node. Identifiers are normalized (a leading slash
    /// is stripped) before lookup.
    fn get_node(&self, id: &str) -> Result<Arc<Node>>;

    /// Child identifiers of a directory, or the top-level roots for the
    /// root sentinel. Sorted lexicographically, no duplicates.
    fn list_children(&self, id: &str) -> Result<Vec<String>>;

    /// Copy at most `buf.len()` content bytes starting at `offset` into
    /// `buf`; returns the number copied (0 at or past EOF). Lazy
    /// content-references are resolved transparently.
    fn read_content(&self, id: &str, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Drop any cached size or content for a node. A no-op for stores
    /// whose nodes carry their data directly.
    fn invalidate(&self, _id: &str) {}

    /// Release resources. Called when a hot swap retires this delegate.
    fn close(&self) {}
}

/// Convenience: read a node's entire content.
pub fn read_to_vec(reader: &dyn GraphReader, id: &str) -> Result<Vec<u8>> {
    let size = reader.get_node(id)?.size() as usize;
    let mut buf = vec![0u8; size.max(1)];
    let mut out = Vec::with_capacity(size);
    let mut offset = 0u64;
    loop {
        let n = reader.read_content(id, &mut buf, offset)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
        offset += n as u64;
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Hot swap
// ---------------------------------------------------------------------------

/// Facade delegating every read to the active store; `swap` atomically
/// replaces the delegate and closes the previous one.
pub struct HotSwap {
    delegate: RwLock<Arc<dyn GraphReader>>,
}

impl HotSwap {
    pub fn new(delegate: Arc<dyn GraphReader>) -> Self {
        HotSwap { delegate: RwLock::new(delegate) }
    }

    /// Publish a new store. Readers holding the shared lock finish against
    /// the old delegate before it is closed.
    pub fn swap(&self, new: Arc<dyn GraphReader>) {
        let old = {
            let mut guard = self.delegate.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *guard, new)
        };
        old.close();
    }
}

impl GraphReader for HotSwap {
    fn get_node(&self, id: &str) -> Result<Arc<Node>> {
        let guard = self.delegate.read().map_err(|_| poisoned())?;
        guard.get_node(id)
    }

    fn list_children(&self, id: &str) -> Result<Vec<String>> {
        let guard = self.delegate.read().map_err(|_| poisoned())?;
        guard.list_children(id)
    }

    fn read_content(&self, id: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        let guard = self.delegate.read().map_err(|_| poisoned())?;
        guard.read_content(id, buf, offset)
    }

    fn invalidate(&self, id: &str) {
        if let Ok(guard) = self.delegate.read() {
            guard.invalidate(id);
        }
    }

    fn close(&self) {
        if let Ok(guard) = self.delegate.read() {
            guard.close();
        }
    }
}

fn poisoned() -> Error {
    Error::ResolverFailure("store lock poisoned".to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeContent;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixedReader {
        node: Arc<Node>,
        closed: Arc<AtomicBool>,
    }

    impl FixedReader {
        fn new(id: &str, content: &[u8]) -> (Self, Arc<AtomicBool>) {
            let closed = Arc::new(AtomicBool::new(false));
            let reader = FixedReader {
                node: Arc::new(Node::file(id, NodeContent::Inline(content.to_vec()))),
                closed: closed.clone(),
            };
            (reader, closed)
        }
    }

    impl GraphReader for FixedReader {
        fn get_node(&self, id: &str) -> Result<Arc<Node>> {
            if id == self.node.id {
                Ok(self.node.clone())
            } else {
                Err(Error::NotFound(id.to_string()))
            }
        }

        fn list_children(&self, _id: &str) -> Result<Vec<String>> {
            Ok(vec![self.node.id.clone()])
        }

        fn read_content(&self, id: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
            let node = self.get_node(id)?;
            let bytes = match &node.content {
                NodeContent::Inline(b) => b,
                _ => return Ok(0),
            };
            let offset = offset as usize;
            if offset >= bytes.len() {
                return Ok(0);
            }
            let n = (bytes.len() - offset).min(buf.len());
            buf[..n].copy_from_slice(&bytes[offset..offset + n]);
            Ok(n)
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_swap_replaces_and_closes_old() {
        let (old, old_closed) = FixedReader::new("a", b"old");
        let (new, new_closed) = FixedReader::new("b", b"new");
        let swap = HotSwap::new(Arc::new(old));

        assert!(swap.get_node("a").is_ok());
        swap.swap(Arc::new(new));

        assert!(old_closed.load(Ordering::SeqCst), "old delegate must be closed");
        assert!(!new_closed.load(Ordering::SeqCst));
        assert!(swap.get_node("a").unwrap_err().is_not_found());
        assert!(swap.get_node("b").is_ok());
    }

    #[test]
    fn test_read_to_vec_loops_to_eof() {
        let (reader, _) = FixedReader::new("a", b"hello world");
        let bytes = read_to_vec(&reader, "a").unwrap();
        assert_eq!(bytes, b"hello world");
    }
}
