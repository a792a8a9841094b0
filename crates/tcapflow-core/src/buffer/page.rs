//! Encoded pages and shared page handles.
//!
//! A page is an immutable, checksummed encoding of one [`Container`]:
//!
//! ```text
//! ┌───────────┬──────────────┬─────────────────────┬───────────┐
//! │ magic u32 │ length u32   │ bincode payload     │ crc32 u32 │
//! └───────────┴──────────────┴─────────────────────┴───────────┘
//! ```
//!
//! Pages handed to several consumers at once are wrapped in a
//! [`SharedPage`]. The storage unpin callback runs when the last handle is
//! dropped, so a consumer that fails halfway cannot leak a pin.

use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use tcapflow_common::types::PageId;
use tcapflow_common::utils::error::{Error, Result};

use crate::execution::Container;

const PAGE_MAGIC: u32 = 0x5443_4150;
const HEADER_LEN: usize = 8;
const TRAILER_LEN: usize = 4;

/// An immutable encoded page.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    id: PageId,
    bytes: Bytes,
}

impl Page {
    /// Encodes a container into a page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if encoding fails.
    pub fn encode(id: PageId, container: &Container) -> Result<Self> {
        let payload = bincode::serde::encode_to_vec(container, bincode::config::standard())
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let len = u32::try_from(payload.len())
            .map_err(|_| Error::Serialization(format!("page payload of {} bytes", payload.len())))?;

        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
        buf.write_u32::<LittleEndian>(PAGE_MAGIC)?;
        buf.write_u32::<LittleEndian>(len)?;
        buf.extend_from_slice(&payload);
        buf.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;

        Ok(Self {
            id,
            bytes: Bytes::from(buf),
        })
    }

    /// Wraps raw bytes received from storage. Nothing is validated until
    /// [`Page::decode`].
    #[must_use]
    pub fn from_bytes(id: PageId, bytes: Bytes) -> Self {
        Self { id, bytes }
    }

    /// Decodes the page back into a container.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the framing or checksum is wrong, and
    /// [`Error::Serialization`] if the payload does not decode.
    pub fn decode(&self) -> Result<Container> {
        let mut cursor = Cursor::new(self.bytes.as_ref());
        let magic = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| self.corrupted("truncated header"))?;
        if magic != PAGE_MAGIC {
            return Err(self.corrupted("bad magic"));
        }
        let len = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| self.corrupted("truncated header"))? as usize;

        let mut payload = vec![0u8; len];
        cursor
            .read_exact(&mut payload)
            .map_err(|_| self.corrupted("truncated payload"))?;
        let checksum = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| self.corrupted("missing checksum"))?;
        if checksum != crc32fast::hash(&payload) {
            return Err(self.corrupted("checksum mismatch"));
        }

        let (container, _) =
            bincode::serde::decode_from_slice(&payload, bincode::config::standard())
                .map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(container)
    }

    /// Page identifier.
    #[must_use]
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true for a zero-length page.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Raw encoded bytes.
    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    fn corrupted(&self, what: &str) -> Error {
        Error::Corrupted(format!("{}: {what}", self.id))
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Callback run when the last handle to a pinned page goes away.
pub type UnpinFn = Box<dyn FnOnce(PageId) + Send + Sync>;

/// A page pinned in memory on behalf of one or more consumers.
pub struct PinnedPage {
    page: Page,
    on_unpin: Option<UnpinFn>,
}

impl PinnedPage {
    /// Pins `page`; `on_unpin` runs once every handle has been dropped.
    #[must_use]
    pub fn new(page: Page, on_unpin: UnpinFn) -> SharedPage {
        Arc::new(Self {
            page,
            on_unpin: Some(on_unpin),
        })
    }

    /// Wraps a page that needs no unpin notification.
    #[must_use]
    pub fn unmanaged(page: Page) -> SharedPage {
        Arc::new(Self {
            page,
            on_unpin: None,
        })
    }

    /// The pinned page.
    #[must_use]
    pub fn page(&self) -> &Page {
        &self.page
    }
}

impl Drop for PinnedPage {
    fn drop(&mut self) {
        if let Some(unpin) = self.on_unpin.take() {
            unpin(self.page.id());
        }
    }
}

impl fmt::Debug for PinnedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedPage").field("page", &self.page).finish()
    }
}

/// Shared ownership of a pinned page. Cloning a handle is a fan-out.
pub type SharedPage = Arc<PinnedPage>;
