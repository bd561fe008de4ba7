//! Reading script sources from disk.

use std::{
    borrow::Cow,
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

use crate::{
    diagnostics::{Error, IoReason, Result},
    resource::{ResourceKind, ResourceTracker, Ticket},
};

/// Handle that counts as an open file until dropped.
#[derive(Debug)]
pub struct TrackedReader<R> {
    inner: R,
    _ticket: Ticket,
}

/// The complete contents of a source, NUL-terminated, together with the
/// still-open handle it was read from. Dropping it closes the handle.
#[derive(Debug)]
pub struct SourceBuffer<R> {
    bytes: Vec<u8>,
    _reader: TrackedReader<R>,
    _ticket: Ticket,
}

impl<R> SourceBuffer<R> {
    /// The source bytes, without the trailing NUL.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.bytes.len().saturating_sub(1)]
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Source text; invalid UTF-8 sequences are replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.bytes())
    }
}

/// Opens `path` and reads it whole.
pub fn read_file(path: &Path, tracker: &ResourceTracker) -> Result<SourceBuffer<File>> {
    let name = path.display().to_string();
    let file = File::open(path).map_err(|err| {
        tracing::debug!(path = %name, error = %err, "cannot open source");
        Error::io(IoReason::Open, name.as_str())
    })?;
    read_stream(&name, file, tracker)
}

/// Reads an already-open handle from start to end. The handle is released
/// before any error is returned.
pub fn read_stream<R: Read + Seek>(
    name: &str,
    reader: R,
    tracker: &ResourceTracker,
) -> Result<SourceBuffer<R>> {
    let mut reader = TrackedReader {
        inner: reader,
        _ticket: tracker.acquire(ResourceKind::FileHandle),
    };

    reader
        .inner
        .seek(SeekFrom::End(0))
        .map_err(|_| Error::io(IoReason::Seek, name))?;
    let len = reader
        .inner
        .stream_position()
        .map_err(|_| Error::io(IoReason::Tell, name))?;
    reader
        .inner
        .seek(SeekFrom::Start(0))
        .map_err(|_| Error::io(IoReason::Seek, name))?;

    let too_large = || Error::OutOfMemory {
        path: name.to_string(),
    };
    let len = usize::try_from(len).map_err(|_| too_large())?;
    let capacity = len.checked_add(1).ok_or_else(too_large)?;
    let mut bytes = Vec::new();
    bytes.try_reserve_exact(capacity).map_err(|_| too_large())?;
    let ticket = tracker.acquire(ResourceKind::SourceBuffer);

    bytes.resize(len, 0);
    reader
        .inner
        .read_exact(&mut bytes)
        .map_err(|_| Error::io(IoReason::Read, name))?;
    bytes.push(0);

    tracing::debug!(path = name, len, "read source");
    Ok(SourceBuffer {
        bytes,
        _reader: reader,
        _ticket: ticket,
    })
}
