//! Per-open access sessions: cursor-bounded read/write/seek on one device.
//!
//! An [`AccessHandle`] holds a non-owning reference to its device plus a
//! private cursor. Handles never extend a device's lifetime: detach marks
//! the device destroyed under the device lock, and every surviving handle
//! observes `NoSuchDevice` on its next call. The cursor is only reachable
//! through `&mut self`; sharing one handle between callers is the caller's
//! responsibility, not protected here.

use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::device::VirtualDevice;
use crate::error::{Error, Result};
use crate::registry::DeviceId;

/// How the caller asked to open a device. Checked against the device's
/// declared [`Permission`](crate::device::Permission) exactly once, at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpenMode::Read => "read",
            OpenMode::Write => "write",
            OpenMode::ReadWrite => "read-write",
        };
        f.write_str(s)
    }
}

/// Reference point for [`AccessHandle::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// A per-open session against one device: device reference, open mode, and
/// the current byte offset.
pub struct AccessHandle {
    device: Arc<VirtualDevice>,
    mode: OpenMode,
    cursor: i64,
}

impl AccessHandle {
    pub(crate) fn new(device: Arc<VirtualDevice>, mode: OpenMode) -> Self {
        Self {
            device,
            mode,
            cursor: 0,
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device.id()
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Current byte offset. Always within `0..=capacity`.
    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    /// Reposition the cursor and return the new absolute position.
    ///
    /// A position equal to capacity is valid ("one past the end", so an
    /// immediately following read returns 0 bytes). Anything negative or
    /// beyond capacity fails `OutOfRange` and leaves the cursor unchanged.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<i64> {
        let _body = self.device.lock_active()?;
        let capacity = self.device.capacity();

        trace!(
            "seek requested: device={} cursor={} offset={} whence={:?}",
            self.device.id(),
            self.cursor,
            offset,
            whence
        );

        let position = match whence {
            Whence::Start => offset,
            Whence::Current => self.cursor.saturating_add(offset),
            Whence::End => (capacity as i64).saturating_add(offset),
        };

        if position < 0 || position > capacity as i64 {
            return Err(Error::OutOfRange { position, capacity });
        }

        self.cursor = position;
        trace!(
            "seek done: device={} position={}",
            self.device.id(),
            position
        );
        Ok(position)
    }

    /// Read up to `dst.len()` bytes at the cursor and advance it.
    ///
    /// The length is clamped to what is left before end-of-buffer; reading
    /// at or past capacity returns 0 bytes, which is success, not an error.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let body = self.device.lock_active()?;
        let n = body.buffer.copy_out(self.cursor as usize, dst);
        drop(body);

        self.cursor += n as i64;
        trace!(
            "read: device={} requested={} effective={} cursor={}",
            self.device.id(),
            dst.len(),
            n,
            self.cursor
        );
        Ok(n)
    }

    /// Write from `src` at the cursor, clamped to the room left, and advance
    /// the cursor by what was written.
    ///
    /// A write with no effective length (cursor at capacity, or an empty
    /// source) fails `OutOfSpace` rather than succeeding with 0 bytes.
    pub fn write(&mut self, src: &[u8]) -> Result<usize> {
        let mut body = self.device.lock_active()?;
        let n = body.buffer.copy_in(self.cursor as usize, src);
        drop(body);

        if n == 0 {
            return Err(Error::OutOfSpace);
        }

        self.cursor += n as i64;
        trace!(
            "write: device={} requested={} effective={} cursor={}",
            self.device.id(),
            src.len(),
            n,
            self.cursor
        );
        Ok(n)
    }

    /// Read up to `len` bytes into a caller-side sink.
    ///
    /// The device bytes are staged outside the device lock before the sink
    /// sees them; a sink failure maps to `CopyFault` and the cursor does not
    /// advance.
    pub fn read_to(&mut self, len: usize, dst: &mut dyn io::Write) -> Result<usize> {
        let staged = {
            let body = self.device.lock_active()?;
            let offset = self.cursor as usize;
            let effective = len.min(body.buffer.capacity().saturating_sub(offset));
            body.buffer.slice(offset, effective).to_vec()
        };

        dst.write_all(&staged).map_err(|e| {
            Error::CopyFault(format!("destination rejected {} bytes: {}", staged.len(), e))
        })?;

        self.cursor += staged.len() as i64;
        Ok(staged.len())
    }

    /// Write up to `len` bytes taken from a caller-side source.
    ///
    /// The source is drained outside the device lock; a source failure maps
    /// to `CopyFault`. As with [`write`](Self::write), an effective length
    /// of 0 fails `OutOfSpace`.
    pub fn write_from(&mut self, len: usize, src: &mut dyn io::Read) -> Result<usize> {
        self.device.lock_active().map(drop)?;
        let offset = self.cursor as usize;
        let effective = len.min(self.device.capacity().saturating_sub(offset));
        if effective == 0 {
            return Err(Error::OutOfSpace);
        }

        let mut staged = vec![0u8; effective];
        src.read_exact(&mut staged)
            .map_err(|e| Error::CopyFault(format!("source unreadable for {} bytes: {}", effective, e)))?;

        let mut body = self.device.lock_active()?;
        let n = body.buffer.copy_in(offset, &staged);
        drop(body);

        self.cursor += n as i64;
        Ok(n)
    }

    /// Close the session. Never fails; the device is unaffected.
    pub fn close(self) {
        debug!(
            "release: device={} cursor={}",
            self.device.id(),
            self.cursor
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Permission;

    fn handle(capacity: usize, mode: OpenMode) -> AccessHandle {
        let device = Arc::new(
            VirtualDevice::new(DeviceId(7), "TEST", Permission::ReadWrite, capacity).unwrap(),
        );
        device.activate();
        AccessHandle::new(device, mode)
    }

    #[test]
    fn seek_accepts_one_past_the_end() {
        let mut h = handle(64, OpenMode::Read);
        assert_eq!(h.seek(64, Whence::Start).unwrap(), 64);
        assert_eq!(h.cursor(), 64);
    }

    #[test]
    fn seek_rejects_out_of_range_and_keeps_cursor() {
        let mut h = handle(64, OpenMode::Read);
        h.seek(10, Whence::Start).unwrap();

        assert!(matches!(
            h.seek(65, Whence::Start),
            Err(Error::OutOfRange {
                position: 65,
                capacity: 64
            })
        ));
        assert!(matches!(h.seek(-1, Whence::Start), Err(Error::OutOfRange { .. })));
        assert!(matches!(h.seek(-11, Whence::Current), Err(Error::OutOfRange { .. })));
        assert!(matches!(h.seek(1, Whence::End), Err(Error::OutOfRange { .. })));
        assert_eq!(h.cursor(), 10);
    }

    #[test]
    fn seek_from_current_and_end() {
        let mut h = handle(100, OpenMode::Read);
        assert_eq!(h.seek(30, Whence::Start).unwrap(), 30);
        assert_eq!(h.seek(20, Whence::Current).unwrap(), 50);
        assert_eq!(h.seek(-50, Whence::Current).unwrap(), 0);
        assert_eq!(h.seek(-40, Whence::End).unwrap(), 60);
        assert_eq!(h.seek(0, Whence::End).unwrap(), 100);
    }

    #[test]
    fn read_at_end_returns_zero_bytes() {
        let mut h = handle(32, OpenMode::Read);
        h.seek(0, Whence::End).unwrap();

        let mut out = [0u8; 16];
        assert_eq!(h.read(&mut out).unwrap(), 0);
        assert_eq!(h.cursor(), 32);
    }

    #[test]
    fn read_clamps_to_capacity() {
        let mut h = handle(8, OpenMode::ReadWrite);
        h.write(b"abcdefgh").unwrap();
        h.seek(4, Whence::Start).unwrap();

        let mut out = [0u8; 16];
        assert_eq!(h.read(&mut out).unwrap(), 4);
        assert_eq!(&out[..4], b"efgh");
        assert_eq!(h.cursor(), 8);
    }

    #[test]
    fn write_round_trip() {
        let mut h = handle(128, OpenMode::ReadWrite);
        assert_eq!(h.write(b"pseudo device payload").unwrap(), 21);
        h.seek(0, Whence::Start).unwrap();

        let mut out = vec![0u8; 21];
        assert_eq!(h.read(&mut out).unwrap(), 21);
        assert_eq!(&out, b"pseudo device payload");
    }

    #[test]
    fn write_with_no_room_is_an_error() {
        let mut h = handle(16, OpenMode::Write);
        h.seek(0, Whence::End).unwrap();
        assert!(matches!(h.write(b"data"), Err(Error::OutOfSpace)));

        // An empty source is the same deliberate error, not a no-op success.
        let mut h = handle(16, OpenMode::Write);
        assert!(matches!(h.write(b""), Err(Error::OutOfSpace)));
    }

    #[test]
    fn write_at_last_byte_writes_exactly_one() {
        let mut h = handle(16, OpenMode::Write);
        h.seek(15, Whence::Start).unwrap();
        assert_eq!(h.write(b"xyz").unwrap(), 1);
        assert_eq!(h.cursor(), 16);
        assert!(matches!(h.write(b"more"), Err(Error::OutOfSpace)));
    }

    #[test]
    fn oversized_write_clamps_then_fills_up() {
        let mut h = handle(512, OpenMode::ReadWrite);
        let payload = vec![0xabu8; 600];
        assert_eq!(h.write(&payload).unwrap(), 512);
        assert!(matches!(h.write(&payload[..10]), Err(Error::OutOfSpace)));
    }

    #[test]
    fn read_to_maps_sink_failure_to_copy_fault() {
        struct BrokenSink;
        impl io::Write for BrokenSink {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::other("sink closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut h = handle(32, OpenMode::Read);
        assert!(matches!(
            h.read_to(8, &mut BrokenSink),
            Err(Error::CopyFault(_))
        ));
        // The failed copy must not advance the cursor.
        assert_eq!(h.cursor(), 0);
    }

    #[test]
    fn read_to_and_write_from_round_trip() {
        let mut h = handle(64, OpenMode::ReadWrite);
        let mut src = io::Cursor::new(b"boundary bytes".to_vec());
        assert_eq!(h.write_from(14, &mut src).unwrap(), 14);

        h.seek(0, Whence::Start).unwrap();
        let mut sink = Vec::new();
        assert_eq!(h.read_to(14, &mut sink).unwrap(), 14);
        assert_eq!(&sink, b"boundary bytes");
    }

    #[test]
    fn write_from_maps_source_failure_to_copy_fault() {
        struct BrokenSource;
        impl io::Read for BrokenSource {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("source gone"))
            }
        }

        let mut h = handle(32, OpenMode::Write);
        assert!(matches!(
            h.write_from(8, &mut BrokenSource),
            Err(Error::CopyFault(_))
        ));
    }

    #[test]
    fn write_from_with_no_room_is_out_of_space() {
        let mut h = handle(8, OpenMode::Write);
        h.seek(0, Whence::End).unwrap();
        let mut src = io::Cursor::new(vec![1u8; 4]);
        assert!(matches!(h.write_from(4, &mut src), Err(Error::OutOfSpace)));
    }

    #[test]
    fn handle_on_destroyed_device_errors() {
        let device =
            Arc::new(VirtualDevice::new(DeviceId(9), "SN", Permission::ReadWrite, 16).unwrap());
        device.activate();
        let mut h = AccessHandle::new(Arc::clone(&device), OpenMode::ReadWrite);
        h.write(b"live").unwrap();

        device.destroy();

        let mut out = [0u8; 4];
        assert!(matches!(h.read(&mut out), Err(Error::NoSuchDevice(_))));
        assert!(matches!(h.write(b"x"), Err(Error::NoSuchDevice(_))));
        assert!(matches!(h.seek(0, Whence::Start), Err(Error::NoSuchDevice(_))));
    }
}
