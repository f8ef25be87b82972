//! Scatter-gather byte buffer.
//!
//! An [`Ioda`] is an ordered list of [`Bytes`] regions plus a cached total
//! length. Every read and write in the engine goes through one: socket reads
//! scatter into freshly allocated pages, the wire codec splits message bodies
//! out of the input without copying, and writes gather all regions into one
//! vectored call.

use std::collections::VecDeque;
use std::io::{self, IoSlice, IoSliceMut};

use bytes::{Buf, Bytes, BytesMut};

/// Size of a region allocated for a scatter read.
pub const PAGE_SIZE: usize = 4096;

/// Upper bound on regions handed to one vectored read or write.
pub const MAX_REGIONS: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct Ioda {
    regions: VecDeque<Bytes>,
    len: usize,
}

impl Ioda {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of bytes across all regions.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of regions currently held.
    pub fn regions(&self) -> usize {
        self.regions.len()
    }

    /// Appends a region. Empty regions are dropped.
    pub fn append(&mut self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return;
        }
        self.len += bytes.len();
        self.regions.push_back(bytes);
    }

    /// Moves every region of `other` to the end of this buffer.
    pub fn append_ioda(&mut self, mut other: Ioda) {
        self.len += other.len;
        self.regions.append(&mut other.regions);
    }

    /// Drops `n` bytes from the front. Discarding more than `len()` empties
    /// the buffer.
    pub fn discard(&mut self, mut n: usize) {
        while n > 0 {
            let Some(front) = self.regions.front_mut() else {
                break;
            };
            if n < front.len() {
                front.advance(n);
                self.len -= n;
                return;
            }
            n -= front.len();
            self.len -= front.len();
            self.regions.pop_front();
        }
    }

    /// Removes the leading `n` bytes and returns them as a new buffer.
    pub fn split(&mut self, n: usize) -> Ioda {
        let mut head = Ioda::new();
        let mut n = n.min(self.len);
        while n > 0 {
            let Some(front) = self.regions.front_mut() else {
                break;
            };
            if n < front.len() {
                let part = front.split_to(n);
                self.len -= n;
                head.append(part);
                break;
            }
            let region = self.regions.pop_front().unwrap_or_default();
            n -= region.len();
            self.len -= region.len();
            head.append(region);
        }
        head
    }

    /// First byte of the buffer, if any.
    pub fn first(&self) -> Option<u8> {
        self.regions.front().and_then(|r| r.first().copied())
    }

    /// Contiguous copy of the leading `n` bytes (fewer if the buffer is
    /// shorter). Zero-copy when the bytes sit in the first region.
    pub fn peek(&self, n: usize) -> Bytes {
        let n = n.min(self.len);
        match self.regions.front() {
            Some(front) if front.len() >= n => front.slice(..n),
            _ => {
                let mut buf = BytesMut::with_capacity(n);
                for region in &self.regions {
                    let want = n - buf.len();
                    if want == 0 {
                        break;
                    }
                    buf.extend_from_slice(&region[..want.min(region.len())]);
                }
                buf.freeze()
            }
        }
    }

    /// Joins every region into one buffer.
    pub fn to_contiguous(&self) -> Bytes {
        self.peek(self.len)
    }

    /// Gather list for a single vectored write, at most [`MAX_REGIONS`] long.
    pub fn io_slices(&self) -> Vec<IoSlice<'_>> {
        self.regions
            .iter()
            .take(MAX_REGIONS)
            .map(|r| IoSlice::new(r))
            .collect()
    }

    /// Performs one scatter read of up to `size` bytes into page-sized
    /// regions and appends whatever was read.
    ///
    /// `read` receives the scatter list and returns the byte count, exactly
    /// like `readv(2)`. Pages past the returned count are released.
    pub fn read_with<F>(&mut self, size: usize, read: F) -> io::Result<usize>
    where
        F: FnOnce(&mut [IoSliceMut<'_>]) -> io::Result<usize>,
    {
        let size = size.clamp(1, PAGE_SIZE * MAX_REGIONS);
        let mut pages: Vec<Vec<u8>> = (0..size.div_ceil(PAGE_SIZE))
            .map(|i| vec![0u8; (size - i * PAGE_SIZE).min(PAGE_SIZE)])
            .collect();

        let n = {
            let mut slices: Vec<IoSliceMut<'_>> =
                pages.iter_mut().map(|p| IoSliceMut::new(p)).collect();
            read(&mut slices)?
        };

        let mut left = n;
        for mut page in pages {
            if left == 0 {
                break;
            }
            let take = left.min(page.len());
            page.truncate(take);
            left -= take;
            self.append(page);
        }
        Ok(n)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.regions.iter()
    }

    pub fn clear(&mut self) {
        self.regions.clear();
        self.len = 0;
    }
}

impl From<Bytes> for Ioda {
    fn from(bytes: Bytes) -> Self {
        let mut ioda = Ioda::new();
        ioda.append(bytes);
        ioda
    }
}

impl From<Vec<u8>> for Ioda {
    fn from(bytes: Vec<u8>) -> Self {
        Ioda::from(Bytes::from(bytes))
    }
}

impl From<&'static str> for Ioda {
    fn from(s: &'static str) -> Self {
        Ioda::from(Bytes::from_static(s.as_bytes()))
    }
}

impl PartialEq for Ioda {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.to_contiguous() == other.to_contiguous()
    }
}

impl Eq for Ioda {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Ioda {
        let mut ioda = Ioda::new();
        ioda.append(&b"hello "[..]);
        ioda.append(&b"scatter "[..]);
        ioda.append(&b"world"[..]);
        ioda
    }

    #[test]
    fn length_tracks_appends() {
        let mut a = sample();
        let b = sample();
        let expected = a.len() + b.len();
        a.append_ioda(b);
        assert_eq!(a.len(), expected);
        assert_eq!(a.regions(), 6);
    }

    #[test]
    fn discard_matches_slicing() {
        let whole = sample().to_contiguous();
        for n in 0..=whole.len() + 2 {
            let mut ioda = sample();
            ioda.discard(n);
            let expected = &whole[n.min(whole.len())..];
            assert_eq!(&ioda.to_contiguous()[..], expected, "discard {n}");
            assert_eq!(ioda.len(), expected.len());
        }
    }

    #[test]
    fn split_leading_bytes() {
        let mut ioda = sample();
        let head = ioda.split(8);
        assert_eq!(&head.to_contiguous()[..], b"hello sc");
        assert_eq!(&ioda.to_contiguous()[..], b"atter world");
        assert_eq!(head.len() + ioda.len(), 19);
    }

    #[test]
    fn empty_regions_ignored() {
        let mut ioda = Ioda::new();
        ioda.append(Bytes::new());
        assert!(ioda.is_empty());
        assert_eq!(ioda.regions(), 0);
        assert_eq!(ioda.first(), None);
    }

    #[test]
    fn scatter_read_keeps_only_read_bytes() {
        let mut ioda = Ioda::new();
        let data = vec![7u8; PAGE_SIZE + 10];
        let n = ioda
            .read_with(3 * PAGE_SIZE, |bufs| {
                assert_eq!(bufs.len(), 3);
                let mut copied = 0;
                for buf in bufs.iter_mut() {
                    let take = (data.len() - copied).min(buf.len());
                    buf[..take].copy_from_slice(&data[copied..copied + take]);
                    copied += take;
                }
                Ok(copied)
            })
            .unwrap();
        assert_eq!(n, PAGE_SIZE + 10);
        assert_eq!(ioda.len(), n);
        assert_eq!(ioda.regions(), 2);
    }

    #[test]
    fn gather_list_is_bounded() {
        let mut ioda = Ioda::new();
        for _ in 0..MAX_REGIONS + 5 {
            ioda.append(&b"x"[..]);
        }
        assert_eq!(ioda.io_slices().len(), MAX_REGIONS);
    }
}
