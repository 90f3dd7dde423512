use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use crate::error::{Result, ShmError};
use crate::layout::{FrameLayout, RawHeader, BYTES_PER_PIXEL};
use crate::region::{require_len, SharedRegion};

/// A frame channel over one shared region.
///
/// The channel only validates and hands out endpoints; each side of the
/// process boundary builds its own channel over its own mapping and takes
/// the endpoint it plays.
pub struct FrameChannel<R> {
    region: Arc<R>,
    layout: FrameLayout,
}

impl<R: SharedRegion> FrameChannel<R> {
    /// Wrap `region`, which must hold the header and both buffers of `layout`.
    pub fn new(region: R, layout: FrameLayout) -> Result<Self> {
        require_len(&region, layout.region_size())?;
        Ok(Self {
            region: Arc::new(region),
            layout,
        })
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn region(&self) -> &R {
        &self.region
    }

    pub fn producer(&self) -> FrameProducer<R> {
        FrameProducer {
            region: Arc::clone(&self.region),
            layout: self.layout,
        }
    }

    pub fn consumer(&self) -> FrameConsumer<R> {
        FrameConsumer {
            region: Arc::clone(&self.region),
            layout: self.layout,
            last_seq: 0,
            consecutive_rejections: 0,
        }
    }
}

fn header<R: SharedRegion>(region: &R) -> &RawHeader {
    // SAFETY: the region is at least HEADER_SIZE bytes (checked in
    // FrameChannel::new), 4-byte aligned, and every header field is atomic.
    unsafe { &*region.as_ptr().cast::<RawHeader>() }
}

/// Writing end. Exactly one producer may exist per region.
pub struct FrameProducer<R> {
    region: Arc<R>,
    layout: FrameLayout,
}

impl<R: SharedRegion> FrameProducer<R> {
    /// Publish a `width × height` BGRA frame.
    ///
    /// `pixels` is tightly packed with a stride of `width × 4`. Frames larger
    /// than the layout are cropped to the maximum dimensions. Returns the new
    /// sequence number.
    pub fn publish(&mut self, width: u32, height: u32, pixels: &[u8]) -> Result<u32> {
        let src_stride = width as usize * BYTES_PER_PIXEL;
        let needed = src_stride * height as usize;
        if pixels.len() < needed {
            return Err(ShmError::ShortPixels {
                len: pixels.len(),
                needed,
            });
        }

        let width = width.min(self.layout.max_width());
        let height = height.min(self.layout.max_height());
        let header = header(&*self.region);

        let write = 1 - header.active_buffer.load(Ordering::Acquire).min(1);
        let dst_stride = width as usize * BYTES_PER_PIXEL;
        let base = self.layout.buffer_offset(write);
        for row in 0..height as usize {
            let src = &pixels[row * src_stride..row * src_stride + dst_stride];
            // SAFETY: row < max_height and dst_stride <= max_width * 4, so the
            // destination stays inside buffer `write`.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    src.as_ptr(),
                    self.region.as_ptr().add(base + row * dst_stride),
                    dst_stride,
                );
            }
        }

        header.width.store(width, Ordering::Relaxed);
        header.height.store(height, Ordering::Relaxed);
        header.active_buffer.store(write, Ordering::Release);
        let seq = header
            .writer_seq
            .fetch_add(1, Ordering::Release)
            .wrapping_add(1);
        Ok(seq)
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }
}

/// A frame copied out of the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seq: u32,
    pub width: u32,
    pub height: u32,
    /// Tightly packed BGRA, `width × height × 4` bytes.
    pub pixels: Vec<u8>,
}

/// Why a changed sequence number did not produce a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Width or height was zero or above the layout maximum.
    Dimensions { width: u32, height: u32 },
    /// `active_buffer` was neither 0 nor 1.
    ActiveBuffer(u32),
    /// The producer published again while the frame was being copied.
    Overrun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePoll {
    NoNewFrame,
    Frame(Frame),
    Rejected(RejectReason),
}

/// Reading end. Exactly one consumer may exist per region.
pub struct FrameConsumer<R> {
    region: Arc<R>,
    layout: FrameLayout,
    last_seq: u32,
    consecutive_rejections: u32,
}

impl<R: SharedRegion> FrameConsumer<R> {
    /// Copy out the newest frame if the producer published since the last
    /// accepted one. Never blocks.
    ///
    /// A rejected poll leaves the last-seen sequence untouched, so the next
    /// poll re-examines the header.
    pub fn poll(&mut self) -> FramePoll {
        let header = header(&*self.region);

        let seq = header.writer_seq.load(Ordering::Acquire);
        if seq == self.last_seq {
            return FramePoll::NoNewFrame;
        }

        let width = header.width.load(Ordering::Acquire);
        let height = header.height.load(Ordering::Acquire);
        let active = header.active_buffer.load(Ordering::Acquire);

        if !self.layout.fits(width, height) {
            return self.reject(RejectReason::Dimensions { width, height });
        }
        if active > 1 {
            return self.reject(RejectReason::ActiveBuffer(active));
        }

        let len = width as usize * height as usize * BYTES_PER_PIXEL;
        let mut pixels = vec![0u8; len];
        // SAFETY: the dimensions were checked against the layout, so the
        // source range lies inside buffer `active`.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.region.as_ptr().add(self.layout.buffer_offset(active)),
                pixels.as_mut_ptr(),
                len,
            );
        }

        fence(Ordering::Acquire);
        let moved = header.writer_seq.load(Ordering::Relaxed) != seq
            || header.width.load(Ordering::Relaxed) != width
            || header.height.load(Ordering::Relaxed) != height
            || header.active_buffer.load(Ordering::Relaxed) != active;
        if moved {
            return self.reject(RejectReason::Overrun);
        }

        self.last_seq = seq;
        self.consecutive_rejections = 0;
        FramePoll::Frame(Frame {
            seq,
            width,
            height,
            pixels,
        })
    }

    fn reject(&mut self, reason: RejectReason) -> FramePoll {
        self.consecutive_rejections = self.consecutive_rejections.saturating_add(1);
        tracing::trace!(?reason, count = self.consecutive_rejections, "frame rejected");
        FramePoll::Rejected(reason)
    }

    /// Rejections since the last accepted frame.
    pub fn consecutive_rejections(&self) -> u32 {
        self.consecutive_rejections
    }

    /// Sequence number of the last accepted frame (0 before any).
    pub fn last_seq(&self) -> u32 {
        self.last_seq
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::HeapRegion;

    fn channel(w: u32, h: u32) -> FrameChannel<HeapRegion> {
        let layout = FrameLayout::new(w, h).unwrap();
        FrameChannel::new(HeapRegion::new(layout.region_size()), layout).unwrap()
    }

    fn solid(w: u32, h: u32, bgra: [u8; 4]) -> Vec<u8> {
        bgra.repeat((w * h) as usize)
    }

    fn header_of(chan: &FrameChannel<HeapRegion>) -> &RawHeader {
        header(chan.region())
    }

    #[test]
    fn fresh_channel_has_no_frame() {
        let chan = channel(8, 8);
        assert_eq!(chan.consumer().poll(), FramePoll::NoNewFrame);
    }

    #[test]
    fn region_must_fit_layout() {
        let layout = FrameLayout::new(8, 8).unwrap();
        let err = FrameChannel::new(HeapRegion::new(64), layout).err().unwrap();
        assert!(matches!(err, ShmError::RegionTooSmall { .. }));
    }

    #[test]
    fn publish_then_poll_returns_exact_pixels() {
        let chan = channel(16, 16);
        let mut producer = chan.producer();
        let mut consumer = chan.consumer();

        let red = solid(4, 2, [0, 0, 255, 255]);
        assert_eq!(producer.publish(4, 2, &red).unwrap(), 1);

        match consumer.poll() {
            FramePoll::Frame(frame) => {
                assert_eq!((frame.seq, frame.width, frame.height), (1, 4, 2));
                assert_eq!(frame.pixels, red);
            }
            other => panic!("expected frame, got {other:?}"),
        }
        assert_eq!(consumer.poll(), FramePoll::NoNewFrame);
    }

    #[test]
    fn buffers_alternate() {
        let chan = channel(4, 4);
        let mut producer = chan.producer();
        let header = header_of(&chan);

        producer.publish(1, 1, &[1, 2, 3, 4]).unwrap();
        assert_eq!(header.active_buffer.load(Ordering::SeqCst), 1);
        producer.publish(1, 1, &[5, 6, 7, 8]).unwrap();
        assert_eq!(header.active_buffer.load(Ordering::SeqCst), 0);
        assert_eq!(header.writer_seq.load(Ordering::SeqCst), 2);
        assert_eq!(header.reader_seq.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn consumer_sees_only_latest_of_several() {
        let chan = channel(4, 4);
        let mut producer = chan.producer();
        let mut consumer = chan.consumer();

        for value in 1..=3u8 {
            producer.publish(1, 1, &[value; 4]).unwrap();
        }
        match consumer.poll() {
            FramePoll::Frame(frame) => {
                assert_eq!(frame.seq, 3);
                assert_eq!(frame.pixels, vec![3; 4]);
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn oversized_frame_is_cropped_with_source_stride() {
        let chan = channel(2, 2);
        let mut producer = chan.producer();
        let mut consumer = chan.consumer();

        // 3x3 frame whose pixel value is its column index.
        let pixels: Vec<u8> = (0..3)
            .flat_map(|_row| (0..3u8).flat_map(|col| [col; 4]))
            .collect();
        producer.publish(3, 3, &pixels).unwrap();

        let FramePoll::Frame(frame) = consumer.poll() else {
            panic!("expected frame");
        };
        assert_eq!((frame.width, frame.height), (2, 2));
        let expected: Vec<u8> = (0..2)
            .flat_map(|_row| (0..2u8).flat_map(|col| [col; 4]))
            .collect();
        assert_eq!(frame.pixels, expected);
    }

    #[test]
    fn short_pixels_are_refused() {
        let chan = channel(4, 4);
        let err = chan.producer().publish(2, 2, &[0; 15]).unwrap_err();
        assert!(matches!(
            err,
            ShmError::ShortPixels {
                len: 15,
                needed: 16
            }
        ));
        assert_eq!(header_of(&chan).writer_seq.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn bogus_header_is_rejected_without_advancing() {
        let chan = channel(8, 8);
        let mut consumer = chan.consumer();
        let header = header_of(&chan);

        header.width.store(9, Ordering::SeqCst);
        header.height.store(1, Ordering::SeqCst);
        header.writer_seq.store(1, Ordering::SeqCst);
        assert_eq!(
            consumer.poll(),
            FramePoll::Rejected(RejectReason::Dimensions {
                width: 9,
                height: 1
            })
        );
        assert_eq!(consumer.last_seq(), 0);

        header.width.store(2, Ordering::SeqCst);
        header.active_buffer.store(7, Ordering::SeqCst);
        assert_eq!(
            consumer.poll(),
            FramePoll::Rejected(RejectReason::ActiveBuffer(7))
        );
        assert_eq!(consumer.consecutive_rejections(), 2);

        header.active_buffer.store(0, Ordering::SeqCst);
        assert!(matches!(consumer.poll(), FramePoll::Frame(_)));
        assert_eq!(consumer.consecutive_rejections(), 0);
        assert_eq!(consumer.last_seq(), 1);
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let chan = channel(8, 8);
        let mut consumer = chan.consumer();
        let header = header_of(&chan);
        header.writer_seq.store(5, Ordering::SeqCst);
        assert!(matches!(
            consumer.poll(),
            FramePoll::Rejected(RejectReason::Dimensions { width: 0, .. })
        ));
    }

    #[test]
    fn concurrent_producer_never_yields_mixed_frames() {
        let chan = channel(32, 32);
        let mut producer = chan.producer();
        let mut consumer = chan.consumer();

        let writer = std::thread::spawn(move || {
            for n in 0..2_000u32 {
                let value = (n % 251) as u8;
                producer.publish(32, 32, &[value; 32 * 32 * 4]).unwrap();
            }
        });

        let mut frames = 0;
        while !writer.is_finished() || frames == 0 {
            if let FramePoll::Frame(frame) = consumer.poll() {
                let first = frame.pixels[0];
                assert!(frame.pixels.iter().all(|b| *b == first));
                frames += 1;
            }
        }
        writer.join().unwrap();
        assert!(frames > 0);
    }

    #[test]
    fn resizing_frames_stay_consistent_with_their_dimensions() {
        let chan = channel(32, 32);
        let mut producer = chan.producer();
        let mut consumer = chan.consumer();
        let pattern = |w: u32, h: u32| (w * 31 + h) as u8;

        let writer = std::thread::spawn(move || {
            for n in 0..2_000u32 {
                let (w, h) = (8 + n % 25, 8 + (n / 3) % 25);
                let pixels = vec![pattern(w, h); (w * h * 4) as usize];
                producer.publish(w, h, &pixels).unwrap();
            }
        });

        let mut last_seq = 0;
        while !writer.is_finished() || last_seq == 0 {
            if let FramePoll::Frame(frame) = consumer.poll() {
                assert!(frame.seq > last_seq);
                last_seq = frame.seq;
                assert_eq!(frame.pixels.len(), (frame.width * frame.height * 4) as usize);
                let expected = pattern(frame.width, frame.height);
                assert!(frame.pixels.iter().all(|b| *b == expected));
            }
        }
        writer.join().unwrap();
    }
}
