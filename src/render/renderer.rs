//! Audio-thread renderer.

use super::{RenderStatus, TransportState, WaveBuffer};
use crate::worker::{DecodeReply, SessionLink, SESSION_QUEUE_SIZE};
use crate::Result;
use std::sync::Arc;

/// Audio kept decoded ahead of the read cursor
pub const DEFAULT_LOOKAHEAD_MS: u32 = 2000;

/// Below this decode speed the look-ahead target is doubled
const SLOW_DECODE_RATIO: f32 = 1.5;

/// Streams one decode session to the audio output.
///
/// [`render`](Self::render) is called from the audio callback. It never
/// blocks and never allocates: blocks arrive over the session's wait-free
/// queue and are handed back to the worker for reuse once copied.
pub struct Renderer {
    status: Arc<RenderStatus>,
    buffer: WaveBuffer,
    link: SessionLink,
    in_flight: bool,
    end_of_stream: bool,
    block_frames: usize,
    lookahead_frames: usize,
    decoded_frames: u64,
    decode_secs: f64,
    /// Copied blocks the request queue had no room for
    unreturned: Vec<Vec<i16>>,
}

impl Renderer {
    /// Create a renderer for `link` covering at most `cap_frames` frames.
    ///
    /// The buffer holds the cap plus one block, so a pull is possible even
    /// for very short caps. The cap is published as the provisional total
    /// length and the first block is requested right away.
    pub fn new(status: Arc<RenderStatus>, link: SessionLink, cap_frames: u64) -> Result<Self> {
        let sample_rate = status.sample_rate() as usize;
        let capacity = (cap_frames as usize).saturating_add(sample_rate).max(1);
        let buffer = WaveBuffer::new(capacity)?;
        status.begin_session(link.session(), cap_frames);
        let mut renderer = Self {
            status,
            buffer,
            link,
            in_flight: false,
            end_of_stream: false,
            block_frames: sample_rate,
            lookahead_frames: sample_rate * DEFAULT_LOOKAHEAD_MS as usize / 1000,
            decoded_frames: 0,
            decode_secs: 0.0,
            unreturned: Vec::with_capacity(SESSION_QUEUE_SIZE),
        };
        renderer.request_more();
        Ok(renderer)
    }

    /// Shared status published by this renderer.
    pub fn status(&self) -> &Arc<RenderStatus> {
        &self.status
    }

    /// Session this renderer is bound to.
    pub fn session(&self) -> u64 {
        self.link.session()
    }

    /// Whether the worker reported the end of the stream.
    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Fill `out` with the next mono samples.
    ///
    /// Outputs silence unless the transport is playing. While playing, only
    /// real samples advance the read cursor; an underrun is padded with
    /// zeros. A renderer whose session was reset or replaced writes nothing
    /// to the status, even when the reset lands mid-callback.
    pub fn render(&mut self, out: &mut [f32]) {
        let status = Arc::clone(&self.status);
        let Some(_publish) = status.lock_session(self.link.session()) else {
            out.fill(0.0);
            return;
        };
        self.return_blocks();
        self.receive_blocks();
        self.apply_seek();

        if self.status.state() == TransportState::Playing {
            let n = self.buffer.read(out);
            let gain = self.status.effective_gain();
            if gain != 1.0 {
                for sample in &mut out[..n] {
                    *sample *= gain;
                }
            }
            out[n..].fill(0.0);

            if self.end_of_stream && self.buffer.available_read() == 0 {
                self.status
                    .transition(TransportState::Playing, TransportState::Finished);
            }
        } else {
            out.fill(0.0);
        }

        self.status
            .publish_cursors(self.buffer.read_pos(), self.buffer.write_pos());
        self.request_more();
    }

    fn return_blocks(&mut self) {
        while let Some(block) = self.unreturned.pop() {
            if let Err(block) = self.link.recycle(block) {
                self.unreturned.push(block);
                break;
            }
        }
    }

    fn recycle(&mut self, block: Vec<i16>) {
        if self.unreturned.is_empty() {
            if let Err(block) = self.link.recycle(block) {
                self.unreturned.push(block);
            }
        } else if self.unreturned.len() < self.unreturned.capacity() {
            self.unreturned.push(block);
        }
    }

    fn receive_blocks(&mut self) {
        while let Some(reply) = self.link.poll() {
            match reply {
                DecodeReply::Block {
                    session,
                    samples,
                    decode_time,
                } => {
                    if session == self.link.session() {
                        self.in_flight = false;
                        self.buffer.write_pcm(&samples);
                        self.decoded_frames += samples.len() as u64;
                        self.decode_secs += decode_time.as_secs_f64();
                        self.update_speed();
                    }
                    self.recycle(samples);
                }
                DecodeReply::End { session } => {
                    if session == self.link.session() {
                        self.in_flight = false;
                        self.end_of_stream = true;
                        self.status.set_total_frames(self.buffer.write_pos());
                    }
                }
            }
        }
    }

    fn update_speed(&mut self) {
        if self.decode_secs <= 0.0 {
            return;
        }
        let rendered_secs = self.decoded_frames as f64 / self.status.sample_rate() as f64;
        self.status
            .set_render_speed((rendered_secs / self.decode_secs) as f32);
    }

    fn apply_seek(&mut self) {
        let Some(frame) = self.status.take_seek() else {
            return;
        };
        if self.buffer.seek(frame) && self.buffer.available_read() > 0 {
            self.status
                .transition(TransportState::Finished, TransportState::Playing);
        }
    }

    fn target_lookahead(&self) -> usize {
        let speed = self.status.render_speed();
        if speed > 0.0 && speed < SLOW_DECODE_RATIO {
            self.lookahead_frames * 2
        } else {
            self.lookahead_frames
        }
    }

    fn request_more(&mut self) {
        // a block must have somewhere to go back to before the next one is asked for
        if self.in_flight || self.end_of_stream || !self.unreturned.is_empty() {
            return;
        }
        if self.buffer.available_read() >= self.target_lookahead()
            || self.buffer.free_space() < self.block_frames
        {
            return;
        }
        self.in_flight = self.link.request_block();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::RenderRequest;
    use rtrb::{Consumer, Producer};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    const RATE: u32 = 100;

    struct FakeWorker {
        requests: Consumer<RenderRequest>,
        replies: Producer<DecodeReply>,
        session: u64,
        recycled: usize,
    }

    impl FakeWorker {
        /// Drain the request queue, returning the number of pulls.
        fn pulls(&mut self) -> usize {
            let mut pulls = 0;
            while let Ok(request) = self.requests.pop() {
                match request {
                    RenderRequest::Pull { .. } => pulls += 1,
                    RenderRequest::Recycle(_) => self.recycled += 1,
                }
            }
            pulls
        }

        fn send_block(&mut self, value: i16, frames: usize) {
            self.replies
                .push(DecodeReply::Block {
                    session: self.session,
                    samples: vec![value; frames],
                    decode_time: Duration::from_millis(100),
                })
                .unwrap();
        }

        fn send_end(&mut self) {
            self.replies
                .push(DecodeReply::End {
                    session: self.session,
                })
                .unwrap();
        }
    }

    fn renderer(cap_frames: u64) -> (Renderer, FakeWorker, Arc<RenderStatus>) {
        let status = Arc::new(RenderStatus::new(RATE));
        let (link, requests, replies) = SessionLink::channel(7);
        let renderer = Renderer::new(Arc::clone(&status), link, cap_frames).unwrap();
        let worker = FakeWorker {
            requests,
            replies,
            session: 7,
            recycled: 0,
        };
        (renderer, worker, status)
    }

    #[test]
    fn test_keeps_one_pull_in_flight() {
        let (mut r, mut w, status) = renderer(1000);
        status.set_state(TransportState::Playing);
        let mut out = [0.0; 10];
        r.render(&mut out);
        r.render(&mut out);
        assert_eq!(w.pulls(), 1);

        w.send_block(100, 100);
        r.render(&mut out);
        assert_eq!(w.pulls(), 1);
        assert_eq!(status.write_frames(), 100);
    }

    #[test]
    fn test_underrun_pads_silence_without_advancing() {
        let (mut r, mut w, status) = renderer(1000);
        status.set_state(TransportState::Playing);
        w.send_block(16384, 5);

        let mut out = [9.0; 8];
        r.render(&mut out);
        assert_eq!(&out[..5], &[0.5; 5]);
        assert_eq!(&out[5..], &[0.0; 3]);
        assert_eq!(status.read_frames(), 5);
        assert_eq!(status.state(), TransportState::Playing);
    }

    #[test]
    fn test_silence_when_not_playing() {
        let (mut r, mut w, status) = renderer(1000);
        w.send_block(1000, 50);
        let mut out = [1.0; 10];
        r.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(status.read_frames(), 0);
        assert_eq!(status.write_frames(), 50);

        status.set_state(TransportState::Paused);
        r.render(&mut out);
        assert_eq!(status.read_frames(), 0);
    }

    #[test]
    fn test_finished_after_last_frame() {
        let (mut r, mut w, status) = renderer(1000);
        status.set_state(TransportState::Playing);
        assert_eq!(status.total_frames(), 1000);
        w.send_block(100, 20);
        w.send_end();

        let mut out = [0.0; 15];
        r.render(&mut out);
        assert!(r.is_end_of_stream());
        assert_eq!(status.total_frames(), 20);
        assert_eq!(status.state(), TransportState::Playing);
        r.render(&mut out);
        assert_eq!(status.state(), TransportState::Finished);
        assert_eq!(status.read_frames(), 20);
    }

    #[test]
    fn test_gain_is_applied() {
        let (mut r, mut w, status) = renderer(1000);
        status.set_state(TransportState::Playing);
        status.set_output_gain(0.5);
        status.set_master_volume(3.0);
        w.send_block(16384, 4);
        let mut out = [0.0; 4];
        r.render(&mut out);
        for sample in out {
            approx::assert_abs_diff_eq!(sample, 0.75, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_seek_within_decoded_region() {
        let (mut r, mut w, status) = renderer(1000);
        status.set_state(TransportState::Playing);
        w.send_block(100, 100);
        let mut out = [0.0; 10];
        r.render(&mut out);

        status.request_seek(500);
        r.render(&mut out);
        assert_eq!(status.read_frames(), 20);

        status.request_seek(50);
        r.render(&mut out);
        assert_eq!(status.read_frames(), 60);
    }

    #[test]
    fn test_detached_renderer_is_silent() {
        let (mut r, mut w, status) = renderer(1000);
        status.set_state(TransportState::Playing);
        w.send_block(100, 50);
        status.begin_session(8, 0);
        let mut out = [1.0; 10];
        r.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(status.write_frames(), 0);
    }

    #[test]
    fn test_stale_session_blocks_are_dropped() {
        let (mut r, mut w, status) = renderer(1000);
        status.set_state(TransportState::Playing);
        w.session = 3;
        w.send_block(100, 50);
        w.send_end();
        let mut out = [0.0; 10];
        r.render(&mut out);
        assert_eq!(status.write_frames(), 0);
        assert!(!r.is_end_of_stream());
    }

    #[test]
    fn test_render_speed_from_decode_time() {
        let (mut r, mut w, status) = renderer(1000);
        // 100 frames at 100 Hz decoded in 100 ms
        w.send_block(0, 100);
        let mut out = [0.0; 1];
        r.render(&mut out);
        approx::assert_abs_diff_eq!(status.render_speed(), 10.0, epsilon = 1e-3);
    }

    #[test]
    fn test_no_pull_when_lookahead_is_full() {
        let (mut r, mut w, status) = renderer(1000);
        status.set_state(TransportState::Paused);
        let mut out = [0.0; 1];
        r.render(&mut out);
        assert_eq!(w.pulls(), 1);
        // two seconds at 100 Hz
        w.send_block(1, 200);
        r.render(&mut out);
        r.render(&mut out);
        assert_eq!(w.pulls(), 0);
    }

    #[test]
    fn test_first_block_requested_on_creation() {
        let (_r, mut w, status) = renderer(1000);
        assert_eq!(status.state(), TransportState::Standby);
        assert_eq!(w.pulls(), 1);
    }

    #[test]
    fn test_total_is_the_cap_while_decoding() {
        let (mut r, mut w, status) = renderer(1000);
        status.set_state(TransportState::Playing);
        assert_eq!(status.total_time(), 10_000);
        assert_eq!(r.buffer.capacity(), 1000 + RATE as usize);

        w.send_block(1, 100);
        let mut out = [0.0; 10];
        r.render(&mut out);
        assert_eq!(status.total_frames(), 1000);
        assert!(status.total_frames() >= status.write_frames());
    }

    #[test]
    fn test_seek_from_finished_resumes_playing() {
        let (mut r, mut w, status) = renderer(1000);
        status.set_state(TransportState::Playing);
        w.send_block(100, 20);
        w.send_end();
        let mut out = [0.0; 20];
        r.render(&mut out);
        r.render(&mut out);
        assert_eq!(status.state(), TransportState::Finished);

        // beyond the decoded region: nothing changes
        status.request_seek(25);
        r.render(&mut out);
        assert_eq!(status.state(), TransportState::Finished);
        assert_eq!(status.read_frames(), 20);

        status.request_seek(5);
        let mut out = [0.0; 4];
        r.render(&mut out);
        assert_eq!(status.state(), TransportState::Playing);
        assert_eq!(status.read_frames(), 9);
    }

    #[test]
    fn test_reset_during_callbacks_is_not_overwritten() {
        let (mut r, mut w, status) = renderer(1000);
        status.set_state(TransportState::Playing);
        w.send_block(100, 100);

        // the output keeps calling the renderer after the stop, like a
        // device that detaches asynchronously
        let stop = Arc::new(AtomicBool::new(false));
        let audio = std::thread::spawn({
            let stop = Arc::clone(&stop);
            move || {
                let mut out = [0.0; 4];
                while !stop.load(Ordering::Relaxed) {
                    r.render(&mut out);
                }
                r
            }
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while status.read_frames() == 0 {
            assert!(Instant::now() < deadline, "renderer never published");
            std::thread::yield_now();
        }
        status.reset();
        std::thread::sleep(Duration::from_millis(5));
        stop.store(true, Ordering::Relaxed);
        let mut r = audio.join().unwrap();

        let mut out = [1.0; 4];
        r.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(status.state(), TransportState::Standby);
        assert_eq!(status.read_frames(), 0);
        assert_eq!(status.write_frames(), 0);
        assert_eq!(status.total_frames(), 0);
    }

    #[test]
    fn test_blocks_kept_while_request_queue_is_full() {
        let (mut r, mut w, status) = renderer(10_000);
        status.set_state(TransportState::Playing);
        let mut out = [0.0; 1];
        // the worker stops draining requests: eight blocks fit in the queue
        // next to their pulls, the rest wait in the renderer
        for _ in 0..12 {
            w.send_block(1, 10);
            r.render(&mut out);
        }
        assert_eq!(r.unreturned.len(), 4);

        w.pulls();
        assert_eq!(w.recycled, 8);
        r.render(&mut out);
        assert!(r.unreturned.is_empty());
        assert_eq!(w.pulls(), 1);
        assert_eq!(w.recycled, 12);
    }
}
