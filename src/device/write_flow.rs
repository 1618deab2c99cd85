use log::debug;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::codec::matrix::{encode_matrix, LedMatrix};
use crate::device::constants::WRITE_RESPONSE_TIMEOUT;
use crate::device::timer::{is_current, TimerFired, TimerHandle, TimerKind, TimerScheduler};
use crate::device::types::{DeviceIdentity, WriteOptions, WriteRequest};
use crate::radio::HostRadio;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Same matrix as the one still being displayed
    Dropped,
    /// Waits for the acknowledgement of the write in flight, replacing any previously queued request
    Queued,
    Written,
}

/**
 * Serializes matrix writes for one device.
 *
 * At most one write with response is in flight at any time. Requests that arrive meanwhile are
 * coalesced: only the newest one is kept and written once the acknowledgement arrives, or once
 * the acknowledgement is considered lost after `WRITE_RESPONSE_TIMEOUT`. A write is never
 * retried.
 */
#[derive(Debug)]
pub struct WriteFlowController {
    identity: DeviceIdentity,
    characteristic: Uuid,
    brightness: f32,
    timers: TimerScheduler,

    last_written_matrix: Option<LedMatrix>,
    last_written_at: Option<Instant>,
    last_written_interval: f64,
    awaiting_response: bool,
    response_timer: Option<TimerHandle>,
    queued: Option<WriteRequest>,
}

impl WriteFlowController {
    pub fn new(identity: DeviceIdentity, characteristic: Uuid, brightness: f32, timers: TimerScheduler) -> Self {
        WriteFlowController {
            identity,
            characteristic,
            brightness,
            timers,
            last_written_matrix: None,
            last_written_at: None,
            last_written_interval: 0.0,
            awaiting_response: false,
            response_timer: None,
            queued: None,
        }
    }

    pub fn set_brightness(&mut self, brightness: f32) {
        self.brightness = brightness;
    }

    pub fn is_awaiting_response(&self) -> bool {
        self.awaiting_response
    }

    pub fn queued(&self) -> Option<&WriteRequest> {
        self.queued.as_ref()
    }

    pub fn submit<R: HostRadio + ?Sized>(&mut self, radio: &R, request: WriteRequest) -> WriteOutcome {
        if self.is_still_displayed(&request) {
            debug!("{}: matrix is still displayed, dropping write", self.identity);
            return WriteOutcome::Dropped;
        }

        if self.awaiting_response {
            if self.queued.replace(request).is_some() {
                debug!("{}: replaced queued matrix write", self.identity);
            }
            return WriteOutcome::Queued;
        }

        self.transmit(radio, request);
        WriteOutcome::Written
    }

    // Rewriting a matrix that is displayed indefinitely (interval 0), or whose display interval has
    // not elapsed yet, would only make it flicker.
    fn is_still_displayed(&self, request: &WriteRequest) -> bool {
        if request.options.contains(WriteOptions::IGNORE_DUPLICATES) {
            return false;
        }

        if self.last_written_matrix.as_ref() != Some(&request.matrix) {
            return false;
        }

        if self.last_written_interval <= 0.0 {
            return true;
        }

        match self.last_written_at {
            Some(written_at) => written_at.elapsed().as_secs_f64() < self.last_written_interval,
            None => false,
        }
    }

    fn transmit<R: HostRadio + ?Sized>(&mut self, radio: &R, request: WriteRequest) {
        let with_response = request.with_response();
        let bytes = encode_matrix(
            &request.matrix,
            self.brightness,
            request.display_interval_seconds,
            request.options.contains(WriteOptions::WITH_FADE_TRANSITION),
        );

        radio.write_value(&self.identity, self.characteristic, &bytes, with_response);

        self.last_written_matrix = Some(request.matrix);
        self.last_written_at = Some(Instant::now());
        self.last_written_interval = request.display_interval_seconds;

        if with_response {
            self.awaiting_response = true;
            self.response_timer = Some(self.timers.schedule(
                &self.identity,
                TimerKind::WriteResponse,
                Duration::from_millis(WRITE_RESPONSE_TIMEOUT),
            ));
        }
    }

    /// Returns false if no acknowledgement was expected.
    pub fn on_write_acknowledged<R: HostRadio + ?Sized>(&mut self, radio: &R) -> bool {
        if !self.awaiting_response {
            debug!("{}: ignoring unexpected matrix write response", self.identity);
            return false;
        }

        self.awaiting_response = false;
        self.response_timer = None;

        if let Some(next) = self.queued.take() {
            self.transmit(radio, next);
        }

        true
    }

    pub fn handle_timer<R: HostRadio + ?Sized>(&mut self, radio: &R, fired: &TimerFired) {
        if !is_current(&self.response_timer, fired) {
            debug!("{}: ignoring stale write response timer", self.identity);
            return;
        }

        debug!("{}: matrix write response timed out", self.identity);
        self.response_timer = None;
        self.on_write_acknowledged(radio);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use crate::device::constants::make_led_matrix_uuid;
    use crate::radio::fake::{FakeRadio, RadioCommand};

    fn controller() -> (WriteFlowController, futures::channel::mpsc::UnboundedReceiver<TimerFired>) {
        let (timers, timer_events) = TimerScheduler::new();
        let controller = WriteFlowController::new(DeviceIdentity::new("nuimo"), make_led_matrix_uuid(), 1.0, timers);
        (controller, timer_events)
    }

    fn matrix(name: &str) -> LedMatrix {
        LedMatrix::named(name).unwrap()
    }

    fn written_matrix_bytes(radio: &FakeRadio) -> Vec<Vec<u8>> {
        radio.writes().into_iter().map(|bytes| bytes[..11].to_vec()).collect()
    }

    fn leds(name: &str) -> Vec<u8> {
        encode_matrix(&matrix(name), 1.0, 0.0, false)[..11].to_vec()
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_within_interval_is_dropped() {
        let radio = FakeRadio::default();
        let (mut controller, _timer_events) = controller();
        let request = WriteRequest::new(matrix("play"), 2.0).with_options(WriteOptions::WITHOUT_WRITE_RESPONSE);

        assert_eq!(controller.submit(&radio, request.clone()), WriteOutcome::Written);
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(controller.submit(&radio, request.clone()), WriteOutcome::Dropped);
        assert_eq!(radio.writes().len(), 1);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(controller.submit(&radio, request), WriteOutcome::Written);
        assert_eq!(radio.writes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_with_response_is_dropped() {
        let radio = FakeRadio::default();
        let (mut controller, _timer_events) = controller();

        controller.submit(&radio, WriteRequest::new(matrix("play"), 2.0));
        controller.submit(&radio, WriteRequest::new(matrix("play"), 2.0));
        controller.on_write_acknowledged(&radio);

        assert_eq!(radio.writes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_indefinitely_displayed_matrix_is_never_rewritten() {
        let radio = FakeRadio::default();
        let (mut controller, _timer_events) = controller();
        let request = WriteRequest::new(matrix("pause"), 0.0).with_options(WriteOptions::WITHOUT_WRITE_RESPONSE);

        controller.submit(&radio, request.clone());
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(controller.submit(&radio, request), WriteOutcome::Dropped);
        assert_eq!(radio.writes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignore_duplicates_option_rewrites() {
        let radio = FakeRadio::default();
        let (mut controller, _timer_events) = controller();
        let options = WriteOptions::IGNORE_DUPLICATES | WriteOptions::WITHOUT_WRITE_RESPONSE;
        let request = WriteRequest::new(matrix("play"), 2.0).with_options(options);

        controller.submit(&radio, request.clone());
        assert_eq!(controller.submit(&radio, request), WriteOutcome::Written);
        assert_eq!(radio.writes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_wait_for_acknowledgement_and_newest_wins() {
        let radio = FakeRadio::default();
        let (mut controller, _timer_events) = controller();

        assert_eq!(controller.submit(&radio, WriteRequest::new(matrix("play"), 2.0)), WriteOutcome::Written);
        assert_eq!(controller.submit(&radio, WriteRequest::new(matrix("pause"), 2.0)), WriteOutcome::Queued);
        assert_eq!(controller.submit(&radio, WriteRequest::new(matrix("next"), 2.0)), WriteOutcome::Queued);
        assert_eq!(radio.writes().len(), 1);
        assert!(controller.is_awaiting_response());

        assert!(controller.on_write_acknowledged(&radio));
        assert!(controller.on_write_acknowledged(&radio));
        assert!(!controller.on_write_acknowledged(&radio));

        assert_eq!(written_matrix_bytes(&radio), vec![leds("play"), leds("next")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_timeout_unblocks_queue() {
        let radio = FakeRadio::default();
        let (mut controller, mut timer_events) = controller();

        controller.submit(&radio, WriteRequest::new(matrix("play"), 2.0));
        controller.submit(&radio, WriteRequest::new(matrix("pause"), 2.0));

        let fired = timer_events.next().await.unwrap();
        assert_eq!(fired.kind, TimerKind::WriteResponse);
        controller.handle_timer(&radio, &fired);

        assert_eq!(written_matrix_bytes(&radio), vec![leds("play"), leds("pause")]);
        assert!(controller.is_awaiting_response());

        // the timer of the first write must not acknowledge the second one
        controller.handle_timer(&radio, &fired);
        assert!(controller.is_awaiting_response());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_write_cancels_timer() {
        let radio = FakeRadio::default();
        let (mut controller, mut timer_events) = controller();

        controller.submit(&radio, WriteRequest::new(matrix("play"), 2.0));
        controller.on_write_acknowledged(&radio);
        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(timer_events.try_next().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_payload() {
        let radio = FakeRadio::default();
        let (mut controller, _timer_events) = controller();
        controller.set_brightness(0.5);

        let options = WriteOptions::WITH_FADE_TRANSITION | WriteOptions::WITHOUT_WRITE_RESPONSE;
        controller.submit(&radio, WriteRequest::new(LedMatrix::empty(), 1.5).with_options(options));

        assert_eq!(
            radio.commands(),
            vec![RadioCommand::Write {
                id: DeviceIdentity::new("nuimo"),
                characteristic: make_led_matrix_uuid(),
                value: vec![0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0b0001_0000, 128, 15],
                with_response: false,
            }]
        );
        assert!(!controller.is_awaiting_response());
    }
}
