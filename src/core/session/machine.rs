//! Per-connection voice-turn state machine.
//!
//! [`Session`] is sans-IO: every input (client message, upstream event, timer
//! tick) is a method call that takes the current instant and returns the
//! [`SessionAction`]s the bridge must perform, in order. The bridge owns the
//! sockets and the clock; the session owns every decision.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::commit::CommitPolicy;
use super::state::SessionState;
use crate::core::audio::gate::DEFAULT_ENERGY_FFT_SIZE;
use crate::core::audio::{
    BYTES_PER_MS, DEFAULT_SILENCE_THRESHOLD, DetectorOutcome, EnergyMeter, InterruptionConfig,
    InterruptionDetector, VoiceActivityGate, pcm,
};
use crate::core::realtime::{Modality, ResponseRequest, UpstreamEvent};
use crate::errors::RelayError;

/// Default time spent in `interrupted` before listening again.
pub const DEFAULT_RECOVERY_MS: u64 = 500;

/// Default amount of barge-in audio held while an interruption is confirmed.
pub const DEFAULT_PREROLL_MS: u64 = 2000;

/// Cancelled response ids remembered for discarding late deltas.
const CANCELLED_HISTORY: usize = 8;

/// Tuning shared by every session of a relay.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPolicy {
    pub commit_policy: CommitPolicy,
    pub silence_threshold: f32,
    pub interruption: InterruptionConfig,
    pub recovery_ms: u64,
    pub preroll_ms: u64,
    /// Sent with every bridge-initiated `response.create`
    pub instructions: Option<String>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            commit_policy: CommitPolicy::default(),
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            interruption: InterruptionConfig::default(),
            recovery_ms: DEFAULT_RECOVERY_MS,
            preroll_ms: DEFAULT_PREROLL_MS,
            instructions: None,
        }
    }
}

impl SessionPolicy {
    pub fn recovery(&self) -> Duration {
        Duration::from_millis(self.recovery_ms)
    }
}

/// Command for the upstream link.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamCommand {
    AppendAudio(Bytes),
    Commit,
    ClearInput,
    SendText(String),
    CreateResponse(ResponseRequest),
    CancelResponse,
}

/// Event for the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientNotice {
    Connected,
    Disconnected,
    Interrupted,
    TextDelta {
        response_id: String,
        item_id: String,
        delta: String,
    },
    TextDone {
        response_id: String,
        item_id: String,
        text: String,
    },
    AudioDelta {
        response_id: String,
        item_id: String,
        pcm: Bytes,
    },
    AudioDone {
        response_id: String,
        item_id: String,
    },
    ResponseDone {
        response_id: String,
        status: String,
    },
    Transcript {
        item_id: String,
        transcript: String,
    },
    Error(RelayError),
}

/// Side effect requested by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Create and connect a new upstream link
    OpenUpstream,
    /// Close the current upstream link, if any
    CloseUpstream,
    Upstream(UpstreamCommand),
    Notify(ClientNotice),
}

/// What happened to one input audio frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Appended to the upstream input buffer
    Forwarded,
    /// Held back while an interruption is being confirmed
    Held,
    /// Dropped because a response is in flight
    Suppressed,
    /// Dropped by the voice activity gate
    Silent,
    /// Dropped because no link is ready
    Ignored,
}

/// One client's voice session.
#[derive(Debug)]
pub struct Session {
    id: String,
    state: SessionState,
    policy: SessionPolicy,
    supports_text_input: bool,

    link_open: bool,
    link_pending: bool,

    pending_audio_bytes: usize,
    last_audio_at: Option<Instant>,

    generation_in_flight: bool,
    active_response: Option<String>,
    cancelled_responses: VecDeque<String>,
    /// Cancelled requests whose `response.created` has not arrived yet
    unclaimed_cancels: usize,

    interrupt_armed: bool,
    last_interruption_at: Option<Instant>,
    recovery_deadline: Option<Instant>,

    gate: VoiceActivityGate,
    meter: EnergyMeter,
    detector: InterruptionDetector,
    preroll: VecDeque<Bytes>,
    preroll_bytes: usize,
    scratch: Vec<f32>,
}

impl Session {
    pub fn new(id: impl Into<String>, policy: SessionPolicy) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Idle,
            gate: VoiceActivityGate::new(policy.silence_threshold),
            // The detector needs the instantaneous level, not a smoothed one.
            meter: EnergyMeter::new(DEFAULT_ENERGY_FFT_SIZE, 0.0),
            detector: InterruptionDetector::new(policy.interruption),
            policy,
            supports_text_input: true,
            link_open: false,
            link_pending: false,
            pending_audio_bytes: 0,
            last_audio_at: None,
            generation_in_flight: false,
            active_response: None,
            cancelled_responses: VecDeque::with_capacity(CANCELLED_HISTORY),
            unclaimed_cancels: 0,
            interrupt_armed: true,
            last_interruption_at: None,
            recovery_deadline: None,
            preroll: VecDeque::new(),
            preroll_bytes: 0,
            scratch: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn is_link_open(&self) -> bool {
        self.link_open
    }

    pub fn supports_text_input(&self) -> bool {
        self.supports_text_input
    }

    pub fn pending_audio_bytes(&self) -> usize {
        self.pending_audio_bytes
    }

    pub fn last_audio_at(&self) -> Option<Instant> {
        self.last_audio_at
    }

    pub fn generation_in_flight(&self) -> bool {
        self.generation_in_flight
    }

    pub fn active_response(&self) -> Option<&str> {
        self.active_response.as_deref()
    }

    pub fn interrupt_armed(&self) -> bool {
        self.interrupt_armed
    }

    pub fn last_interruption_at(&self) -> Option<Instant> {
        self.last_interruption_at
    }

    // -------------------------------------------------------------------------
    // Link lifecycle
    // -------------------------------------------------------------------------

    /// Client asked for an upstream link. An existing link is replaced.
    pub fn on_connect(&mut self, supports_text_input: bool) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.link_open || self.link_pending {
            info!(session_id = %self.id, "Replacing existing upstream link");
            actions.push(SessionAction::CloseUpstream);
            self.reset_turn();
        }

        self.supports_text_input = supports_text_input;
        self.link_open = false;
        self.link_pending = true;
        self.state = SessionState::Idle;
        actions.push(SessionAction::OpenUpstream);
        actions
    }

    /// The link is connected and its session configuration is on the wire.
    pub fn on_upstream_ready(&mut self) -> Vec<SessionAction> {
        if !self.link_pending {
            return Vec::new();
        }
        self.link_pending = false;
        self.link_open = true;
        self.state = SessionState::Listening;
        info!(session_id = %self.id, "Upstream link ready, listening");
        vec![SessionAction::Notify(ClientNotice::Connected)]
    }

    /// Opening the link failed.
    pub fn on_upstream_failed(&mut self, message: impl Into<String>) -> Vec<SessionAction> {
        self.link_pending = false;
        self.link_open = false;
        self.state = SessionState::Idle;
        self.reset_turn();
        vec![SessionAction::Notify(ClientNotice::Error(
            RelayError::UpstreamConnection(message.into()),
        ))]
    }

    /// Client asked to drop the upstream link.
    pub fn on_disconnect(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.link_open || self.link_pending {
            actions.push(SessionAction::CloseUpstream);
        }
        self.link_open = false;
        self.link_pending = false;
        self.state = SessionState::Disconnected;
        self.reset_turn();
        actions.push(SessionAction::Notify(ClientNotice::Disconnected));
        actions
    }

    /// The link closed without being asked to.
    pub fn on_upstream_closed(&mut self, reason: Option<String>) -> Vec<SessionAction> {
        if !self.link_open {
            return Vec::new();
        }
        warn!(session_id = %self.id, ?reason, "Upstream link closed unexpectedly");
        self.link_open = false;
        self.state = SessionState::Disconnected;
        self.reset_turn();

        let message = reason
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "upstream link closed".to_string());
        vec![
            SessionAction::CloseUpstream,
            SessionAction::Notify(ClientNotice::Error(RelayError::UpstreamConnection(message))),
            SessionAction::Notify(ClientNotice::Disconnected),
        ]
    }

    // -------------------------------------------------------------------------
    // Client input
    // -------------------------------------------------------------------------

    /// One microphone frame of PCM16 audio.
    pub fn on_audio(&mut self, frame: Bytes, now: Instant) -> (FrameDisposition, Vec<SessionAction>) {
        let frame = frame.slice(..pcm::truncate_to_even(&frame).len());
        if frame.is_empty() || !self.link_open {
            return (FrameDisposition::Ignored, Vec::new());
        }

        let significant = self.gate.has_significant_pcm(&frame);

        if self.state == SessionState::Speaking && self.interrupt_armed {
            let level = self.meter.level_pcm(&frame, &mut self.scratch);
            match self.detector.observe(level, true, now) {
                DetectorOutcome::Fired => {
                    if significant {
                        self.hold(frame);
                    }
                    let forwarded = !self.preroll.is_empty();
                    let mut actions = self.interrupt(now);
                    self.flush_preroll(now, &mut actions);
                    let disposition = if forwarded {
                        FrameDisposition::Forwarded
                    } else {
                        FrameDisposition::Suppressed
                    };
                    return (disposition, actions);
                }
                DetectorOutcome::Pending => {
                    if significant {
                        self.hold(frame);
                        return (FrameDisposition::Held, Vec::new());
                    }
                    return (FrameDisposition::Suppressed, Vec::new());
                }
                DetectorOutcome::Cancelled => self.clear_preroll(),
                DetectorOutcome::Idle => {}
            }
        }

        if self.generation_in_flight {
            return (FrameDisposition::Suppressed, Vec::new());
        }
        if !matches!(
            self.state,
            SessionState::Listening | SessionState::Interrupted
        ) {
            return (FrameDisposition::Ignored, Vec::new());
        }
        if !significant {
            return (FrameDisposition::Silent, Vec::new());
        }

        let mut actions = Vec::new();
        self.append(frame, now, &mut actions);
        self.apply_commit_policy(&mut actions);
        (FrameDisposition::Forwarded, actions)
    }

    /// A typed user turn.
    pub fn on_text(&mut self, text: &str) -> Vec<SessionAction> {
        if !self.supports_text_input {
            return vec![error(RelayError::MalformedMessage(
                "text input is not enabled for this session".to_string(),
            ))];
        }
        if text.trim().is_empty() {
            return vec![error(RelayError::MalformedMessage(
                "text must not be empty".to_string(),
            ))];
        }
        if !self.link_open {
            return vec![error(RelayError::UpstreamConnection(
                "not connected".to_string(),
            ))];
        }
        if self.generation_in_flight {
            debug!(session_id = %self.id, "Generation in flight, dropping text turn");
            return Vec::new();
        }

        let mut actions = vec![SessionAction::Upstream(UpstreamCommand::SendText(
            text.to_string(),
        ))];
        self.begin_generation(&mut actions);
        actions
    }

    /// Client asked to stop the current response.
    pub fn on_interrupt(&mut self, now: Instant) -> Vec<SessionAction> {
        if !self.link_open {
            return vec![error(RelayError::UpstreamConnection(
                "not connected".to_string(),
            ))];
        }
        self.interrupt(now)
    }

    // -------------------------------------------------------------------------
    // Upstream events
    // -------------------------------------------------------------------------

    pub fn on_upstream_event(&mut self, event: UpstreamEvent, now: Instant) -> Vec<SessionAction> {
        match event {
            UpstreamEvent::ResponseCreated { response_id } => {
                self.on_response_created(response_id);
                Vec::new()
            }

            UpstreamEvent::AudioDelta(audio) => {
                let response_id = audio.response_id.unwrap_or_default();
                if !self.accept_delta(&response_id) {
                    debug!(session_id = %self.id, %response_id, "Discarding stale audio delta");
                    return Vec::new();
                }
                vec![SessionAction::Notify(ClientNotice::AudioDelta {
                    response_id,
                    item_id: audio.item_id.unwrap_or_default(),
                    pcm: audio.data,
                })]
            }

            UpstreamEvent::TextDelta {
                response_id,
                item_id,
                delta,
            } => {
                if !self.accept_delta(&response_id) {
                    debug!(session_id = %self.id, %response_id, "Discarding stale text delta");
                    return Vec::new();
                }
                vec![SessionAction::Notify(ClientNotice::TextDelta {
                    response_id,
                    item_id,
                    delta,
                })]
            }

            UpstreamEvent::TextDone {
                response_id,
                item_id,
                text,
            } => {
                if !self.is_active(&response_id) {
                    return Vec::new();
                }
                vec![SessionAction::Notify(ClientNotice::TextDone {
                    response_id,
                    item_id,
                    text,
                })]
            }

            UpstreamEvent::AudioDone {
                response_id,
                item_id,
            } => {
                if !self.is_active(&response_id) {
                    return Vec::new();
                }
                vec![SessionAction::Notify(ClientNotice::AudioDone {
                    response_id,
                    item_id,
                })]
            }

            UpstreamEvent::ResponseDone {
                response_id,
                status,
            } => self.on_response_done(response_id, status, now),

            UpstreamEvent::TranscriptionCompleted {
                item_id,
                transcript,
            } => vec![SessionAction::Notify(ClientNotice::Transcript {
                item_id,
                transcript,
            })],

            UpstreamEvent::SpeechStarted { audio_start_ms } => {
                debug!(session_id = %self.id, audio_start_ms, "Upstream heard speech start");
                Vec::new()
            }

            UpstreamEvent::SpeechStopped { audio_end_ms } => {
                debug!(session_id = %self.id, audio_end_ms, "Upstream heard speech stop");
                Vec::new()
            }

            UpstreamEvent::Error { message, code } => {
                warn!(session_id = %self.id, ?code, "Upstream error: {}", message);
                if let Some(id) = self.active_response.take() {
                    self.remember_cancelled(id);
                }
                self.generation_in_flight = false;
                if self.state.is_generating() {
                    self.state = SessionState::Listening;
                }
                self.detector.reset();
                self.clear_preroll();
                vec![error(RelayError::Generation(message))]
            }

            UpstreamEvent::Closed { reason } => self.on_upstream_closed(reason),
        }
    }

    // -------------------------------------------------------------------------
    // Timers
    // -------------------------------------------------------------------------

    /// Advance timers. Call at or after [`next_deadline`](Self::next_deadline).
    pub fn on_tick(&mut self, now: Instant) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        if let Some(deadline) = self.recovery_deadline
            && now >= deadline
        {
            self.recovery_deadline = None;
            self.interrupt_armed = true;
            if self.state == SessionState::Interrupted {
                self.state = SessionState::Listening;
                debug!(session_id = %self.id, "Recovered from interruption, listening");
            }
        }

        if let CommitPolicy::Debounced {
            quiet_period_ms,
            min_buffered_ms,
            ..
        } = self.policy.commit_policy
            && self.link_open
            && self.pending_audio_bytes > 0
            && !self.generation_in_flight
            && let Some(last) = self.last_audio_at
            && now.saturating_duration_since(last) >= Duration::from_millis(quiet_period_ms)
        {
            if pcm::bytes_to_ms(self.pending_audio_bytes) >= min_buffered_ms {
                self.request_generation(&mut actions);
            } else {
                debug!(
                    session_id = %self.id,
                    bytes = self.pending_audio_bytes,
                    "Discarding input buffer below minimum duration"
                );
                self.pending_audio_bytes = 0;
                actions.push(SessionAction::Upstream(UpstreamCommand::ClearInput));
            }
        }

        if self.state == SessionState::Speaking
            && self.interrupt_armed
            && self.detector.poll(true, now)
        {
            actions.extend(self.interrupt(now));
            self.flush_preroll(now, &mut actions);
        }

        actions
    }

    /// Earliest instant at which [`on_tick`](Self::on_tick) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let debounce = match (self.policy.commit_policy.quiet_period(), self.last_audio_at) {
            (Some(quiet), Some(last))
                if self.pending_audio_bytes > 0 && !self.generation_in_flight =>
            {
                Some(last + quiet)
            }
            _ => None,
        };
        let detection = if self.state == SessionState::Speaking && self.interrupt_armed {
            self.detector.deadline()
        } else {
            None
        };

        [self.recovery_deadline, debounce, detection]
            .into_iter()
            .flatten()
            .min()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn interrupt(&mut self, now: Instant) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.generation_in_flight {
            actions.push(SessionAction::Upstream(UpstreamCommand::CancelResponse));
            match self.active_response.take() {
                Some(id) => self.remember_cancelled(id),
                None => self.unclaimed_cancels += 1,
            }
        }
        actions.push(SessionAction::Upstream(UpstreamCommand::ClearInput));

        self.pending_audio_bytes = 0;
        self.generation_in_flight = false;
        if self.state.is_generating() {
            self.state = SessionState::Interrupted;
        }
        self.interrupt_armed = false;
        self.recovery_deadline = Some(now + self.policy.recovery());
        self.last_interruption_at = Some(now);
        self.detector.note_interruption(now);

        info!(session_id = %self.id, "Response interrupted");
        actions.push(SessionAction::Notify(ClientNotice::Interrupted));
        actions
    }

    fn on_response_created(&mut self, response_id: String) {
        if self.cancelled_responses.contains(&response_id) {
            return;
        }
        if self.unclaimed_cancels > 0 {
            self.unclaimed_cancels -= 1;
            debug!(session_id = %self.id, %response_id, "Late response.created for cancelled request");
            self.remember_cancelled(response_id);
            return;
        }

        if self.generation_in_flight {
            match self.active_response.as_deref() {
                None => self.active_response = Some(response_id),
                Some(active) if active != response_id => {
                    debug!(session_id = %self.id, %response_id, "Ignoring overlapping response");
                }
                Some(_) => {}
            }
            return;
        }

        // Upstream turn detection started a response on its own.
        debug!(session_id = %self.id, %response_id, "Upstream-initiated response");
        self.generation_in_flight = true;
        self.active_response = Some(response_id);
        self.pending_audio_bytes = 0;
        self.state = SessionState::Generating;
    }

    fn on_response_done(
        &mut self,
        response_id: String,
        status: String,
        now: Instant,
    ) -> Vec<SessionAction> {
        if self.cancelled_responses.contains(&response_id) {
            debug!(session_id = %self.id, %response_id, "Discarding done for cancelled response");
            return Vec::new();
        }
        if !self.generation_in_flight {
            debug!(session_id = %self.id, %response_id, "Discarding done with no response in flight");
            return Vec::new();
        }
        if let Some(active) = self.active_response.as_deref()
            && active != response_id
        {
            debug!(session_id = %self.id, %response_id, "Discarding done for overlapping response");
            return Vec::new();
        }

        self.generation_in_flight = false;
        self.active_response = None;
        if self.state.is_generating() {
            self.state = SessionState::Listening;
        }
        self.detector.reset();

        let mut actions = vec![SessionAction::Notify(ClientNotice::ResponseDone {
            response_id,
            status,
        })];
        self.flush_preroll(now, &mut actions);
        actions
    }

    /// Whether a delta belongs to the armed turn. The first delta of a turn
    /// without a known id arms that id and starts speaking.
    fn accept_delta(&mut self, response_id: &str) -> bool {
        if !self.generation_in_flight || self.cancelled_responses.iter().any(|c| c == response_id)
        {
            return false;
        }
        match self.active_response.as_deref() {
            Some(active) if active != response_id => return false,
            Some(_) => {}
            None => self.active_response = Some(response_id.to_string()),
        }
        if self.state == SessionState::Generating {
            self.state = SessionState::Speaking;
            self.meter.reset();
        }
        true
    }

    fn is_active(&self, response_id: &str) -> bool {
        self.generation_in_flight && self.active_response.as_deref() == Some(response_id)
    }

    fn append(&mut self, frame: Bytes, now: Instant, actions: &mut Vec<SessionAction>) {
        self.pending_audio_bytes += frame.len();
        self.last_audio_at = Some(now);
        actions.push(SessionAction::Upstream(UpstreamCommand::AppendAudio(frame)));
    }

    fn apply_commit_policy(&mut self, actions: &mut Vec<SessionAction>) {
        if self.pending_audio_bytes == 0 || self.generation_in_flight {
            return;
        }
        match self.policy.commit_policy {
            CommitPolicy::Immediate => self.request_generation(actions),
            CommitPolicy::Debounced {
                max_buffered_ms, ..
            } => {
                if pcm::bytes_to_ms(self.pending_audio_bytes) >= max_buffered_ms {
                    self.request_generation(actions);
                }
            }
        }
    }

    fn request_generation(&mut self, actions: &mut Vec<SessionAction>) {
        actions.push(SessionAction::Upstream(UpstreamCommand::Commit));
        self.pending_audio_bytes = 0;
        self.begin_generation(actions);
    }

    fn begin_generation(&mut self, actions: &mut Vec<SessionAction>) {
        actions.push(SessionAction::Upstream(UpstreamCommand::CreateResponse(
            ResponseRequest {
                modalities: Some(Modality::text_and_audio()),
                instructions: self.policy.instructions.clone(),
            },
        )));
        self.generation_in_flight = true;
        self.active_response = None;
        self.state = SessionState::Generating;
    }

    fn hold(&mut self, frame: Bytes) {
        let limit = (self.policy.preroll_ms as usize).saturating_mul(BYTES_PER_MS);
        self.preroll_bytes += frame.len();
        self.preroll.push_back(frame);
        while self.preroll_bytes > limit {
            match self.preroll.pop_front() {
                Some(old) => self.preroll_bytes -= old.len(),
                None => break,
            }
        }
    }

    fn flush_preroll(&mut self, now: Instant, actions: &mut Vec<SessionAction>) {
        if self.preroll.is_empty() {
            return;
        }
        let frames: Vec<Bytes> = self.preroll.drain(..).collect();
        self.preroll_bytes = 0;
        for frame in frames {
            self.append(frame, now, actions);
        }
        self.apply_commit_policy(actions);
    }

    fn clear_preroll(&mut self) {
        self.preroll.clear();
        self.preroll_bytes = 0;
    }

    fn remember_cancelled(&mut self, response_id: String) {
        if self.cancelled_responses.len() == CANCELLED_HISTORY {
            self.cancelled_responses.pop_front();
        }
        self.cancelled_responses.push_back(response_id);
    }

    fn reset_turn(&mut self) {
        self.pending_audio_bytes = 0;
        self.last_audio_at = None;
        self.generation_in_flight = false;
        self.active_response = None;
        self.cancelled_responses.clear();
        self.unclaimed_cancels = 0;
        self.interrupt_armed = true;
        self.recovery_deadline = None;
        self.detector.reset();
        self.meter.reset();
        self.clear_preroll();
    }
}

fn error(err: RelayError) -> SessionAction {
    SessionAction::Notify(ClientNotice::Error(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::RealtimeAudioData;

    fn noise(samples: usize, amplitude: f32) -> Vec<f32> {
        let mut state: u64 = 0x2545_F491;
        (0..samples)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let random = (state >> 40) as f32 / (1u64 << 24) as f32;
                (random * 2.0 - 1.0) * amplitude
            })
            .collect()
    }

    /// `ms` of loud noise.
    fn loud(ms: usize) -> Bytes {
        pcm::encode(&noise(ms * 24, 0.9))
    }

    fn silent(ms: usize) -> Bytes {
        pcm::encode(&vec![0.0; ms * 24])
    }

    fn connected(policy: SessionPolicy) -> Session {
        let mut session = Session::new("test", policy);
        assert_eq!(session.on_connect(true), vec![SessionAction::OpenUpstream]);
        session.on_upstream_ready();
        session
    }

    fn commands(actions: &[SessionAction]) -> Vec<&UpstreamCommand> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Upstream(cmd) => Some(cmd),
                _ => None,
            })
            .collect()
    }

    fn notices(actions: &[SessionAction]) -> Vec<&ClientNotice> {
        actions
            .iter()
            .filter_map(|a| match a {
                SessionAction::Notify(notice) => Some(notice),
                _ => None,
            })
            .collect()
    }

    fn audio_delta(response_id: &str) -> UpstreamEvent {
        UpstreamEvent::AudioDelta(RealtimeAudioData {
            data: Bytes::from_static(&[1, 0, 2, 0]),
            sample_rate: 24000,
            item_id: Some("item".to_string()),
            response_id: Some(response_id.to_string()),
        })
    }

    fn done(response_id: &str) -> UpstreamEvent {
        UpstreamEvent::ResponseDone {
            response_id: response_id.to_string(),
            status: "completed".to_string(),
        }
    }

    /// Session in `speaking` for response `r1`, started via a text turn.
    fn speaking(policy: SessionPolicy, now: Instant) -> Session {
        let mut session = connected(policy);
        session.on_text("hi");
        session.on_upstream_event(
            UpstreamEvent::ResponseCreated {
                response_id: "r1".to_string(),
            },
            now,
        );
        session.on_upstream_event(audio_delta("r1"), now);
        assert_eq!(session.state(), SessionState::Speaking);
        session
    }

    #[test]
    fn test_connect_then_ready() {
        let mut session = Session::new("s", SessionPolicy::default());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.on_connect(false), vec![SessionAction::OpenUpstream]);
        assert!(!session.supports_text_input());
        assert_eq!(session.state(), SessionState::Idle);

        let actions = session.on_upstream_ready();
        assert_eq!(actions, vec![SessionAction::Notify(ClientNotice::Connected)]);
        assert_eq!(session.state(), SessionState::Listening);
        assert!(session.is_link_open());
    }

    #[test]
    fn test_connect_failure_reports_error() {
        let mut session = Session::new("s", SessionPolicy::default());
        session.on_connect(true);
        let actions = session.on_upstream_failed("refused");
        assert_eq!(
            notices(&actions),
            vec![&ClientNotice::Error(RelayError::UpstreamConnection(
                "refused".to_string()
            ))]
        );
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.on_upstream_ready().is_empty());
    }

    #[test]
    fn test_reconnect_closes_previous_link() {
        let mut session = connected(SessionPolicy::default());
        assert_eq!(
            session.on_connect(true),
            vec![SessionAction::CloseUpstream, SessionAction::OpenUpstream]
        );
        assert!(!session.is_link_open());
    }

    #[test]
    fn test_audio_before_connect_is_ignored() {
        let mut session = Session::new("s", SessionPolicy::default());
        let (disposition, actions) = session.on_audio(loud(20), Instant::now());
        assert_eq!(disposition, FrameDisposition::Ignored);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_silent_frames_never_forward() {
        let mut session = connected(SessionPolicy::default());
        let now = Instant::now();
        for _ in 0..3 {
            let (disposition, actions) = session.on_audio(silent(20), now);
            assert_eq!(disposition, FrameDisposition::Silent);
            assert!(actions.is_empty());
        }
        assert_eq!(session.pending_audio_bytes(), 0);
    }

    #[test]
    fn test_immediate_policy_commits_every_frame() {
        let mut session = connected(SessionPolicy::default());
        let frame = loud(20);
        let (disposition, actions) = session.on_audio(frame.clone(), Instant::now());
        assert_eq!(disposition, FrameDisposition::Forwarded);
        let cmds = commands(&actions);
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0], &UpstreamCommand::AppendAudio(frame));
        assert_eq!(cmds[1], &UpstreamCommand::Commit);
        assert!(matches!(cmds[2], UpstreamCommand::CreateResponse(_)));
        assert!(session.generation_in_flight());
        assert_eq!(session.pending_audio_bytes(), 0);
        assert_eq!(session.state(), SessionState::Generating);
    }

    #[test]
    fn test_frames_suppressed_while_generating() {
        let mut session = connected(SessionPolicy::default());
        let now = Instant::now();
        session.on_audio(loud(20), now);
        let (disposition, actions) = session.on_audio(loud(20), now);
        assert_eq!(disposition, FrameDisposition::Suppressed);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_odd_frame_is_truncated() {
        let mut session = Session::new("s", SessionPolicy {
            commit_policy: CommitPolicy::debounced(),
            ..Default::default()
        });
        session.on_connect(true);
        session.on_upstream_ready();
        let mut bytes = loud(10).to_vec();
        bytes.push(0x7f);
        let (_, actions) = session.on_audio(Bytes::from(bytes), Instant::now());
        match commands(&actions)[0] {
            UpstreamCommand::AppendAudio(frame) => assert_eq!(frame.len() % 2, 0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_text_turn_sends_item_then_response() {
        let mut session = connected(SessionPolicy {
            instructions: Some("Be brief".to_string()),
            ..Default::default()
        });
        let actions = session.on_text("hello");
        assert_eq!(
            commands(&actions),
            vec![
                &UpstreamCommand::SendText("hello".to_string()),
                &UpstreamCommand::CreateResponse(ResponseRequest {
                    modalities: Some(vec!["text".to_string(), "audio".to_string()]),
                    instructions: Some("Be brief".to_string()),
                }),
            ]
        );
        assert_eq!(session.state(), SessionState::Generating);

        // A second request while one is outstanding is dropped.
        assert!(session.on_text("again").is_empty());
    }

    #[test]
    fn test_text_rejections() {
        let mut session = Session::new("s", SessionPolicy::default());
        assert_eq!(
            notices(&session.on_text("hi")),
            vec![&ClientNotice::Error(RelayError::UpstreamConnection(
                "not connected".to_string()
            ))]
        );

        session.on_connect(false);
        session.on_upstream_ready();
        assert!(matches!(
            notices(&session.on_text("hi"))[0],
            ClientNotice::Error(RelayError::MalformedMessage(_))
        ));

        let mut session = connected(SessionPolicy::default());
        assert!(matches!(
            notices(&session.on_text("   "))[0],
            ClientNotice::Error(RelayError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_deltas_then_done_returns_to_listening() {
        let now = Instant::now();
        let mut session = connected(SessionPolicy::default());
        session.on_text("hi");

        let mut delivered = Vec::new();
        for _ in 0..3 {
            for action in session.on_upstream_event(audio_delta("r1"), now) {
                if let SessionAction::Notify(ClientNotice::AudioDelta { response_id, .. }) = action {
                    delivered.push(response_id);
                }
            }
            assert_eq!(session.state(), SessionState::Speaking);
        }
        assert_eq!(delivered, vec!["r1", "r1", "r1"]);
        assert_eq!(session.active_response(), Some("r1"));

        let actions = session.on_upstream_event(done("r1"), now);
        assert_eq!(
            notices(&actions),
            vec![&ClientNotice::ResponseDone {
                response_id: "r1".to_string(),
                status: "completed".to_string()
            }]
        );
        assert!(!session.generation_in_flight());
        assert_eq!(session.state(), SessionState::Listening);
    }

    #[test]
    fn test_done_for_other_response_keeps_turn() {
        let now = Instant::now();
        let mut session = speaking(SessionPolicy::default(), now);

        assert!(session.on_upstream_event(done("r0"), now).is_empty());
        assert!(session.generation_in_flight());
        assert_eq!(session.active_response(), Some("r1"));
        assert_eq!(session.state(), SessionState::Speaking);
        assert_eq!(session.on_upstream_event(audio_delta("r1"), now).len(), 1);

        session.on_upstream_event(done("r1"), now);
        assert!(!session.generation_in_flight());
        assert_eq!(session.state(), SessionState::Listening);
    }

    #[test]
    fn test_text_delta_moves_to_speaking() {
        let now = Instant::now();
        let mut session = connected(SessionPolicy::default());
        session.on_text("hi");
        let actions = session.on_upstream_event(
            UpstreamEvent::TextDelta {
                response_id: "r1".to_string(),
                item_id: "i".to_string(),
                delta: "Hel".to_string(),
            },
            now,
        );
        assert_eq!(actions.len(), 1);
        assert_eq!(session.state(), SessionState::Speaking);
    }

    #[test]
    fn test_client_interrupt_cancels_and_clears() {
        let now = Instant::now();
        let mut session = speaking(SessionPolicy::default(), now);

        let actions = session.on_interrupt(now);
        assert_eq!(
            commands(&actions),
            vec![&UpstreamCommand::CancelResponse, &UpstreamCommand::ClearInput]
        );
        assert_eq!(notices(&actions), vec![&ClientNotice::Interrupted]);
        assert_eq!(session.state(), SessionState::Interrupted);
        assert!(!session.generation_in_flight());
        assert!(!session.interrupt_armed());
        assert_eq!(session.last_interruption_at(), Some(now));

        // Late deltas and done for the cancelled response are discarded.
        assert!(session.on_upstream_event(audio_delta("r1"), now).is_empty());
        assert!(session.on_upstream_event(done("r1"), now).is_empty());

        // Recovery window elapses.
        assert!(session.on_tick(now + Duration::from_millis(499)).is_empty());
        assert_eq!(session.state(), SessionState::Interrupted);
        session.on_tick(now + Duration::from_millis(500));
        assert_eq!(session.state(), SessionState::Listening);
        assert!(session.interrupt_armed());
    }

    #[test]
    fn test_interrupt_without_generation_only_clears() {
        let mut session = connected(SessionPolicy::default());
        let actions = session.on_interrupt(Instant::now());
        assert_eq!(commands(&actions), vec![&UpstreamCommand::ClearInput]);
        assert_eq!(session.state(), SessionState::Listening);
    }

    #[test]
    fn test_interrupt_before_response_created_discards_it() {
        let now = Instant::now();
        let mut session = connected(SessionPolicy::default());
        session.on_text("hi");
        session.on_interrupt(now);

        session.on_upstream_event(
            UpstreamEvent::ResponseCreated {
                response_id: "late".to_string(),
            },
            now,
        );
        assert!(!session.generation_in_flight());
        assert!(session.on_upstream_event(audio_delta("late"), now).is_empty());
        assert!(session.on_upstream_event(done("late"), now).is_empty());
    }

    #[test]
    fn test_sustained_energy_fires_exactly_once() {
        let start = Instant::now();
        let mut session = speaking(SessionPolicy::default(), start);

        let mut interruptions = 0;
        let mut cancels = 0;
        let mut held = 0;
        for step in 0..20u64 {
            let now = start + Duration::from_millis(step * 50);
            let (disposition, actions) = session.on_audio(loud(50), now);
            if disposition == FrameDisposition::Held {
                held += 1;
            }
            interruptions += notices(&actions)
                .iter()
                .filter(|n| ***n == ClientNotice::Interrupted)
                .count();
            cancels += commands(&actions)
                .iter()
                .filter(|c| ***c == UpstreamCommand::CancelResponse)
                .count();
        }
        assert_eq!(interruptions, 1);
        assert_eq!(cancels, 1);
        assert!(held > 0);
    }

    #[test]
    fn test_client_interrupt_starts_detector_cooldown() {
        let start = Instant::now();
        let mut session = speaking(SessionPolicy::default(), start);
        session.on_interrupt(start);

        session.on_tick(start + Duration::from_millis(500));
        assert_eq!(session.state(), SessionState::Listening);
        session.on_text("again");
        let resumed = start + Duration::from_millis(500);
        session.on_upstream_event(
            UpstreamEvent::ResponseCreated {
                response_id: "r2".to_string(),
            },
            resumed,
        );
        session.on_upstream_event(audio_delta("r2"), resumed);
        assert_eq!(session.state(), SessionState::Speaking);

        let mut fired_at = None;
        for step in 11..30u64 {
            let now = start + Duration::from_millis(step * 50);
            let (_, mut actions) = session.on_audio(loud(50), now);
            actions.extend(session.on_tick(now));
            if actions.contains(&SessionAction::Notify(ClientNotice::Interrupted)) {
                fired_at = Some(now);
                break;
            }
        }
        let fired_at = fired_at.expect("interruption should fire after the cooldown");
        assert!(
            fired_at >= start + Duration::from_millis(1000),
            "fired {:?} after the client interrupt",
            fired_at - start
        );
    }

    #[test]
    fn test_fired_interruption_flushes_held_audio() {
        let start = Instant::now();
        let mut session = speaking(SessionPolicy::default(), start);

        let mut fired = None;
        for step in 0..20u64 {
            let now = start + Duration::from_millis(step * 50);
            let (_, actions) = session.on_audio(loud(50), now);
            if actions.contains(&SessionAction::Notify(ClientNotice::Interrupted)) {
                fired = Some(actions);
                break;
            }
        }
        let actions = fired.expect("interruption should fire");
        let cmds = commands(&actions);
        assert_eq!(cmds[0], &UpstreamCommand::CancelResponse);
        assert_eq!(cmds[1], &UpstreamCommand::ClearInput);
        let appended = cmds
            .iter()
            .filter(|c| matches!(c, UpstreamCommand::AppendAudio(_)))
            .count();
        assert!(appended >= 2, "held frames should be appended");
        assert_eq!(cmds[cmds.len() - 2], &UpstreamCommand::Commit);
        assert!(matches!(cmds[cmds.len() - 1], UpstreamCommand::CreateResponse(_)));
    }

    #[test]
    fn test_energy_drop_cancels_attempt() {
        let start = Instant::now();
        let mut session = speaking(SessionPolicy::default(), start);

        for step in 0..3u64 {
            session.on_audio(loud(50), start + Duration::from_millis(step * 50));
        }
        let mut total = Vec::new();
        for step in 3..40u64 {
            let (disposition, actions) =
                session.on_audio(silent(50), start + Duration::from_millis(step * 50));
            assert_ne!(disposition, FrameDisposition::Forwarded);
            total.extend(actions);
        }
        total.extend(session.on_tick(start + Duration::from_secs(5)));
        assert!(!total.contains(&SessionAction::Notify(ClientNotice::Interrupted)));
        assert_eq!(session.state(), SessionState::Speaking);
    }

    #[test]
    fn test_tick_confirms_pending_interruption() {
        let start = Instant::now();
        let mut session = speaking(SessionPolicy::default(), start);

        let mut pending_deadline = None;
        for step in 0..4u64 {
            session.on_audio(loud(50), start + Duration::from_millis(step * 50));
            if let Some(deadline) = session.next_deadline() {
                pending_deadline = Some(deadline);
                break;
            }
        }
        let deadline = pending_deadline.expect("attempt should be pending");
        let actions = session.on_tick(deadline);
        assert!(actions.contains(&SessionAction::Notify(ClientNotice::Interrupted)));
    }

    #[test]
    fn test_debounced_commits_after_quiet_period() {
        let start = Instant::now();
        let mut session = connected(SessionPolicy {
            commit_policy: CommitPolicy::debounced(),
            ..Default::default()
        });

        for step in 0..50u64 {
            let (disposition, actions) =
                session.on_audio(loud(20), start + Duration::from_millis(step * 20));
            assert_eq!(disposition, FrameDisposition::Forwarded);
            assert_eq!(commands(&actions).len(), 1);
        }
        let last = start + Duration::from_millis(49 * 20);
        assert_eq!(session.pending_audio_bytes(), 50 * 20 * BYTES_PER_MS);
        assert_eq!(session.next_deadline(), Some(last + Duration::from_secs(2)));

        assert!(session.on_tick(last + Duration::from_millis(1999)).is_empty());
        let actions = session.on_tick(last + Duration::from_secs(2));
        let cmds = commands(&actions);
        assert_eq!(cmds[0], &UpstreamCommand::Commit);
        assert!(matches!(cmds[1], UpstreamCommand::CreateResponse(_)));
        assert_eq!(session.pending_audio_bytes(), 0);
        assert!(session.generation_in_flight());
    }

    #[test]
    fn test_debounced_discards_short_buffer() {
        let start = Instant::now();
        let mut session = connected(SessionPolicy {
            commit_policy: CommitPolicy::debounced(),
            ..Default::default()
        });
        session.on_audio(loud(100), start);
        let actions = session.on_tick(start + Duration::from_secs(2));
        assert_eq!(commands(&actions), vec![&UpstreamCommand::ClearInput]);
        assert_eq!(session.pending_audio_bytes(), 0);
        assert!(!session.generation_in_flight());
        assert_eq!(session.next_deadline(), None);
    }

    #[test]
    fn test_debounced_commits_at_max_buffered() {
        let start = Instant::now();
        let mut session = connected(SessionPolicy {
            commit_policy: CommitPolicy::debounced(),
            ..Default::default()
        });
        let mut committed_at = None;
        for step in 0..60u64 {
            let (_, actions) = session.on_audio(loud(100), start + Duration::from_millis(step * 100));
            if commands(&actions).contains(&&UpstreamCommand::Commit) {
                committed_at = Some(step);
                break;
            }
        }
        assert_eq!(committed_at, Some(49));
    }

    #[test]
    fn test_error_clears_generation() {
        let now = Instant::now();
        let mut session = speaking(SessionPolicy::default(), now);
        let actions = session.on_upstream_event(
            UpstreamEvent::Error {
                message: "boom".to_string(),
                code: None,
            },
            now,
        );
        assert_eq!(
            notices(&actions),
            vec![&ClientNotice::Error(RelayError::Generation("boom".to_string()))]
        );
        assert!(!session.generation_in_flight());
        assert_eq!(session.state(), SessionState::Listening);
    }

    #[test]
    fn test_upstream_initiated_response_arms_turn() {
        let now = Instant::now();
        let mut session = connected(SessionPolicy::default());
        session.on_upstream_event(
            UpstreamEvent::ResponseCreated {
                response_id: "auto".to_string(),
            },
            now,
        );
        assert!(session.generation_in_flight());
        assert_eq!(session.state(), SessionState::Generating);
        assert!(session.on_text("hi").is_empty());
        assert_eq!(session.on_upstream_event(audio_delta("auto"), now).len(), 1);
        assert!(session.on_upstream_event(audio_delta("other"), now).is_empty());
    }

    #[test]
    fn test_transcript_is_forwarded() {
        let mut session = connected(SessionPolicy::default());
        let actions = session.on_upstream_event(
            UpstreamEvent::TranscriptionCompleted {
                item_id: "i1".to_string(),
                transcript: "hello there".to_string(),
            },
            Instant::now(),
        );
        assert_eq!(
            notices(&actions),
            vec![&ClientNotice::Transcript {
                item_id: "i1".to_string(),
                transcript: "hello there".to_string()
            }]
        );
        assert_eq!(session.state(), SessionState::Listening);
    }

    #[test]
    fn test_upstream_close_tears_down() {
        let now = Instant::now();
        let mut session = speaking(SessionPolicy::default(), now);
        let actions = session.on_upstream_event(UpstreamEvent::Closed { reason: None }, now);
        assert_eq!(actions[0], SessionAction::CloseUpstream);
        assert_eq!(
            notices(&actions).last(),
            Some(&&ClientNotice::Disconnected)
        );
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.generation_in_flight());
        assert!(!session.is_link_open());

        // Only the first close is reported.
        assert!(session.on_upstream_closed(None).is_empty());
    }

    #[test]
    fn test_client_disconnect() {
        let mut session = connected(SessionPolicy::default());
        session.on_text("hi");
        assert_eq!(
            session.on_disconnect(),
            vec![
                SessionAction::CloseUpstream,
                SessionAction::Notify(ClientNotice::Disconnected)
            ]
        );
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.generation_in_flight());

        // Disconnected sessions can connect again.
        assert_eq!(session.on_connect(true), vec![SessionAction::OpenUpstream]);
    }

    #[test]
    fn test_in_flight_only_while_generating() {
        let now = Instant::now();
        let mut session = connected(SessionPolicy::default());
        let check = |s: &Session| {
            assert!(!s.generation_in_flight() || s.state().is_generating());
        };
        session.on_audio(loud(20), now);
        check(&session);
        session.on_upstream_event(audio_delta("r"), now);
        check(&session);
        session.on_interrupt(now);
        check(&session);
        session.on_tick(now + Duration::from_secs(1));
        check(&session);
        session.on_text("x");
        check(&session);
        session.on_upstream_event(done("y"), now);
        check(&session);
    }
}
