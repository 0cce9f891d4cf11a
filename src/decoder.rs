//! Resumable frame synchronizer.
//!
//! The bus carries a continuous stream of frames from every device. The decoder hunts for
//! the `FF [00] A5` marker, collects the header, accepts only status broadcasts from the
//! controller and then collects the length-prefixed body. The complete parse position lives
//! in [`DecoderState`], so input may arrive in arbitrary chunks across many polls.

use crate::protocol::{
    Dialect, Frame, FrameHeader, BODY_CAPACITY, FILLER_BYTE, HEADER_LENGTH, PREAMBLE_BYTE,
    START_BYTE,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderState {
    /// Hunting for the start marker; `lookback` holds the last two bytes seen.
    Scanning { lookback: [u8; 2] },
    ReadingHeader {
        bytes: [u8; HEADER_LENGTH],
        read: usize,
    },
    ReadingBody { header: FrameHeader, body: Vec<u8> },
}

impl Default for DecoderState {
    fn default() -> Self {
        DecoderState::Scanning { lookback: [0; 2] }
    }
}

impl DecoderState {
    pub fn phase(&self) -> Phase {
        match self {
            DecoderState::Scanning { .. } => Phase::Scanning,
            DecoderState::ReadingHeader { .. } => Phase::ReadingHeader,
            DecoderState::ReadingBody { .. } => Phase::ReadingBody,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Scanning,
    ReadingHeader,
    ReadingBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// Not a status broadcast from the controller.
    HeaderRejected(FrameHeader),
    /// Declared body length exceeds [`BODY_CAPACITY`].
    Oversized(FrameHeader),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    NeedMoreInput,
    FrameReady(Frame),
    FrameDiscarded(DiscardReason),
}

fn is_preamble(lookback: [u8; 2]) -> bool {
    lookback[1] == PREAMBLE_BYTE || lookback == [PREAMBLE_BYTE, FILLER_BYTE]
}

/// Consumes one byte and returns the next state together with the resulting event.
pub fn advance(state: DecoderState, byte: u8, dialect: Dialect) -> (DecoderState, DecodeEvent) {
    match state {
        DecoderState::Scanning { lookback } => {
            if byte == START_BYTE && is_preamble(lookback) {
                let mut bytes = [0u8; HEADER_LENGTH];
                bytes[0] = START_BYTE;
                (
                    DecoderState::ReadingHeader { bytes, read: 1 },
                    DecodeEvent::NeedMoreInput,
                )
            } else {
                (
                    DecoderState::Scanning {
                        lookback: [lookback[1], byte],
                    },
                    DecodeEvent::NeedMoreInput,
                )
            }
        }
        DecoderState::ReadingHeader { mut bytes, read } => {
            let Some(slot) = bytes.get_mut(read) else {
                // inconsistent state, resynchronize
                return (
                    DecoderState::Scanning {
                        lookback: [0, byte],
                    },
                    DecodeEvent::NeedMoreInput,
                );
            };
            *slot = byte;
            let read = read + 1;
            if read < HEADER_LENGTH {
                return (
                    DecoderState::ReadingHeader { bytes, read },
                    DecodeEvent::NeedMoreInput,
                );
            }

            let header = FrameHeader::decode(&bytes);
            // a marker may start inside a rejected header
            let rescan = DecoderState::Scanning {
                lookback: [bytes[HEADER_LENGTH - 2], bytes[HEADER_LENGTH - 1]],
            };
            if !header.is_status_broadcast(dialect) {
                return (
                    rescan,
                    DecodeEvent::FrameDiscarded(DiscardReason::HeaderRejected(header)),
                );
            }
            let length = usize::from(header.length);
            if length > BODY_CAPACITY {
                return (
                    rescan,
                    DecodeEvent::FrameDiscarded(DiscardReason::Oversized(header)),
                );
            }
            if length == 0 {
                return (
                    rescan,
                    DecodeEvent::FrameReady(Frame {
                        header,
                        body: Vec::new(),
                    }),
                );
            }
            (
                DecoderState::ReadingBody {
                    header,
                    body: Vec::with_capacity(length),
                },
                DecodeEvent::NeedMoreInput,
            )
        }
        DecoderState::ReadingBody { header, mut body } => {
            body.push(byte);
            if body.len() < usize::from(header.length) {
                return (
                    DecoderState::ReadingBody { header, body },
                    DecodeEvent::NeedMoreInput,
                );
            }
            let lookback = match body.as_slice() {
                [.., a, b] => [*a, *b],
                [b] => [header.length, *b],
                [] => [header.command, header.length],
            };
            (
                DecoderState::Scanning { lookback },
                DecodeEvent::FrameReady(Frame { header, body }),
            )
        }
    }
}

/// Owns the [`DecoderState`] of one link.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    dialect: Dialect,
    state: DecoderState,
}

impl FrameDecoder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            state: DecoderState::default(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// True between the start marker and the last body byte.
    pub fn in_frame(&self) -> bool {
        self.phase() != Phase::Scanning
    }

    /// Drops any partial frame and starts hunting for the next marker.
    pub fn reset(&mut self) {
        self.state = DecoderState::default();
    }

    pub fn feed(&mut self, byte: u8) -> DecodeEvent {
        let was = self.phase();
        let (state, event) = advance(std::mem::take(&mut self.state), byte, self.dialect);
        self.state = state;

        match &event {
            DecodeEvent::NeedMoreInput => {
                if was == Phase::Scanning && self.phase() == Phase::ReadingHeader {
                    log::trace!("Frame start marker");
                }
            }
            DecodeEvent::FrameReady(frame) => {
                log::trace!("Frame ready: {} body={:02X?}", frame.header, frame.body);
            }
            DecodeEvent::FrameDiscarded(DiscardReason::HeaderRejected(header)) => {
                log::debug!("Discard frame: {header}");
            }
            DecodeEvent::FrameDiscarded(DiscardReason::Oversized(header)) => {
                log::warn!(
                    "Discard oversized frame - capacity={} header: {header}",
                    BODY_CAPACITY
                );
            }
        }
        event
    }

    /// Feeds every byte of `data` and returns the events other than
    /// [`DecodeEvent::NeedMoreInput`], in order.
    pub fn push(&mut self, data: &[u8]) -> Vec<DecodeEvent> {
        data.iter()
            .map(|byte| self.feed(*byte))
            .filter(|event| *event != DecodeEvent::NeedMoreInput)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::STATUS_LENGTH;

    const SHORT_FRAME: [u8; 10] = [0xff, 0x00, 0xa5, 0x02, 0x0f, 0x10, 0x02, 0x02, 0x48, 0x1e];

    #[test]
    fn header_state_out_of_range_resynchronizes() {
        let state = DecoderState::ReadingHeader {
            bytes: [START_BYTE, 0x02, 0x0f, 0x10, 0x02, 0x1b],
            read: HEADER_LENGTH,
        };
        let (state, event) = advance(state, PREAMBLE_BYTE, Dialect::Current);
        assert_eq!(event, DecodeEvent::NeedMoreInput);
        assert_eq!(
            state,
            DecoderState::Scanning {
                lookback: [0, PREAMBLE_BYTE]
            }
        );
        let (state, _) = advance(state, START_BYTE, Dialect::Current);
        assert_eq!(state.phase(), Phase::ReadingHeader);
    }

    fn ready_frames(events: &[DecodeEvent]) -> Vec<Frame> {
        events
            .iter()
            .filter_map(|event| match event {
                DecodeEvent::FrameReady(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn decodes_short_status_frame() {
        let mut decoder = FrameDecoder::new(Dialect::Current);
        let events = decoder.push(&SHORT_FRAME);
        assert_eq!(events.len(), 1);
        let frames = ready_frames(&events);
        let header = frames[0].header;
        assert_eq!(header.kind, 0x02);
        assert_eq!(header.destination, 0x0f);
        assert_eq!(header.source, 0x10);
        assert_eq!(header.command, 0x02);
        assert_eq!(header.length, 2);
        assert_eq!(frames[0].body, vec![0x48, 0x1e]);
        assert_eq!(decoder.phase(), Phase::Scanning);
    }

    #[test]
    fn phases_follow_the_frame() {
        let mut decoder = FrameDecoder::new(Dialect::Current);
        for byte in &SHORT_FRAME[..2] {
            decoder.feed(*byte);
            assert_eq!(decoder.phase(), Phase::Scanning);
        }
        decoder.feed(SHORT_FRAME[2]);
        assert_eq!(decoder.phase(), Phase::ReadingHeader);
        assert!(decoder.in_frame());
        for byte in &SHORT_FRAME[3..8] {
            assert_eq!(decoder.feed(*byte), DecodeEvent::NeedMoreInput);
        }
        assert_eq!(decoder.phase(), Phase::ReadingBody);
        assert_eq!(decoder.feed(0x48), DecodeEvent::NeedMoreInput);
        assert!(matches!(decoder.feed(0x1e), DecodeEvent::FrameReady(_)));
        assert!(!decoder.in_frame());
    }

    #[test]
    fn marker_without_filler() {
        let mut decoder = FrameDecoder::new(Dialect::Current);
        let events = decoder.push(&[0xff, 0xa5, 0x02, 0x0f, 0x10, 0x02, 0x01, 0x33]);
        assert_eq!(ready_frames(&events)[0].body, vec![0x33]);
    }

    #[test]
    fn lone_start_byte_does_not_sync() {
        let mut decoder = FrameDecoder::new(Dialect::Current);
        assert!(decoder
            .push(&[0x00, 0xa5, 0x02, 0x0f, 0x10, 0x02, 0x01, 0x33])
            .is_empty());
        assert_eq!(decoder.phase(), Phase::Scanning);

        // two fillers are not a marker either
        assert!(decoder
            .push(&[0xff, 0x00, 0x00, 0xa5, 0x02, 0x0f, 0x10, 0x02, 0x01, 0x33])
            .is_empty());
        assert_eq!(decoder.phase(), Phase::Scanning);
    }

    #[test]
    fn noise_around_frame_is_absorbed() {
        let mut stream = vec![0x13, 0x37, 0xa5, 0x00, 0xfe, 0x42];
        stream.extend_from_slice(&SHORT_FRAME);
        stream.extend_from_slice(&[0x01, 0x8e, 0x00, 0xa5, 0x55]);
        let mut decoder = FrameDecoder::new(Dialect::Current);
        let events = decoder.push(&stream);
        assert_eq!(events.len(), 1);
        assert_eq!(ready_frames(&events)[0].body, vec![0x48, 0x1e]);
    }

    #[test]
    fn marker_split_across_feeds() {
        let mut decoder = FrameDecoder::new(Dialect::Current);
        assert!(decoder.push(&SHORT_FRAME[..1]).is_empty());
        assert!(decoder.push(&SHORT_FRAME[1..2]).is_empty());
        assert!(decoder.push(&SHORT_FRAME[2..5]).is_empty());
        assert_eq!(ready_frames(&decoder.push(&SHORT_FRAME[5..])).len(), 1);
    }

    #[test]
    fn rejected_header_then_next_frame() {
        // source 0x22 is not the controller
        let mut stream = vec![0xff, 0x00, 0xa5, 0x02, 0x0f, 0x22, 0x02, 0x05];
        stream.extend_from_slice(&SHORT_FRAME);
        let mut decoder = FrameDecoder::new(Dialect::Current);
        let events = decoder.push(&stream);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            DecodeEvent::FrameDiscarded(DiscardReason::HeaderRejected(header)) if header.source == 0x22
        ));
        assert_eq!(ready_frames(&events).len(), 1);
    }

    #[test]
    fn marker_overlapping_rejected_header() {
        // the rejected header ends in FF 00, so the following A5 starts a frame
        let stream = [
            0xff, 0x00, 0xa5, 0x02, 0x0f, 0x22, 0xff, 0x00, 0xa5, 0x02, 0x0f, 0x10, 0x02, 0x02,
            0x48, 0x1e,
        ];
        let mut decoder = FrameDecoder::new(Dialect::Current);
        let events = decoder.push(&stream);
        assert_eq!(events.len(), 2);
        assert_eq!(ready_frames(&events)[0].body, vec![0x48, 0x1e]);
    }

    #[test]
    fn wrong_destination_and_type_are_rejected() {
        let mut decoder = FrameDecoder::new(Dialect::Current);
        let events = decoder.push(&[0xff, 0xa5, 0x02, 0x60, 0x10, 0x02, 0x00]);
        assert!(matches!(
            events.as_slice(),
            [DecodeEvent::FrameDiscarded(DiscardReason::HeaderRejected(_))]
        ));
        let events = decoder.push(&[0xff, 0xa5, 0x14, 0x0f, 0x10, 0x02, 0x00]);
        assert!(matches!(
            events.as_slice(),
            [DecodeEvent::FrameDiscarded(DiscardReason::HeaderRejected(_))]
        ));
    }

    #[test]
    fn oversized_body_is_discarded_without_copy() {
        let mut stream = vec![0xff, 0x00, 0xa5, 0x02, 0x0f, 0x10, 0x02, 0x81];
        stream.extend_from_slice(&[0x11; 0x81]);
        stream.extend_from_slice(&SHORT_FRAME);
        let mut decoder = FrameDecoder::new(Dialect::Current);
        let events = decoder.push(&stream);
        assert!(matches!(
            &events[0],
            DecodeEvent::FrameDiscarded(DiscardReason::Oversized(header)) if header.length == 0x81
        ));
        assert_eq!(events.len(), 2);
        assert_eq!(ready_frames(&events)[0].body, vec![0x48, 0x1e]);
    }

    #[test]
    fn body_at_capacity_is_accepted() {
        let mut stream = vec![0xff, 0x00, 0xa5, 0x02, 0x0f, 0x10, 0x02, BODY_CAPACITY as u8];
        stream.extend_from_slice(&[0x11; BODY_CAPACITY]);
        let mut decoder = FrameDecoder::new(Dialect::Current);
        let frames = ready_frames(&decoder.push(&stream));
        assert_eq!(frames[0].body.len(), BODY_CAPACITY);
    }

    #[test]
    fn zero_length_body_is_ready_at_header() {
        let mut decoder = FrameDecoder::new(Dialect::Current);
        let events = decoder.push(&[0xff, 0xa5, 0x02, 0x0f, 0x10, 0x02, 0x00]);
        assert_eq!(ready_frames(&events)[0].body, Vec::<u8>::new());
        assert_eq!(decoder.phase(), Phase::Scanning);
    }

    #[test]
    fn legacy_status_type() {
        let mut decoder = FrameDecoder::new(Dialect::Legacy);
        let mut stream = vec![0xff, 0x00, 0xa5, 0x14, 0x0f, 0x10, 0x02, STATUS_LENGTH as u8];
        stream.extend_from_slice(&[0u8; STATUS_LENGTH]);
        assert_eq!(ready_frames(&decoder.push(&stream)).len(), 1);
        assert_eq!(decoder.dialect(), Dialect::Legacy);
    }

    #[test]
    fn reset_drops_partial_frame() {
        let mut decoder = FrameDecoder::new(Dialect::Current);
        decoder.push(&SHORT_FRAME[..8]);
        assert_eq!(decoder.phase(), Phase::ReadingBody);
        decoder.reset();
        assert_eq!(decoder.state(), &DecoderState::default());
        assert!(decoder.push(&SHORT_FRAME[8..]).is_empty());
    }

    #[test]
    fn advance_is_a_pure_step() {
        let (state, event) = advance(DecoderState::default(), 0xff, Dialect::Current);
        assert_eq!(event, DecodeEvent::NeedMoreInput);
        assert_eq!(state, DecoderState::Scanning { lookback: [0x00, 0xff] });
        let (state, _) = advance(state, 0xa5, Dialect::Current);
        assert_eq!(state.phase(), Phase::ReadingHeader);
    }
}
