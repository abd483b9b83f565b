use std::collections::BTreeMap;

use log::debug;

/// S2C_CHALLENGE: the server wants the request repeated with a token.
pub const RESP_CHALLENGE: u8 = 0x41;
/// A2S_INFO response, Source layout.
pub const RESP_INFO: u8 = 0x49;
/// A2S_INFO response, obsolete GoldSrc layout.
pub const RESP_INFO_GOLDSRC: u8 = 0x6D;
pub const RESP_PLAYER: u8 = 0x44;
pub const RESP_RULES: u8 = 0x45;

const INFO_PAYLOAD: &[u8] = b"Source Engine Query\0";
/// Asks the server to hand out a challenge token.
const CHALLENGE_REQUEST: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PacketHeader {
    /// The whole response fits in this datagram.
    Single,
    /// This datagram is one fragment of a multi-packet response.
    Split,
}

impl PacketHeader {
    const SINGLE: i32 = -1;
    const SPLIT: i32 = -2;

    /// Read the envelope from the first four bytes of `data`.
    pub fn from_packet(data: &[u8]) -> Option<Self> {
        let raw: [u8; 4] = data.get(..4)?.try_into().ok()?;
        match i32::from_le_bytes(raw) {
            Self::SINGLE => Some(PacketHeader::Single),
            Self::SPLIT => Some(PacketHeader::Split),
            _ => None,
        }
    }

    pub fn to_le_bytes(self) -> [u8; 4] {
        match self {
            PacketHeader::Single => Self::SINGLE.to_le_bytes(),
            PacketHeader::Split => Self::SPLIT.to_le_bytes(),
        }
    }
}

/// The three A2S queries.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Request {
    /// [A2S_INFO](https://developer.valvesoftware.com/wiki/Server_queries#A2S_INFO)
    Info,
    /// [A2S_PLAYER](https://developer.valvesoftware.com/wiki/Server_queries#A2S_PLAYER)
    Players,
    /// [A2S_RULES](https://developer.valvesoftware.com/wiki/Server_queries#A2S_RULES)
    Rules,
}

impl Request {
    pub fn to_byte(self) -> u8 {
        match self {
            Request::Info => 0x54,
            Request::Players => 0x55,
            Request::Rules => 0x56,
        }
    }

    /// Header byte of a successful reply.
    pub fn expected_response(self) -> u8 {
        match self {
            Request::Info => RESP_INFO,
            Request::Players => RESP_PLAYER,
            Request::Rules => RESP_RULES,
        }
    }

    /// Serialize the request, answering `challenge` if the server sent one.
    ///
    /// INFO keeps its payload and appends the token; PLAYER and RULES send
    /// the token in place of the challenge request.
    pub fn pack(self, challenge: Option<&[u8]>) -> Vec<u8> {
        let mut packet: Vec<u8> = Vec::new();
        packet.extend_from_slice(&PacketHeader::Single.to_le_bytes());
        packet.push(self.to_byte());

        match (self, challenge) {
            (Request::Info, token) => {
                packet.extend_from_slice(INFO_PAYLOAD);
                if let Some(token) = token {
                    packet.extend_from_slice(token);
                }
            }
            (_, Some(token)) => packet.extend_from_slice(token),
            (_, None) => packet.extend_from_slice(&CHALLENGE_REQUEST),
        }

        packet
    }
}

/// Drop a leading single-packet envelope, if there is one.
pub fn strip_single(data: &[u8]) -> &[u8] {
    match PacketHeader::from_packet(data) {
        Some(PacketHeader::Single) => &data[4..],
        _ => data,
    }
}

/// Does the (optionally enveloped) payload answer a request expecting `expected`?
fn matches_expected(data: &[u8], expected: u8) -> bool {
    match strip_single(data).first() {
        Some(&kind) => {
            kind == expected
                || kind == RESP_CHALLENGE
                || (expected == RESP_INFO && kind == RESP_INFO_GOLDSRC)
        }
        None => false,
    }
}

/// Decide whether the datagrams received so far hold a complete reply.
///
/// Returns the reply (single packet, or the reassembled split payload) once
/// complete. Malformed and missing fragments yield `None` rather than an
/// error, so stray or duplicated datagrams only delay the answer.
pub fn validate_packet(chunk: &[u8], all: &[Vec<u8>], expected: u8) -> Option<Vec<u8>> {
    match PacketHeader::from_packet(chunk)? {
        PacketHeader::Single => matches_expected(chunk, expected).then(|| chunk.to_vec()),
        PacketHeader::Split => SplitLayout::GoldSrc
            .reassemble(all, expected)
            .or_else(|| SplitLayout::Source.reassemble(all, expected)),
    }
}

/// Fragment layouts of a multi-packet response.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum SplitLayout {
    /// Byte 8 packs the fragment index (high nibble) and count (low nibble).
    GoldSrc,
    /// Byte 8 is the fragment count, byte 9 the index, bytes 10-11 the size.
    Source,
}

impl SplitLayout {
    const PACKED_OFFSET: usize = 8;
    const TOTAL_OFFSET: usize = 8;
    const NUMBER_OFFSET: usize = 9;

    fn header_len(self) -> usize {
        match self {
            SplitLayout::GoldSrc => 9,
            SplitLayout::Source => 12,
        }
    }

    fn total(self, fragment: &[u8]) -> usize {
        match self {
            SplitLayout::GoldSrc => (fragment[Self::PACKED_OFFSET] & 0x0F) as usize,
            SplitLayout::Source => fragment[Self::TOTAL_OFFSET] as usize,
        }
    }

    fn index(self, fragment: &[u8]) -> u8 {
        match self {
            SplitLayout::GoldSrc => fragment[Self::PACKED_OFFSET] >> 4,
            SplitLayout::Source => fragment[Self::NUMBER_OFFSET],
        }
    }

    fn reassemble(self, all: &[Vec<u8>], expected: u8) -> Option<Vec<u8>> {
        let header_len = self.header_len();
        if all.iter().any(|fragment| fragment.len() < header_len) {
            return None;
        }

        let total = self.total(all.first()?);
        // Keyed by index: sorted, and a repeated fragment only counts once.
        let mut fragments: BTreeMap<u8, &[u8]> = BTreeMap::new();
        for fragment in all {
            fragments
                .entry(self.index(fragment))
                .or_insert(&fragment[header_len..]);
        }
        if fragments.len() < total {
            return None;
        }

        let reassembled: Vec<u8> = fragments.into_values().flatten().copied().collect();
        if !matches_expected(&reassembled, expected) {
            return None;
        }

        debug!(
            "reassembled {} byte reply from {} {:?} fragments",
            reassembled.len(),
            total,
            self
        );
        Some(reassembled)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Wrap `payload` in a single-packet envelope after `header`.
    pub(crate) fn single(header: u8, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0xFF, 0xFF, 0xFF, 0xFF, header];
        packet.extend_from_slice(payload);
        packet
    }

    /// Split an enveloped reply into `parts` fragments.
    pub(crate) fn split(header: u8, payload: &[u8], parts: usize, gold_src: bool) -> Vec<Vec<u8>> {
        let data = single(header, payload);
        let size = (data.len() + parts - 1) / parts;

        data.chunks(size)
            .enumerate()
            .map(|(index, chunk)| {
                // -2 followed by answer id 1234
                let mut fragment = vec![0xFE, 0xFF, 0xFF, 0xFF, 0xD2, 0x04, 0x00, 0x00];
                if gold_src {
                    fragment.push(((index as u8) << 4) | parts as u8);
                } else {
                    fragment.extend_from_slice(&[parts as u8, index as u8, 0xE0, 0x04]);
                }
                fragment.extend_from_slice(chunk);
                fragment
            })
            .collect()
    }

    #[test]
    fn packs_requests() {
        assert_eq!(
            Request::Info.pack(None),
            b"\xFF\xFF\xFF\xFFTSource Engine Query\0".to_vec()
        );
        assert_eq!(
            Request::Info.pack(Some(&[1, 2, 3, 4])),
            b"\xFF\xFF\xFF\xFFTSource Engine Query\0\x01\x02\x03\x04".to_vec()
        );
        assert_eq!(
            Request::Players.pack(None),
            vec![0xFF, 0xFF, 0xFF, 0xFF, 0x55, 0xFF, 0xFF, 0xFF, 0xFF]
        );
        assert_eq!(
            Request::Rules.pack(Some(&[0xDE, 0xAD, 0xBE, 0xEF])),
            vec![0xFF, 0xFF, 0xFF, 0xFF, 0x56, 0xDE, 0xAD, 0xBE, 0xEF]
        );
    }

    #[test]
    fn single_packet_headers() {
        let info = single(RESP_INFO, b"\x11");
        assert_eq!(validate_packet(&info, &[info.clone()], RESP_INFO), Some(info.clone()));

        let gold = single(RESP_INFO_GOLDSRC, b"x");
        assert!(validate_packet(&gold, &[gold.clone()], RESP_INFO).is_some());
        // The GoldSrc alias only stands in for INFO.
        assert!(validate_packet(&gold, &[gold.clone()], RESP_PLAYER).is_none());

        let challenge = single(RESP_CHALLENGE, &[1, 2, 3, 4]);
        assert!(validate_packet(&challenge, &[challenge.clone()], RESP_RULES).is_some());

        let wrong = single(RESP_RULES, b"");
        assert!(validate_packet(&wrong, &[wrong.clone()], RESP_PLAYER).is_none());

        let empty = vec![0xFF, 0xFF, 0xFF, 0xFF];
        assert!(validate_packet(&empty, &[empty.clone()], RESP_INFO).is_none());
        assert!(validate_packet(&[0xFF, 0xFF], &[vec![0xFF, 0xFF]], RESP_INFO).is_none());
    }

    #[test]
    fn gold_src_reassembly_is_order_independent() {
        let payload: Vec<u8> = (0u8..60).collect();
        let fragments = split(RESP_RULES, &payload, 3, true);
        let expected = single(RESP_RULES, &payload);

        let orders = [[0, 1, 2], [2, 1, 0], [1, 2, 0], [2, 0, 1]];
        for order in orders {
            let mut received: Vec<Vec<u8>> = Vec::new();
            let mut result = None;
            for &i in &order {
                received.push(fragments[i].clone());
                result = validate_packet(&fragments[i], &received, RESP_RULES);
                if received.len() < 3 {
                    assert!(result.is_none());
                }
            }
            assert_eq!(result.as_deref(), Some(expected.as_slice()));
        }
    }

    #[test]
    fn source_reassembly() {
        let payload = b"\x11Src\0Map\0F\0G\0\x0A\x00\x00\x00\x00dw\x00\x001\0";
        let fragments = split(RESP_INFO, payload, 2, false);

        let received = vec![fragments[1].clone()];
        assert!(validate_packet(&fragments[1], &received, RESP_INFO).is_none());

        let received = vec![fragments[1].clone(), fragments[0].clone()];
        let reply = validate_packet(&fragments[0], &received, RESP_INFO).unwrap();
        assert_eq!(reply, single(RESP_INFO, payload));
    }

    #[test]
    fn duplicate_and_short_fragments_wait() {
        let fragments = split(RESP_PLAYER, &[0u8; 40], 2, true);

        let received = vec![fragments[0].clone(), fragments[0].clone()];
        assert!(validate_packet(&fragments[0], &received, RESP_PLAYER).is_none());

        let stub = vec![0xFE, 0xFF, 0xFF, 0xFF, 0x00];
        let received = vec![fragments[0].clone(), stub.clone()];
        assert!(validate_packet(&stub, &received, RESP_PLAYER).is_none());
    }
}
