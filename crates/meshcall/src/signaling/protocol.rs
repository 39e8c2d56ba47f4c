//! Signaling protocol messages
//!
//! Every frame on the wire is a JSON object `{"event": "<name>", "data": {...}}`
//! with camelCase payload fields.

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// Signaling events exchanged with the room relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Local participant enters a room (outbound)
    Join(JoinPayload),

    /// A participant entered the room, possibly ourselves (inbound)
    ParticipantJoined(JoinPayload),

    /// A participant left the room (inbound)
    ParticipantLeft(LeavePayload),

    /// SDP offer
    Offer(SdpPayload),

    /// SDP answer
    Answer(SdpPayload),

    /// Trickled ICE candidate
    Candidate(CandidatePayload),

    /// A participant started or stopped sharing their screen
    ScreenShareStatus(ScreenSharePayload),

    /// Local participant leaves the room (outbound)
    Leave(LeavePayload),
}

/// Payload of `join` and `participant-joined`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub room_id: String,
    pub participant_id: String,
    pub display_name: String,
}

/// Payload of `leave` and `participant-left`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeavePayload {
    pub room_id: String,
    pub participant_id: String,
}

/// Payload of `offer` and `answer`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SdpPayload {
    pub room_id: String,
    pub sdp: String,
    pub from_id: String,
    /// Recipient, required in mesh rooms and absent in two-party calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_id: Option<String>,
}

/// Payload of `candidate`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    pub room_id: String,
    pub candidate: IceCandidate,
    pub from_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_id: Option<String>,
}

/// Payload of `screen-share-status`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScreenSharePayload {
    pub room_id: String,
    pub participant_id: String,
    pub sharing: bool,
}

/// ICE candidate in browser `RTCIceCandidateInit` shape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate attribute line (`candidate:...`)
    pub candidate: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Candidate with only the attribute line set
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_m_line_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

impl SignalMessage {
    /// Wire name of this event
    pub fn event_name(&self) -> &'static str {
        match self {
            SignalMessage::Join(_) => "join",
            SignalMessage::ParticipantJoined(_) => "participant-joined",
            SignalMessage::ParticipantLeft(_) => "participant-left",
            SignalMessage::Offer(_) => "offer",
            SignalMessage::Answer(_) => "answer",
            SignalMessage::Candidate(_) => "candidate",
            SignalMessage::ScreenShareStatus(_) => "screen-share-status",
            SignalMessage::Leave(_) => "leave",
        }
    }

    /// Room this message belongs to
    pub fn room_id(&self) -> &str {
        match self {
            SignalMessage::Join(p) | SignalMessage::ParticipantJoined(p) => &p.room_id,
            SignalMessage::ParticipantLeft(p) | SignalMessage::Leave(p) => &p.room_id,
            SignalMessage::Offer(p) | SignalMessage::Answer(p) => &p.room_id,
            SignalMessage::Candidate(p) => &p.room_id,
            SignalMessage::ScreenShareStatus(p) => &p.room_id,
        }
    }

    /// Participant that originated this message
    pub fn sender_id(&self) -> &str {
        match self {
            SignalMessage::Join(p) | SignalMessage::ParticipantJoined(p) => &p.participant_id,
            SignalMessage::ParticipantLeft(p) | SignalMessage::Leave(p) => &p.participant_id,
            SignalMessage::Offer(p) | SignalMessage::Answer(p) => &p.from_id,
            SignalMessage::Candidate(p) => &p.from_id,
            SignalMessage::ScreenShareStatus(p) => &p.participant_id,
        }
    }

    /// Explicit recipient, if the message is addressed
    pub fn recipient(&self) -> Option<&str> {
        match self {
            SignalMessage::Offer(p) | SignalMessage::Answer(p) => p.to_id.as_deref(),
            SignalMessage::Candidate(p) => p.to_id.as_deref(),
            _ => None,
        }
    }

    /// Whether this is a point-to-point negotiation message
    pub fn is_negotiation(&self) -> bool {
        matches!(
            self,
            SignalMessage::Offer(_) | SignalMessage::Answer(_) | SignalMessage::Candidate(_)
        )
    }

    /// Convert message to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::Serialization(format!("Failed to serialize signaling message: {}", e))
        })
    }

    /// Parse message from JSON string
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::Serialization(format!("Failed to deserialize signaling message: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_wire_format() {
        let msg = SignalMessage::Offer(SdpPayload {
            room_id: "r1".to_string(),
            sdp: "v=0".to_string(),
            from_id: "alice".to_string(),
            to_id: Some("bob".to_string()),
        });

        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "offer");
        assert_eq!(value["data"]["roomId"], "r1");
        assert_eq!(value["data"]["fromId"], "alice");
        assert_eq!(value["data"]["toId"], "bob");
    }

    #[test]
    fn test_two_party_offer_omits_recipient() {
        let msg = SignalMessage::Answer(SdpPayload {
            room_id: "r1".to_string(),
            sdp: "v=0".to_string(),
            from_id: "bob".to_string(),
            to_id: None,
        });

        let json = msg.to_json().unwrap();
        assert!(!json.contains("toId"));
        assert_eq!(SignalMessage::from_json(&json).unwrap().recipient(), None);
    }

    #[test]
    fn test_parse_participant_joined() {
        let json = r#"{
            "event": "participant-joined",
            "data": { "roomId": "r1", "participantId": "carol", "displayName": "Carol" }
        }"#;

        let msg = SignalMessage::from_json(json).unwrap();
        assert_eq!(msg.event_name(), "participant-joined");
        assert_eq!(msg.sender_id(), "carol");
        assert_eq!(msg.room_id(), "r1");
    }

    #[test]
    fn test_parse_browser_candidate() {
        let json = r#"{
            "event": "candidate",
            "data": {
                "roomId": "r1",
                "fromId": "bob",
                "toId": "alice",
                "candidate": {
                    "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host",
                    "sdpMid": "0",
                    "sdpMLineIndex": 0
                }
            }
        }"#;

        match SignalMessage::from_json(json).unwrap() {
            SignalMessage::Candidate(payload) => {
                assert_eq!(payload.candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(payload.candidate.sdp_m_line_index, Some(0));
                assert_eq!(payload.to_id.as_deref(), Some("alice"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let json = r#"{ "event": "chat-message", "data": { "text": "hi" } }"#;
        assert!(SignalMessage::from_json(json).is_err());
    }

    #[test]
    fn test_candidate_converts_to_webrtc_init() {
        let mut candidate = IceCandidate::new("candidate:2 1 udp 1 192.0.2.1 3478 typ srflx");
        candidate.sdp_m_line_index = Some(1);

        let init: RTCIceCandidateInit = candidate.clone().into();
        assert_eq!(init.sdp_mline_index, Some(1));
        assert_eq!(IceCandidate::from(init), candidate);
    }
}
