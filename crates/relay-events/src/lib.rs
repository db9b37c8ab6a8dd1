pub mod chain;
pub mod codec;
pub mod crypto;
pub mod event;
pub mod kind;
pub mod peer_info;
pub mod settlement;
pub mod transport;

pub use chain::ChainId;
pub use codec::build_peer_info;
pub use codec::build_request;
pub use codec::build_response;
pub use codec::parse_peer_info;
pub use codec::parse_request;
pub use codec::parse_response;
pub use codec::BuiltRequest;
pub use codec::InvalidEvent;
pub use crypto::Keys;
pub use event::Event;
pub use kind::FOLLOW_LIST_KIND;
pub use kind::PEER_INFO_KIND;
pub use kind::REQUEST_KIND;
pub use kind::RESPONSE_KIND;
pub use peer_info::PeerInfo;
pub use settlement::SettlementOffer;
pub use settlement::SettlementRequest;
pub use settlement::SettlementResponse;
pub use transport::JsonTransportCodec;
pub use transport::TransportCodec;
