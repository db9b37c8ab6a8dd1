use primitive_types::U256;

/// An inbound payment unit at the business-logic boundary. `data`
/// transports one compact-encoded wire event.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Unsigned amount as a decimal string.
    pub amount: String,
    /// Routing address the payment was addressed to.
    pub destination: String,
    pub data: Vec<u8>,
    pub source_account: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
    /// `F00` — malformed packet or event.
    BadRequest,
    /// `F06` — amount below the oracle price.
    InsufficientAmount,
    /// `T00` — something on our side went wrong.
    InternalError,
}

impl RejectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectCode::BadRequest => "F00",
            RejectCode::InsufficientAmount => "F06",
            RejectCode::InternalError => "T00",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reject {
    pub code: RejectCode,
    pub message: String,
    /// `required`/`received` metadata for underpayment rejects.
    pub required: Option<String>,
    pub received: Option<String>,
}

impl Reject {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Reject {
            code: RejectCode::BadRequest,
            message: message.into(),
            required: None,
            received: None,
        }
    }

    pub fn insufficient_amount(required: U256, received: U256) -> Self {
        Reject {
            code: RejectCode::InsufficientAmount,
            message: format!("insufficient amount: required {required}, received {received}"),
            required: Some(required.to_string()),
            received: Some(received.to_string()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Reject {
            code: RejectCode::InternalError,
            message: message.into(),
            required: None,
            received: None,
        }
    }
}

/// Verdict for one handled packet, decided after every side effect has
/// been committed or explicitly abandoned.
#[derive(Debug, Clone)]
pub enum PacketOutcome {
    Accept {
        /// All-zeroes for settlement requests, absent otherwise.
        fulfillment: Option<[u8; 32]>,
        /// Piggy-backed response event, compact-encoded.
        data: Option<Vec<u8>>,
        /// Id of the stored event for plain writes.
        event_id: Option<String>,
    },
    Reject(Reject),
}

impl PacketOutcome {
    pub fn is_accept(&self) -> bool {
        matches!(self, PacketOutcome::Accept { .. })
    }
}
