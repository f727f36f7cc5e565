// Protocol message model
// Defines the role/kind vocabulary and the record exchanged between all parties

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};

use timekeeper_common::{CodecError, MAX_ADDRESS_LENGTH, MAX_ADDRESSES, now_utc};

/// Opaque identifier of a participant's transport endpoint.
///
/// The raw string round-trips through the wire format unchanged. Length is
/// only checked when the address is encoded.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Check the address against the wire bound
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.0.len() > MAX_ADDRESS_LENGTH {
            return Err(CodecError::AddressTooLong {
                length: self.0.len(),
                max: MAX_ADDRESS_LENGTH,
            });
        }
        Ok(())
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Role of the sender of a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Passive node waiting for promotion or time updates
    Client,
    /// Node currently broadcasting time
    Server,
    /// The coordination process
    Controller,
}

impl Role {
    pub fn as_u8(self) -> u8 {
        match self {
            Role::Client => 0,
            Role::Server => 1,
            Role::Controller => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "CLIENT",
            Role::Server => "SERVER",
            Role::Controller => "CONTROLLER",
        }
    }
}

impl TryFrom<u8> for Role {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Role::Client),
            1 => Ok(Role::Server),
            2 => Ok(Role::Controller),
            other => Err(CodecError::UnknownRole(other)),
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Meaning of a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Registration of a node (from a client) or relay of one (from the controller)
    NewClient,
    /// Time broadcast from the leader, doubling as its heartbeat
    NewTime,
    /// Promotion of a node to leader, carrying the full membership
    SetServer,
    /// Liveness probe sent to the controller by the bootstrap logic
    TestController,
}

impl MessageKind {
    pub fn as_u8(self) -> u8 {
        match self {
            MessageKind::NewClient => 0,
            MessageKind::NewTime => 1,
            MessageKind::SetServer => 2,
            MessageKind::TestController => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::NewClient => "NEW_CLIENT",
            MessageKind::NewTime => "NEW_TIME",
            MessageKind::SetServer => "SET_SERVER",
            MessageKind::TestController => "TEST_CONTROLLER",
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageKind::NewClient),
            1 => Ok(MessageKind::NewTime),
            2 => Ok(MessageKind::SetServer),
            3 => Ok(MessageKind::TestController),
            other => Err(CodecError::UnknownKind(other)),
        }
    }
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The wire record exchanged between all parties.
///
/// `delivered` is set by the receiving transport after a read attempt and is
/// never transmitted. When it is `false` the other fields carry no meaning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    pub addresses: Vec<Address>,
    pub delivered: bool,
}

impl Message {
    pub fn new(role: Role, kind: MessageKind) -> Self {
        Self {
            role,
            kind,
            timestamp: now_utc(),
            addresses: Vec::new(),
            delivered: false,
        }
    }

    /// Registration of `address` sent by a joining node
    pub fn new_client(address: Address) -> Self {
        Self::new(Role::Client, MessageKind::NewClient).with_addresses(vec![address])
    }

    /// Time broadcast stamped with `timestamp`
    pub fn new_time(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ..Self::new(Role::Server, MessageKind::NewTime)
        }
    }

    /// Promotion carrying the full membership list
    pub fn set_server(addresses: Vec<Address>) -> Self {
        Self::new(Role::Controller, MessageKind::SetServer).with_addresses(addresses)
    }

    /// Controller liveness probe
    pub fn test_controller() -> Self {
        Self::new(Role::Client, MessageKind::TestController)
    }

    /// A placeholder for a failed or timed out read
    pub fn undelivered() -> Self {
        Self::new(Role::Client, MessageKind::TestController)
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_addresses(mut self, addresses: Vec<Address>) -> Self {
        self.addresses = addresses;
        self
    }

    pub fn mark_delivered(mut self) -> Self {
        self.delivered = true;
        self
    }

    pub fn address_count(&self) -> usize {
        self.addresses.len()
    }

    pub fn first_address(&self) -> Option<&Address> {
        self.addresses.first()
    }

    /// Check the address list against the wire bounds
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.addresses.len() > MAX_ADDRESSES {
            return Err(CodecError::TooManyAddresses {
                count: self.addresses.len(),
                max: MAX_ADDRESSES,
            });
        }
        self.addresses.iter().try_for_each(Address::validate)
    }
}
