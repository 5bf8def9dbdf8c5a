use std::io;
use std::net;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    //RTCP wire format errors
    /// Packet contains an invalid header.
    #[error("Invalid header")]
    InvalidHeader,
    /// Buffer ended before the packet did.
    #[error("Packet truncated")]
    Truncated,
    /// Packet type outside the supported [200, 204] range.
    #[error("Unsupported packet type {0}")]
    UnsupportedType(u8),
    /// Padded packets are rejected on receive and never emitted.
    #[error("Padded packets are not supported")]
    PaddingUnsupported,
    /// A typed unmarshal was handed a packet of another type.
    #[error("Wrong packet type")]
    WrongType,
    /// Wrong marshal size.
    #[error("Wrong marshal size")]
    WrongMarshalSize,
    /// Buffer is too short.
    #[error("Buffer too short to be written")]
    BufferTooShort,
    /// Packet lost exceeds maximum amount of packets
    /// that can possibly be lost.
    #[error("Invalid total lost count")]
    InvalidTotalLost,
    /// Too many reception report blocks for the 5-bit count field.
    #[error("Too many reports")]
    TooManyReports,
    /// Too many SSRCs for the 5-bit count field.
    #[error("Too many sources")]
    TooManySources,
    /// Too many SDES chunks for the 5-bit count field.
    #[error("Too many chunks")]
    TooManyChunks,
    /// SDES received is too long.
    #[error("SDES must be < 255 octets long")]
    SdesTextTooLong,
    /// SDES type is missing.
    #[error("SDES item missing type")]
    SdesMissingType,
    /// BYE reason is too long.
    #[error("Reason must be < 255 octets long")]
    ReasonTooLong,
    /// APP packet name must be exactly four ASCII characters.
    #[error("APP name must be 4 ASCII characters")]
    InvalidAppName,
    /// APP packet data must keep the packet 32-bit aligned.
    #[error("APP data must be a multiple of 4 octets")]
    InvalidAppData,

    //Compound packet validation
    /// Packet contains empty compound.
    #[error("Empty compound packet")]
    EmptyCompound,
    /// Invalid first packet in compound packets. First packet
    /// should either be a SenderReport packet or ReceiverReport
    #[error("First packet in compound must be SR or RR")]
    BadFirstPacket,
    /// CNAME was not defined.
    #[error("Compound missing SourceDescription with CNAME")]
    MissingCname,

    //RTP errors
    #[error("RTP header size insufficient")]
    HeaderSizeInsufficient,

    //Session errors
    #[error("Invalid value")]
    InvalidValue,
    #[error("Not found")]
    NotFound,
    #[error("SSRC collision")]
    SsrcCollision,
    #[error("Session already running")]
    AlreadyRunning,
    #[error("mutex poison: {0}")]
    PoisonError(String),

    #[error("parse ip: {0}")]
    ParseIp(#[from] net::AddrParseError),
    #[error("{0}")]
    Io(#[source] IoError),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::PoisonError(e.to_string())
    }
}
