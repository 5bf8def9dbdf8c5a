//! RTCP compound packet codec per RFC 3550.
//!
//! Supported packet types are Sender Report (200), Receiver Report (201),
//! Source Description (202), Goodbye (203) and Application-Defined (204).
//! Parsing is strict: version must be 2, the padding bit is rejected, and
//! packet types outside the supported range are refused. Serialization is
//! byte-exact, so `parse(serialize(p)) == p` for every accepted packet.

#![warn(rust_2018_idioms)]

pub mod app_defined;
pub mod compound_packet;
pub mod goodbye;
pub mod header;
pub mod packet;
pub mod receiver_report;
pub mod reception_report;
pub mod sender_report;
pub mod source_description;

pub use packet::Packet;
