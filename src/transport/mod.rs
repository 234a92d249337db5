//! Messaging substrate: envelopes, the in-process bus and broker discovery

pub mod bus;
pub mod directory;
pub mod message;

pub use bus::{Mailbox, MessageBus};
pub use directory::Directory;
pub use message::{Envelope, Message, Performative};
