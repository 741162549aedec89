//! Wire protocol (spec §4.G/§4.H): a length-prefixed TCP protocol for
//! shipping views from the store to subscribed clients.

pub mod client;
pub mod codec;
pub mod message;
pub mod serialize;
pub mod server;

pub use codec::MessageCodec;
pub use message::{ClientInterest, DataFrame, Message, PublishTag, ReplyFrame, ReplyStatus};
