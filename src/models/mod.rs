pub mod conversation;
pub mod message;
pub mod presence;

pub use conversation::{Conversation, ConversationKind, Participant, ParticipantRole};
pub use message::{MediaDescriptor, Message, MessageBody, MessageDto, MessageKind};
pub use presence::{PresenceRecord, PresenceState};
